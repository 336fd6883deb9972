//! Node processors - the business logic behind a configured node.
//!
//! The engine drives each processor exactly twice per executed task: one
//! `init` with the node's parameters, then one `process` with the resolved
//! inputs. Both receive the run's cancellation token; honoring it mid-call
//! is up to the processor.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::value::Values;

/// Processing logic for one node
#[async_trait]
pub trait NodeProcessor: Send + Sync {
    /// Prepare the processor with the node's configured parameters.
    ///
    /// A failure here is treated as a structural defect of the run and
    /// stops the job.
    async fn init(&mut self, _cancel: &CancellationToken, _params: &Values) -> anyhow::Result<()> {
        Ok(())
    }

    /// Compute outputs from inputs, keyed by the node's local names.
    ///
    /// Returning `Ok(None)` means the processor produced no result; the
    /// node's followers are skipped.
    async fn process(
        &mut self,
        cancel: &CancellationToken,
        inputs: Values,
    ) -> anyhow::Result<Option<Values>>;
}

/// Example: echo processor that returns its inputs unchanged
#[derive(Debug, Default)]
pub struct EchoProcessor;

#[async_trait]
impl NodeProcessor for EchoProcessor {
    async fn process(
        &mut self,
        _cancel: &CancellationToken,
        inputs: Values,
    ) -> anyhow::Result<Option<Values>> {
        tracing::trace!(inputs = inputs.len(), "echo processor");
        Ok(Some(inputs))
    }
}
