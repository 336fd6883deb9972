//! Entry point: resolves a run identifier to its configuration and runs a
//! fresh job for it.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::config::{ConfigManager, EngineConfig};
use super::job::{Job, RunReport};
use crate::core::errors::Result;
use crate::core::value::Values;
use crate::processor::ProcessorRegistry;

/// Stateless between runs; any number of runs may execute concurrently
#[derive(Clone)]
pub struct Engine {
    configs: Arc<dyn ConfigManager>,
    registry: Arc<dyn ProcessorRegistry>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(configs: Arc<dyn ConfigManager>, registry: Arc<dyn ProcessorRegistry>) -> Self {
        Self {
            configs,
            registry,
            config: EngineConfig::default(),
        }
    }

    /// Defaults applied to every run; a run spec's own section overrides them
    pub fn with_config(mut self, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute the run registered under `run_id` and return its outputs
    pub async fn run(&self, run_id: &str, cancel: CancellationToken, inputs: Values) -> Result<Values> {
        self.job(run_id)?.run(cancel, inputs).await
    }

    /// Like [`Engine::run`] but keeps the per-node report
    pub async fn run_with_report(
        &self,
        run_id: &str,
        cancel: CancellationToken,
        inputs: Values,
    ) -> Result<RunReport> {
        self.job(run_id)?.run_with_report(cancel, inputs).await
    }

    /// Build the job for one run without starting it
    pub fn job(&self, run_id: &str) -> Result<Job> {
        let spec = self.configs.get_config(run_id)?;
        let config = match &spec.config {
            Some(own) => EngineConfig::merge(&self.config, own)?,
            None => self.config.clone(),
        };
        let key = format!("{}-{}", spec.name, cuid2::create_id());
        debug!(run_id, job = %key, "job created");
        Ok(Job::new(key, spec, self.registry.clone()).with_config(&config))
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("config", &self.config).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag_flow::config::{NodeSpec, RunSpec, StaticConfigManager};
    use crate::processor::{EchoProcessor, HandlerRegistry};
    use crate::DagError;

    fn engine() -> Engine {
        let registry = HandlerRegistry::new();
        registry.register_default::<EchoProcessor>("echo");
        let spec = RunSpec::new("echo_run")
            .with_inputs(["x"])
            .with_outputs(["y"])
            .with_node(NodeSpec::new("n", "echo").with_input("v", "x").with_output("y", "v"))
            .with_config(EngineConfig {
                run_timeout_secs: Some(30),
                max_parallel_nodes: None,
            });
        let configs = StaticConfigManager::new().with("echo", spec);
        Engine::new(Arc::new(configs), Arc::new(registry))
    }

    #[tokio::test]
    async fn test_run_by_identifier() {
        let outputs = engine()
            .run("echo", CancellationToken::new(), Values::new().with("x", "hi"))
            .await
            .unwrap();
        assert_eq!(outputs.get_str("y").unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_unknown_run_identifier() {
        let err = engine()
            .run("nope", CancellationToken::new(), Values::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DagError::ConfigLoad { key, .. } if key == "nope"));
    }

    #[test]
    fn test_job_keys_are_unique() {
        let engine = engine();
        let a = engine.job("echo").unwrap();
        let b = engine.job("echo").unwrap();
        assert!(a.key().starts_with("echo_run-"));
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_rejects_invalid_engine_config() {
        let config = EngineConfig {
            run_timeout_secs: None,
            max_parallel_nodes: Some(0),
        };
        assert!(engine().with_config(config).is_err());
    }
}
