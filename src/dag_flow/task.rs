//! Runtime unit wrapping one configured node.
//!
//! A task waits until every predecessor has finished, decides from their
//! control codes whether to execute, runs the node processor, publishes its
//! outputs to the value store, and finally notifies its followers and the
//! job. The notification happens exactly once per task, whatever the outcome,
//! and only after the task's own control code is final.

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::config::NodeSpec;
use super::context::RunContext;
use crate::core::errors::{render_chain, DagError, Result};
use crate::core::sync::CountdownLatch;
use crate::core::value::Values;
use crate::processor::NodeProcessor;

/// Outcome a task reports to its followers.
///
/// Ordered by severity so that aggregation is a maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlCode {
    /// Executed successfully; outputs are published
    Continue,
    /// Failed recoverably; followers must not execute
    SkipFollowers,
    /// Failed unrecoverably or cancelled; followers must not execute
    StopJob,
}

impl ControlCode {
    /// Combine predecessor codes: any stop wins, then any skip, else continue.
    ///
    /// Every dependency counts the same whether or not its node is marked
    /// critical.
    pub fn aggregate(codes: impl IntoIterator<Item = ControlCode>) -> ControlCode {
        codes.into_iter().max().unwrap_or(ControlCode::Continue)
    }
}

/// Lifecycle phase of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TaskPhase {
    Created = 0,
    WaitingOnPredecessors = 1,
    Deciding = 2,
    Executing = 3,
    Skipped = 4,
    Stopped = 5,
    Done = 6,
}

impl TaskPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::WaitingOnPredecessors,
            2 => Self::Deciding,
            3 => Self::Executing,
            4 => Self::Skipped,
            5 => Self::Stopped,
            _ => Self::Done,
        }
    }
}

#[derive(Debug, Default)]
struct TaskRecord {
    failure: Option<DagError>,
    elapsed: Option<Duration>,
}

/// The part of a task observable by predecessors, followers and the job
#[derive(Debug)]
pub struct TaskState {
    name: String,
    /// Predecessors that have not finished yet
    pending: CountdownLatch,
    code: OnceLock<ControlCode>,
    phase: AtomicU8,
    record: Mutex<TaskRecord>,
}

impl TaskState {
    pub fn new(name: impl Into<String>, predecessors: usize) -> Self {
        Self {
            name: name.into(),
            pending: CountdownLatch::new(predecessors),
            code: OnceLock::new(),
            phase: AtomicU8::new(TaskPhase::Created as u8),
            record: Mutex::new(TaskRecord::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Final control code, once the task has finished deciding
    pub fn control_code(&self) -> Option<ControlCode> {
        self.code.get().copied()
    }

    pub fn phase(&self) -> TaskPhase {
        TaskPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Predecessors still running
    pub fn pending_predecessors(&self) -> usize {
        self.pending.remaining()
    }

    /// Time spent executing, if the task executed at all
    pub fn elapsed(&self) -> Option<Duration> {
        self.record.lock().elapsed
    }

    /// Failure message, if the task failed
    pub fn failure_message(&self) -> Option<String> {
        self.record.lock().failure.as_ref().map(ToString::to_string)
    }

    pub(crate) fn take_failure(&self) -> Option<DagError> {
        self.record.lock().failure.take()
    }

    fn set_phase(&self, phase: TaskPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// First call wins; returns false if a code was already set
    fn finalize(&self, code: ControlCode) -> bool {
        self.code.set(code).is_ok()
    }

    /// Code seen by a follower. Unset means the predecessor never decided,
    /// which is treated as a stop.
    fn observed_code(&self) -> ControlCode {
        self.control_code().unwrap_or(ControlCode::StopJob)
    }
}

/// Runs when the task's `run` future completes or is dropped: guarantees a
/// final code, one notification per follower and one `on_done` call.
struct Finish<F: FnOnce()> {
    key: String,
    state: Arc<TaskState>,
    followers: Vec<Arc<TaskState>>,
    on_done: Option<F>,
}

impl<F: FnOnce()> Drop for Finish<F> {
    fn drop(&mut self) {
        if self.state.finalize(ControlCode::StopJob) {
            error!(task = %self.key, "task ended without a control code, stopping job");
        }
        self.state.set_phase(TaskPhase::Done);
        for follower in &self.followers {
            debug!(task = %self.key, follower = %follower.name(), "notify follower");
            follower.pending.count_down();
        }
        if let Some(on_done) = self.on_done.take() {
            on_done();
        }
    }
}

/// Runtime instance of one node for one run
pub struct Task {
    key: String,
    name: String,
    params: Values,
    input: BTreeMap<String, String>,
    output: BTreeMap<String, String>,
    processor: Box<dyn NodeProcessor>,
    predecessors: Vec<Arc<TaskState>>,
    followers: Vec<Arc<TaskState>>,
    state: Arc<TaskState>,
}

impl Task {
    /// Create a task whose counter expects `predecessors` notifications
    pub fn new(
        run_key: &str,
        node: &NodeSpec,
        processor: Box<dyn NodeProcessor>,
        predecessors: usize,
    ) -> Self {
        Self {
            key: format!("{}-{}", run_key, node.name),
            name: node.name.clone(),
            params: node.params.clone(),
            input: node.input.clone(),
            output: node.output.clone(),
            processor,
            predecessors: Vec::with_capacity(predecessors),
            followers: Vec::new(),
            state: Arc::new(TaskState::new(node.name.clone(), predecessors)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &Arc<TaskState> {
        &self.state
    }

    pub fn add_predecessor(&mut self, predecessor: Arc<TaskState>) {
        self.predecessors.push(predecessor);
    }

    pub fn add_follower(&mut self, follower: Arc<TaskState>) {
        self.followers.push(follower);
    }

    /// Wait for predecessors, decide, execute, then notify followers and
    /// call `on_done` exactly once.
    ///
    /// The outcome is observable through [`TaskState`] and the value store.
    pub async fn run<F>(mut self, cancel: CancellationToken, ctx: Arc<RunContext>, on_done: F)
    where
        F: FnOnce() + Send,
    {
        let finish = Finish {
            key: self.key.clone(),
            state: self.state.clone(),
            followers: std::mem::take(&mut self.followers),
            on_done: Some(on_done),
        };

        debug!(task = %self.key, predecessors = self.predecessors.len(), "start task");
        self.state.set_phase(TaskPhase::WaitingOnPredecessors);
        self.state.pending.wait().await;

        self.state.set_phase(TaskPhase::Deciding);
        let code = if cancel.is_cancelled() {
            warn!(task = %self.key, "run cancelled before task start");
            ControlCode::StopJob
        } else {
            match self.suggest_control_code() {
                ControlCode::Continue => self.execute_guarded(&cancel, &ctx).await,
                code => {
                    warn!(task = %self.key, ?code, "predecessor failed, task not executed");
                    code
                }
            }
        };

        match code {
            ControlCode::Continue => {}
            ControlCode::SkipFollowers => self.state.set_phase(TaskPhase::Skipped),
            ControlCode::StopJob => self.state.set_phase(TaskPhase::Stopped),
        }
        self.state.finalize(code);
        debug!(task = %self.key, ?code, "task finished");
        drop(finish);
    }

    fn suggest_control_code(&self) -> ControlCode {
        ControlCode::aggregate(self.predecessors.iter().map(|p| p.observed_code()))
    }

    /// Execute with panic isolation: a panic becomes `STOP_JOB` plus a
    /// recorded `InternalDefect`.
    async fn execute_guarded(&mut self, cancel: &CancellationToken, ctx: &RunContext) -> ControlCode {
        let _permit = match ctx.limiter() {
            Some(limiter) => tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(task = %self.key, "run cancelled while queued");
                    return ControlCode::StopJob;
                }
                permit = limiter.acquire() => permit.ok(),
            },
            None => None,
        };
        if cancel.is_cancelled() {
            warn!(task = %self.key, "run cancelled while queued");
            return ControlCode::StopJob;
        }

        self.state.set_phase(TaskPhase::Executing);
        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.execute(cancel, ctx))
            .catch_unwind()
            .await;
        self.state.record.lock().elapsed = Some(started.elapsed());

        let failure = match outcome {
            Ok(Ok(())) => return ControlCode::Continue,
            Ok(Err(err)) => err,
            Err(payload) => DagError::InternalDefect {
                node: self.name.clone(),
                message: panic_message(payload.as_ref()),
            },
        };
        let code = failure.control_code();
        error!(
            task = %self.key,
            error = %failure,
            category = failure.category(),
            ?code,
            "task failed"
        );
        self.state.record.lock().failure = Some(failure);
        code
    }

    async fn execute(&mut self, cancel: &CancellationToken, ctx: &RunContext) -> Result<()> {
        let inputs = self.resolve_inputs(ctx)?;

        self.processor
            .init(cancel, &self.params)
            .await
            .map_err(|e| DagError::ProcessorInit {
                node: self.name.clone(),
                reason: render_chain(&e),
            })?;

        let outputs = self
            .processor
            .process(cancel, inputs)
            .await
            .map_err(|e| DagError::ProcessorExecution {
                node: self.name.clone(),
                reason: render_chain(&e),
            })?;

        self.publish_outputs(outputs, ctx)
    }

    /// Read the value-store names of the input map, keyed by local name
    fn resolve_inputs(&self, ctx: &RunContext) -> Result<Values> {
        let store_names: Vec<&str> = self.input.values().map(String::as_str).collect();
        let resolved = ctx.read(&store_names).map_err(|e| match e {
            DagError::ValueNotFound { name } => DagError::InputResolution {
                node: self.name.clone(),
                name,
            },
            other => other,
        })?;

        Ok(self
            .input
            .iter()
            .map(|(local, store_name)| {
                let value = resolved.get(store_name).cloned().unwrap_or_default();
                (local.clone(), value)
            })
            .collect())
    }

    /// Map processor outputs to value-store names and publish them in one update.
    ///
    /// Nothing is published unless every declared output is present.
    fn publish_outputs(&self, outputs: Option<Values>, ctx: &RunContext) -> Result<()> {
        let outputs = outputs.ok_or_else(|| DagError::OutputPublish {
            node: self.name.clone(),
            reason: "processor returned no result".to_string(),
        })?;

        let mut published = Values::with_capacity(self.output.len());
        for (store_name, local) in &self.output {
            let value = outputs.get(local).cloned().ok_or_else(|| DagError::OutputPublish {
                node: self.name.clone(),
                reason: format!("processor did not produce output '{}'", local),
            })?;
            published.insert(store_name.clone(), value);
        }
        ctx.update(published);
        Ok(())
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("key", &self.key)
            .field("predecessors", &self.predecessors.len())
            .field("followers", &self.followers.len())
            .field("phase", &self.state.phase())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
