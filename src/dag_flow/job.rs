//! One execution of a configured graph.
//!
//! A job validates and publishes the run inputs, builds and sorts the
//! dependency graph, creates one task per node, starts them all and waits
//! until every task has reported completion. Only then are the run outputs
//! read from the value store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::{EngineConfig, NodeSpec, RunSpec};
use super::context::RunContext;
use super::graph::{DependencyGraph, GraphNode};
use super::task::{ControlCode, Task, TaskState};
use crate::core::errors::{DagError, Result};
use crate::core::sync::CountdownLatch;
use crate::core::value::Values;
use crate::processor::ProcessorRegistry;

/// How one node ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    pub code: ControlCode,
    pub failure: Option<String>,
    /// Time spent executing; absent when the node never executed
    pub duration_ms: Option<u64>,
}

/// Everything observed during one run
#[derive(Debug)]
pub struct RunReport {
    pub run_key: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// The run deadline fired before every task finished
    pub timed_out: bool,
    pub tasks: BTreeMap<String, TaskOutcome>,
    /// Panics contained while executing processors
    pub defects: Vec<DagError>,
    pub outputs: Result<Values>,
}

impl RunReport {
    /// Run result: the first recorded defect wins over the output read
    pub fn into_outputs(self) -> Result<Values> {
        match self.defects.into_iter().next() {
            Some(defect) => Err(defect),
            None => self.outputs,
        }
    }

    pub fn outcome(&self, node: &str) -> Option<&TaskOutcome> {
        self.tasks.get(node)
    }

    /// Nodes that ended with `code`, sorted by name
    pub fn nodes_with_code(&self, code: ControlCode) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|(_, outcome)| outcome.code == code)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Orchestrator for a single run
pub struct Job {
    key: String,
    spec: Arc<RunSpec>,
    registry: Arc<dyn ProcessorRegistry>,
    deadline: Option<Duration>,
    max_parallel: Option<usize>,
}

impl Job {
    pub fn new(key: impl Into<String>, spec: Arc<RunSpec>, registry: Arc<dyn ProcessorRegistry>) -> Self {
        Self {
            key: key.into(),
            spec,
            registry,
            deadline: None,
            max_parallel: None,
        }
    }

    /// Apply the deadline and concurrency bound of an engine config
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.deadline = config.run_timeout_secs.map(Duration::from_secs);
        self.max_parallel = config.max_parallel_nodes;
        self
    }

    /// Cancel the run once `deadline` has elapsed
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = Some(max_parallel);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn spec(&self) -> &RunSpec {
        &self.spec
    }

    /// Run to completion and return the declared run outputs
    pub async fn run(&self, cancel: CancellationToken, inputs: Values) -> Result<Values> {
        self.run_with_report(cancel, inputs).await?.into_outputs()
    }

    /// Run to completion and report per-node outcomes.
    ///
    /// Errors returned directly are structural: no processor was invoked.
    /// Failures after tasks started are carried in the report.
    pub async fn run_with_report(&self, cancel: CancellationToken, inputs: Values) -> Result<RunReport> {
        let started_at = Utc::now();
        info!(job = %self.key, run = %self.spec.name, nodes = self.spec.nodes.len(), "job started");

        let ctx = Arc::new(self.prepare_context(inputs)?);
        let graph = DependencyGraph::build(&self.spec)?;
        let order = graph.toposort()?;
        let tasks = self.create_tasks(&order)?;
        let states: Vec<Arc<TaskState>> = tasks.iter().map(|t| t.state().clone()).collect();

        let run_cancel = cancel.child_token();
        let timed_out = Arc::new(AtomicBool::new(false));
        let timer = self.arm_deadline(&run_cancel, &timed_out);

        let remaining = Arc::new(CountdownLatch::new(tasks.len()));
        for task in tasks {
            let remaining = remaining.clone();
            tokio::spawn(task.run(run_cancel.clone(), ctx.clone(), move || {
                remaining.count_down();
            }));
        }
        remaining.wait().await;
        if let Some(timer) = timer {
            timer.abort();
        }

        let outputs = ctx.read(&self.spec.output).map_err(|e| match e {
            DagError::ValueNotFound { name } => DagError::MissingRunOutput { name },
            other => other,
        });

        let mut report = RunReport {
            run_key: self.key.clone(),
            started_at,
            finished_at: Utc::now(),
            timed_out: timed_out.load(Ordering::Acquire),
            tasks: BTreeMap::new(),
            defects: Vec::new(),
            outputs,
        };
        for state in states {
            let failure = state.take_failure();
            let outcome = TaskOutcome {
                code: state.control_code().unwrap_or(ControlCode::StopJob),
                failure: failure.as_ref().map(ToString::to_string),
                duration_ms: state.elapsed().map(|d| d.as_millis() as u64),
            };
            if let Some(defect @ DagError::InternalDefect { .. }) = failure {
                report.defects.push(defect);
            }
            report.tasks.insert(state.name().to_string(), outcome);
        }

        info!(
            job = %self.key,
            succeeded = report.nodes_with_code(ControlCode::Continue).len(),
            skipped = report.nodes_with_code(ControlCode::SkipFollowers).len(),
            stopped = report.nodes_with_code(ControlCode::StopJob).len(),
            defects = report.defects.len(),
            timed_out = report.timed_out,
            duration_ms = report.duration().num_milliseconds(),
            "job finished"
        );
        Ok(report)
    }

    /// Check that every declared run input is present and publish exactly those
    fn prepare_context(&self, mut inputs: Values) -> Result<RunContext> {
        let mut declared = Values::with_capacity(self.spec.input.len());
        for name in &self.spec.input {
            let value = inputs
                .remove(name)
                .ok_or_else(|| DagError::MissingRunInput { name: name.clone() })?;
            declared.insert(name.clone(), value);
        }
        if !inputs.is_empty() {
            debug!(job = %self.key, ignored = inputs.len(), "undeclared run inputs ignored");
        }

        let mut ctx = RunContext::new(self.registry.clone());
        if let Some(max_parallel) = self.max_parallel {
            ctx = ctx.with_max_parallel(max_parallel);
        }
        ctx.update(declared);
        Ok(ctx)
    }

    /// Create one task per node in topological order and wire predecessors
    /// to followers. Every processor is instantiated before any task starts.
    fn create_tasks(&self, order: &[&GraphNode]) -> Result<Vec<Task>> {
        let specs: HashMap<&str, &NodeSpec> = self
            .spec
            .nodes
            .values()
            .map(|node| (node.name.as_str(), node))
            .collect();

        let mut tasks: Vec<Task> = Vec::with_capacity(order.len());
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(order.len());
        for node in order {
            let spec = specs.get(node.name.as_str()).ok_or_else(|| {
                DagError::InvalidConfig(format!("graph node '{}' has no configuration", node.name))
            })?;
            let processor = self
                .registry
                .create(&spec.processor)
                .ok_or_else(|| DagError::UnknownProcessor {
                    node: spec.name.clone(),
                    processor: spec.processor.clone(),
                })?;
            index.insert(node.name.as_str(), tasks.len());
            tasks.push(Task::new(&self.key, spec, processor, node.indegree));
        }

        for node in order {
            let Some(&from) = index.get(node.name.as_str()) else {
                continue;
            };
            for follower in &node.followers {
                let Some(&to) = index.get(follower.as_str()) else {
                    continue;
                };
                let producer = tasks[from].state().clone();
                let consumer = tasks[to].state().clone();
                tasks[from].add_follower(consumer);
                tasks[to].add_predecessor(producer);
            }
        }
        Ok(tasks)
    }

    fn arm_deadline(&self, run_cancel: &CancellationToken, timed_out: &Arc<AtomicBool>) -> Option<JoinHandle<()>> {
        let deadline = self.deadline?;
        let token = run_cancel.clone();
        let flag = timed_out.clone();
        let key = self.key.clone();
        Some(tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(deadline) => {
                    warn!(job = %key, deadline_ms = deadline.as_millis() as u64, "run deadline reached, cancelling");
                    flag.store(true, Ordering::Release);
                    token.cancel();
                }
            }
        }))
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("key", &self.key)
            .field("run", &self.spec.name)
            .field("deadline", &self.deadline)
            .field("max_parallel", &self.max_parallel)
            .finish()
    }
}
