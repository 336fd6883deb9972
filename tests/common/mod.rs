//! Processors and helpers shared by the integration tests

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use dagrun::{HandlerRegistry, NodeProcessor, Values, YamlConfigManager};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Counts processor activity across every task of a test
#[derive(Debug, Default)]
pub struct Calls {
    pub created: AtomicUsize,
    pub inited: AtomicUsize,
    pub processed: AtomicUsize,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    /// `tag` parameter of each processed node, in processing order
    pub order: Mutex<Vec<String>>,
}

impl Calls {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn inited(&self) -> usize {
        self.inited.load(Ordering::SeqCst)
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn order(&self) -> Vec<String> {
        self.order.lock().clone()
    }

    fn enter(&self, tag: &Option<String>) {
        self.processed.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        if let Some(tag) = tag {
            self.order.lock().push(tag.clone());
        }
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Mode {
    /// Reads `a`, writes `b = a * factor` (factor param, default 2)
    Double,
    Fail,
    FailInit,
    Panic,
    NoResult,
    /// Sleeps `delay_ms` (default 20) unless cancelled, then doubles
    Slow,
}

pub struct TestProcessor {
    mode: Mode,
    calls: Arc<Calls>,
    factor: i64,
    delay: Duration,
    tag: Option<String>,
}

impl TestProcessor {
    fn new(mode: Mode, calls: Arc<Calls>) -> Self {
        calls.created.fetch_add(1, Ordering::SeqCst);
        Self {
            mode,
            calls,
            factor: 2,
            delay: Duration::from_millis(20),
            tag: None,
        }
    }

    fn double(&self, inputs: &Values) -> Result<Option<Values>> {
        let a = inputs.get_i64("a")?;
        Ok(Some(Values::new().with("b", a * self.factor)))
    }
}

#[async_trait]
impl NodeProcessor for TestProcessor {
    async fn init(&mut self, _cancel: &CancellationToken, params: &Values) -> Result<()> {
        self.calls.inited.fetch_add(1, Ordering::SeqCst);
        if let Mode::FailInit = self.mode {
            bail!("init rejected params");
        }
        if params.contains("factor") {
            self.factor = params.get_i64("factor")?;
        }
        if params.contains("delay_ms") {
            self.delay = Duration::from_millis(params.get_i64("delay_ms")? as u64);
        }
        if params.contains("tag") {
            self.tag = Some(params.get_str("tag")?.to_string());
        }
        Ok(())
    }

    async fn process(&mut self, cancel: &CancellationToken, inputs: Values) -> Result<Option<Values>> {
        self.calls.enter(&self.tag);
        let result = match self.mode {
            Mode::Double | Mode::FailInit => self.double(&inputs),
            Mode::Fail => Err(anyhow::anyhow!("processing rejected input")),
            Mode::NoResult => Ok(None),
            Mode::Panic => panic!("processor bug"),
            Mode::Slow => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(anyhow::anyhow!("cancelled while processing")),
                    _ = tokio::time::sleep(self.delay) => self.double(&inputs),
                }
            }
        };
        self.calls.exit();
        result
    }
}

/// Registry with every test processor registered under its mode name
pub fn registry(calls: &Arc<Calls>) -> HandlerRegistry {
    let registry = HandlerRegistry::new();
    let modes = [
        ("double", Mode::Double),
        ("fail", Mode::Fail),
        ("fail_init", Mode::FailInit),
        ("panic", Mode::Panic),
        ("none", Mode::NoResult),
        ("slow", Mode::Slow),
    ];
    for (name, mode) in modes {
        let calls = calls.clone();
        registry.register(name, move || Box::new(TestProcessor::new(mode, calls.clone())));
    }
    registry
}

pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
}

pub fn fixture_configs() -> YamlConfigManager {
    YamlConfigManager::new(fixtures_dir())
}
