pub mod config;
pub mod context;
pub mod engine;
pub mod graph;
pub mod job;
pub mod task;

pub use config::{
    parse_config, ConfigManager, EngineConfig, NodeSpec, RunSpec, StaticConfigManager,
    YamlConfigManager,
};
pub use context::RunContext;
pub use engine::Engine;
pub use graph::{DependencyGraph, GraphNode};
pub use job::{Job, RunReport, TaskOutcome};
pub use task::{ControlCode, Task, TaskPhase, TaskState};
