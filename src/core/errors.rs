use thiserror::Error;

use crate::dag_flow::task::ControlCode;

/// Unified error type for graph construction, scheduling and node execution
#[derive(Debug, Error)]
pub enum DagError {
    /// The configuration supplier could not produce a run spec
    #[error("Failed to load config '{key}': {message}")]
    ConfigLoad { key: String, message: String },

    /// Engine or run configuration values are out of range
    #[error("Configuration invalid: {0}")]
    InvalidConfig(String),

    /// Two nodes declare the same output value name
    #[error("Duplicate output '{output}' declared by nodes ({first}, {second})")]
    DuplicateOutputName {
        output: String,
        first: String,
        second: String,
    },

    /// The dependency graph contains at least one cycle
    #[error("Circular dependency detected among nodes: [{}]", .nodes.join(", "))]
    CyclicDependency { nodes: Vec<String> },

    /// A declared run input was not supplied by the caller
    #[error("Run input '{name}' not provided")]
    MissingRunInput { name: String },

    /// The registry has no processor under the requested identifier
    #[error("Unknown processor '{processor}' for node '{node}'")]
    UnknownProcessor { node: String, processor: String },

    /// A node input could not be read from the value store
    #[error("Node '{node}' failed to resolve input '{name}'")]
    InputResolution { node: String, name: String },

    /// Processor `init` failed
    #[error("Processor init failed for node '{node}': {reason}")]
    ProcessorInit { node: String, reason: String },

    /// Processor `process` failed
    #[error("Processor execution failed for node '{node}': {reason}")]
    ProcessorExecution { node: String, reason: String },

    /// Processor results could not be mapped into the value store
    #[error("Node '{node}' failed to publish outputs: {reason}")]
    OutputPublish { node: String, reason: String },

    /// A declared run output is absent once every task has finished
    #[error("Run output '{name}' not produced")]
    MissingRunOutput { name: String },

    /// A task panicked; the panic was contained to that task
    #[error("Internal defect in node '{node}': {message}")]
    InternalDefect { node: String, message: String },

    /// A named value is absent from a value bag or the value store
    #[error("Value '{name}' not found")]
    ValueNotFound { name: String },

    /// A named value exists but does not have the requested type
    #[error("Value '{name}' is not a {expected}")]
    ValueType { name: String, expected: &'static str },
}

impl DagError {
    /// Control code a task adopts when this error ends its execution.
    ///
    /// Init failures and defects stop the job; data problems only skip
    /// the followers.
    pub fn control_code(&self) -> ControlCode {
        match self {
            Self::InputResolution { .. }
            | Self::ProcessorExecution { .. }
            | Self::OutputPublish { .. } => ControlCode::SkipFollowers,
            _ => ControlCode::StopJob,
        }
    }

    /// True for errors raised before any task is launched
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::ConfigLoad { .. }
                | Self::InvalidConfig(_)
                | Self::DuplicateOutputName { .. }
                | Self::CyclicDependency { .. }
                | Self::MissingRunInput { .. }
                | Self::UnknownProcessor { .. }
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::ConfigLoad { .. } | Self::InvalidConfig(_) => "configuration",
            Self::DuplicateOutputName { .. } | Self::CyclicDependency { .. } => "graph",
            Self::MissingRunInput { .. } | Self::MissingRunOutput { .. } => "run",
            Self::UnknownProcessor { .. } => "registry",
            Self::InputResolution { .. }
            | Self::ProcessorInit { .. }
            | Self::ProcessorExecution { .. }
            | Self::OutputPublish { .. } => "node",
            Self::InternalDefect { .. } => "defect",
            Self::ValueNotFound { .. } | Self::ValueType { .. } => "value",
        }
    }
}

/// Result type alias for convenience
pub type Result<T, E = DagError> = std::result::Result<T, E>;

/// Render an `anyhow` error with its full cause chain on one line
pub(crate) fn render_chain(err: &anyhow::Error) -> String {
    format!("{:#}", err)
}
