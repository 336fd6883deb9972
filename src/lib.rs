//! In-process DAG execution engine.
//!
//! A run is described by a [`RunSpec`]: named nodes, each bound to a
//! processor, reading values from and writing values to a run-scoped store.
//! Dependencies are inferred from those value names. Every node runs as its
//! own tokio task, starting as soon as all of its producers have finished,
//! and failures propagate downstream as control codes.
//!
//! ```no_run
//! use std::sync::Arc;
//! use dagrun::{Engine, EchoProcessor, HandlerRegistry, Values, YamlConfigManager};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> dagrun::Result<()> {
//! let registry = HandlerRegistry::new();
//! registry.register_default::<EchoProcessor>("echo");
//! let engine = Engine::new(
//!     Arc::new(YamlConfigManager::new("./dags")),
//!     Arc::new(registry),
//! );
//! let _outputs = engine
//!     .run("relay", CancellationToken::new(), Values::new().with("a", 1))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod dag_flow;
pub mod processor;

pub use crate::core::errors::{DagError, Result};
pub use crate::core::logging::{init_tracing, LogConfig, LogFormat};
pub use crate::core::value::Values;
pub use dag_flow::*;
pub use processor::{EchoProcessor, HandlerRegistry, NodeProcessor, ProcessorFactory, ProcessorRegistry};
