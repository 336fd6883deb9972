// Shared infrastructure used by graph construction and execution

pub mod errors;
pub mod logging;
pub mod sync;
pub mod value;

pub use errors::{DagError, Result};
pub use logging::{init_tracing, LogConfig, LogFormat};
pub use sync::CountdownLatch;
pub use value::Values;
