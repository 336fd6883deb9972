//! Node processor contract and the registry that instantiates processors by name

pub mod handler;
pub mod registry;

pub use handler::*;
pub use registry::*;
