//! Registry resolving processor identifiers to fresh processor instances

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::handler::NodeProcessor;

/// Creates a new processor instance per task
pub type ProcessorFactory = Arc<dyn Fn() -> Box<dyn NodeProcessor> + Send + Sync>;

/// Resolves a processor identifier to a processor instance
pub trait ProcessorRegistry: Send + Sync {
    /// Returns `None` when the identifier is unknown
    fn create(&self, processor: &str) -> Option<Box<dyn NodeProcessor>>;
}

/// Registry for node processors backed by named factories
#[derive(Clone)]
pub struct HandlerRegistry {
    factories: Arc<RwLock<HashMap<String, ProcessorFactory>>>,
}

impl HandlerRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a factory; a later registration under the same name replaces it
    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn NodeProcessor> + Send + Sync + 'static,
    {
        let mut factories = self.factories.write();
        factories.insert(name.into(), Arc::new(factory));
    }

    /// Register a processor type built with `Default::default()`
    pub fn register_default<P>(&self, name: impl Into<String>)
    where
        P: NodeProcessor + Default + 'static,
    {
        self.register(name, || Box::new(P::default()));
    }

    /// Check if a processor is registered
    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    /// List all registered processor names, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessorRegistry for HandlerRegistry {
    fn create(&self, processor: &str) -> Option<Box<dyn NodeProcessor>> {
        // Clone the factory out so the lock is not held while it runs.
        let factory = self.factories.read().get(processor).cloned()?;
        Some(factory())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::handler::EchoProcessor;

    #[test]
    fn test_register_and_create() {
        let registry = HandlerRegistry::new();
        registry.register_default::<EchoProcessor>("echo");

        assert!(registry.contains("echo"));
        assert!(registry.create("echo").is_some());
        assert!(registry.create("missing").is_none());
        assert_eq!(registry.list(), vec!["echo".to_string()]);
    }

    #[test]
    fn test_clones_share_registrations() {
        let registry = HandlerRegistry::new();
        let clone = registry.clone();
        clone.register("echo", || Box::new(EchoProcessor));
        assert!(registry.contains("echo"));
    }
}
