//! Run-scoped value store shared by every task of one run.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::core::errors::{DagError, Result};
use crate::core::value::Values;
use crate::processor::ProcessorRegistry;

/// Holds the run inputs and every published node output.
///
/// `update` and `read` are atomic with respect to each other: a read never
/// observes half of an update. The lock is never held across an await.
pub struct RunContext {
    values: RwLock<HashMap<String, Value>>,
    registry: Arc<dyn ProcessorRegistry>,
    limiter: Option<Arc<Semaphore>>,
}

impl RunContext {
    pub fn new(registry: Arc<dyn ProcessorRegistry>) -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            registry,
            limiter: None,
        }
    }

    /// Bound the number of processors executing at once
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.limiter = Some(Arc::new(Semaphore::new(max_parallel)));
        self
    }

    /// Merge all entries; an existing name is overwritten
    pub fn update(&self, values: Values) {
        let mut store = self.values.write();
        store.extend(values);
    }

    /// Read the named values, failing on the first missing name
    pub fn read<S: AsRef<str>>(&self, names: &[S]) -> Result<Values> {
        let store = self.values.read();
        let mut result = Values::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let value = store.get(name).ok_or_else(|| DagError::ValueNotFound {
                name: name.to_string(),
            })?;
            result.insert(name, value.clone());
        }
        Ok(result)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Copy of everything currently stored
    pub fn snapshot(&self) -> Values {
        Values::from(self.values.read().clone())
    }

    pub fn registry(&self) -> &Arc<dyn ProcessorRegistry> {
        &self.registry
    }

    pub(crate) fn limiter(&self) -> Option<&Arc<Semaphore>> {
        self.limiter.as_ref()
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("values", &self.len())
            .field("limited", &self.limiter.is_some())
            .finish()
    }
}
