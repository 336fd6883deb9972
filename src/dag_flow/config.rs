//! Run configuration: node/run specs, engine tuning, and configuration suppliers.
//!
//! Run documents are YAML with a `dag_config` root:
//!
//! ```yaml
//! dag_config:
//!   name: doubler
//!   input: [a]
//!   output: [doubled]
//!   nodes:
//!     n1:
//!       processor: double
//!       input: { a: a }
//!       output: { doubled: b }
//! ```

use dashmap::DashMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error};

use crate::core::errors::{DagError, Result};
use crate::core::value::Values;

/// Configuration of one processing node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Filled from the node's key in the `nodes` mapping
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Vec<String>,
    /// Carried for callers; dependency failures propagate regardless of it
    #[serde(default)]
    pub critical: bool,
    pub processor: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub params: Values,
    /// local input name -> value-store name to read
    #[serde(default, deserialize_with = "null_as_default")]
    pub input: BTreeMap<String, String>,
    /// value-store name to write -> local output name produced by the processor
    #[serde(default, deserialize_with = "null_as_default")]
    pub output: BTreeMap<String, String>,
}

impl NodeSpec {
    pub fn new(name: impl Into<String>, processor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            processor: processor.into(),
            ..Default::default()
        }
    }

    /// Read value-store `store_name` as local input `local`
    pub fn with_input(mut self, local: impl Into<String>, store_name: impl Into<String>) -> Self {
        self.input.insert(local.into(), store_name.into());
        self
    }

    /// Publish local output `local` as value-store `store_name`
    pub fn with_output(mut self, store_name: impl Into<String>, local: impl Into<String>) -> Self {
        self.output.insert(store_name.into(), local.into());
        self
    }

    pub fn with_params(mut self, params: Values) -> Self {
        self.params = params;
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }
}

/// Configuration of a whole run: declared inputs/outputs and its nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSpec {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub input: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub output: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub nodes: BTreeMap<String, NodeSpec>,
    /// Per-run engine overrides, merged over the engine default
    #[serde(default)]
    pub config: Option<EngineConfig>,
}

impl RunSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_inputs<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.input = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outputs<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.output = names.into_iter().map(Into::into).collect();
        self
    }

    /// Add a node keyed by its name
    pub fn with_node(mut self, node: NodeSpec) -> Self {
        self.nodes.insert(node.name.clone(), node);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Names of nodes carrying `label`, sorted
    pub fn nodes_with_label(&self, label: &str) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|node| node.labels.iter().any(|l| l == label))
            .map(|node| node.name.as_str())
            .collect()
    }
}

/// Engine tuning shared by all runs, optionally overridden per run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Deadline after which the run's cancellation signal fires
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
    /// Maximum number of processors executing at once (unbounded if unset)
    #[serde(default)]
    pub max_parallel_nodes: Option<usize>,
}

impl EngineConfig {
    /// Validates configuration values
    pub fn validate(&self) -> Result<()> {
        if let Some(timeout) = self.run_timeout_secs {
            if timeout == 0 {
                return Err(DagError::InvalidConfig(
                    "run_timeout_secs must be greater than 0".into(),
                ));
            }
            if timeout > 86400 {
                return Err(DagError::InvalidConfig(
                    "run_timeout_secs cannot exceed 24 hours".into(),
                ));
            }
        }

        if self.max_parallel_nodes == Some(0) {
            return Err(DagError::InvalidConfig(
                "max_parallel_nodes must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Merges two configurations, with `override_with` taking precedence
    pub fn merge(base: &Self, override_with: &Self) -> Result<Self> {
        let merged = Self {
            run_timeout_secs: override_with.run_timeout_secs.or(base.run_timeout_secs),
            max_parallel_nodes: override_with.max_parallel_nodes.or(base.max_parallel_nodes),
        };
        merged.validate()?;
        Ok(merged)
    }

    pub fn from_yaml_str(data: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(data)
            .map_err(|e| DagError::InvalidConfig(format!("engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Deserialize)]
struct ConfigDocument {
    dag_config: RunSpec,
}

/// Parse a YAML run document; `source` names it in error messages
pub fn parse_config(source: &str, data: &str) -> Result<RunSpec> {
    let document: ConfigDocument = serde_yaml::from_str(data).map_err(|e| {
        error!(source, error = %e, "parse config data error");
        DagError::ConfigLoad {
            key: source.to_string(),
            message: e.to_string(),
        }
    })?;

    let mut spec = document.dag_config;
    for (name, node) in spec.nodes.iter_mut() {
        node.name = name.clone();
    }
    if let Some(config) = &spec.config {
        config.validate()?;
    }
    Ok(spec)
}

/// Configuration supplier: resolves an opaque run identifier to a run spec
pub trait ConfigManager: Send + Sync {
    fn get_config(&self, key: &str) -> Result<Arc<RunSpec>>;
}

/// In-memory supplier for specs built in code
#[derive(Debug, Default, Clone)]
pub struct StaticConfigManager {
    specs: HashMap<String, Arc<RunSpec>>,
}

impl StaticConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, spec: RunSpec) {
        self.specs.insert(key.into(), Arc::new(spec));
    }

    pub fn with(mut self, key: impl Into<String>, spec: RunSpec) -> Self {
        self.insert(key, spec);
        self
    }
}

impl ConfigManager for StaticConfigManager {
    fn get_config(&self, key: &str) -> Result<Arc<RunSpec>> {
        self.specs.get(key).cloned().ok_or_else(|| DagError::ConfigLoad {
            key: key.to_string(),
            message: "no such run".to_string(),
        })
    }
}

/// Loads `<dir>/<key>.yaml` (or `.yml`) and caches the parsed spec per key
#[derive(Debug)]
pub struct YamlConfigManager {
    dir: PathBuf,
    cache: DashMap<String, Arc<RunSpec>>,
}

impl YamlConfigManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: DashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Drop a cached spec so the next lookup re-reads the file
    pub fn invalidate(&self, key: &str) {
        self.cache.remove(key);
    }

    fn locate(&self, key: &str) -> Option<PathBuf> {
        ["yaml", "yml"]
            .iter()
            .map(|ext| self.dir.join(format!("{}.{}", key, ext)))
            .find(|path| path.is_file())
    }

    fn load(&self, key: &str) -> Result<RunSpec> {
        if key.is_empty() || key.contains(['/', '\\']) || key.contains("..") {
            return Err(DagError::ConfigLoad {
                key: key.to_string(),
                message: "run identifier must be a plain file stem".to_string(),
            });
        }
        let path = self.locate(key).ok_or_else(|| DagError::ConfigLoad {
            key: key.to_string(),
            message: format!("no config file in {}", self.dir.display()),
        })?;
        let data = std::fs::read_to_string(&path).map_err(|e| DagError::ConfigLoad {
            key: key.to_string(),
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        debug!(key, path = %path.display(), "loaded run config");
        parse_config(key, &data)
    }
}

impl ConfigManager for YamlConfigManager {
    fn get_config(&self, key: &str) -> Result<Arc<RunSpec>> {
        if let Some(spec) = self.cache.get(key) {
            return Ok(spec.clone());
        }
        let spec = Arc::new(self.load(key)?);
        self.cache.insert(key.to_string(), spec.clone());
        Ok(spec)
    }
}

/// Treat an explicit YAML `null` like an absent field
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
