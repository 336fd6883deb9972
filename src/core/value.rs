//! Named value bags passed between the engine and node processors.
//!
//! Values are dynamically typed `serde_json::Value`s; accessors are fallible
//! and report the offending name.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::errors::{DagError, Result};

/// A name → value mapping (parameters, processor inputs/outputs, run inputs/outputs)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(HashMap<String, Value>);

impl Values {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(HashMap::with_capacity(capacity))
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(name.into(), value.into())
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    /// Get a value or fail with `ValueNotFound`
    pub fn require(&self, name: &str) -> Result<&Value> {
        self.0.get(name).ok_or_else(|| DagError::ValueNotFound {
            name: name.to_string(),
        })
    }

    pub fn get_i64(&self, name: &str) -> Result<i64> {
        self.require(name)?
            .as_i64()
            .ok_or_else(|| type_error(name, "integer"))
    }

    pub fn get_f64(&self, name: &str) -> Result<f64> {
        self.require(name)?
            .as_f64()
            .ok_or_else(|| type_error(name, "number"))
    }

    pub fn get_bool(&self, name: &str) -> Result<bool> {
        self.require(name)?
            .as_bool()
            .ok_or_else(|| type_error(name, "boolean"))
    }

    pub fn get_str(&self, name: &str) -> Result<&str> {
        self.require(name)?
            .as_str()
            .ok_or_else(|| type_error(name, "string"))
    }

    /// Deserialize a value into any `DeserializeOwned` type
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self.require(name)?.clone();
        serde_json::from_value(value).map_err(|_| type_error(name, std::any::type_name::<T>()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn into_inner(self) -> HashMap<String, Value> {
        self.0
    }
}

fn type_error(name: &str, expected: &'static str) -> DagError {
    DagError::ValueType {
        name: name.to_string(),
        expected,
    }
}

impl From<HashMap<String, Value>> for Values {
    fn from(map: HashMap<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Values {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl IntoIterator for Values {
    type Item = (String, Value);
    type IntoIter = std::collections::hash_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Extend<(String, Value)> for Values {
    fn extend<I: IntoIterator<Item = (String, Value)>>(&mut self, iter: I) {
        self.0.extend(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_accessors() {
        let values = Values::new()
            .with("count", 3)
            .with("ratio", 0.5)
            .with("name", "n1")
            .with("enabled", true);

        assert_eq!(values.get_i64("count").unwrap(), 3);
        assert_eq!(values.get_f64("ratio").unwrap(), 0.5);
        assert_eq!(values.get_str("name").unwrap(), "n1");
        assert!(values.get_bool("enabled").unwrap());
    }

    #[test]
    fn test_missing_and_mistyped_values() {
        let values = Values::new().with("name", "n1");

        assert!(matches!(
            values.get_i64("absent"),
            Err(DagError::ValueNotFound { name }) if name == "absent"
        ));
        assert!(matches!(
            values.get_i64("name"),
            Err(DagError::ValueType { expected: "integer", .. })
        ));
    }

    #[test]
    fn test_get_as_deserializes() {
        let values = Values::new().with("list", json!([1, 2, 3]));
        let list: Vec<u32> = values.get_as("list").unwrap();
        assert_eq!(list, vec![1, 2, 3]);
        assert!(values.get_as::<String>("list").is_err());
    }

    #[test]
    fn test_deserializes_from_yaml_mapping() {
        let values: Values = serde_yaml::from_str("factor: 2\nlabel: x\n").unwrap();
        assert_eq!(values.get_i64("factor").unwrap(), 2);
        assert_eq!(values.get_str("label").unwrap(), "x");
    }
}
