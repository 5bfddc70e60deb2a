//! The merged configuration document.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};

use crate::config::loader::ConfigError;

/// Ordered top-level mapping produced by the loader.
///
/// Each top-level key remembers the source it came from so conflicts and
/// bad sections can be reported against the right file.
#[derive(Debug, Clone, Default)]
pub struct ConfigDocument {
    values: Mapping,
    origins: BTreeMap<String, String>,
}

impl ConfigDocument {
    pub(crate) fn from_parts(values: Mapping, origins: BTreeMap<String, String>) -> Self {
        Self { values, origins }
    }

    /// Look up a top-level key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Top-level keys in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().filter_map(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Source file (or inline source name) that defined `key`.
    pub fn origin(&self, key: &str) -> Option<&str> {
        self.origins.get(key).map(String::as_str)
    }

    pub fn values(&self) -> &Mapping {
        &self.values
    }

    /// Deserialize a top-level section, falling back to `T::default()` when
    /// the key is absent or null.
    pub fn section<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: DeserializeOwned + Default,
    {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(T::default()),
            Some(value) => serde_yaml::from_value(value.clone()).map_err(|source| {
                ConfigError::InvalidSection {
                    key: key.to_string(),
                    origin: self.origin(key).unwrap_or("<unknown>").to_string(),
                    source,
                }
            }),
        }
    }

    /// Render the document back to YAML.
    pub fn to_yaml_string(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self.values)
    }
}
