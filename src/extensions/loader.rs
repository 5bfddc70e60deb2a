//! Instantiates the extensions declared in configuration.
//!
//! Canonical form:
//!
//! ```yaml
//! extensions:
//!   - security_headers
//!   - csrf
//! csrf:
//!   cookie_name: csrftoken
//! ```
//!
//! The mapping form (`extensions: { csrf: { cookie_name: ... } }`) is still
//! accepted but deprecated.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde_yaml::Value;
use thiserror::Error;

use crate::config::ConfigDocument;
use crate::error::BoxError;
use crate::extensions::registry::ExtensionRegistry;
use crate::extensions::{Extension, ExtensionConfig};

/// Top-level key listing extensions.
pub const EXTENSIONS_KEY: &str = "extensions";

#[derive(Debug, Error)]
pub enum ExtensionLoadError {
    #[error("invalid `extensions` value: {reason}")]
    InvalidSpec { reason: String },

    #[error("unknown extension `{spec}` (registered: {registered})")]
    Unknown { spec: String, registered: String },

    #[error("extension `{spec}` is declared more than once")]
    Duplicate { spec: String },

    #[error("invalid configuration for extension `{spec}`: {reason}")]
    InvalidConfig { spec: String, reason: String },

    #[error("extension `{spec}` failed to start: {source}")]
    Construction {
        spec: String,
        #[source]
        source: BoxError,
    },
}

/// One entry of the `extensions` list.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionSpec {
    pub id: String,
    /// Inline configuration from the deprecated mapping form.
    pub inline: Option<Value>,
}

impl ExtensionSpec {
    /// Read the `extensions` key of a document.
    pub fn parse_all(doc: &ConfigDocument) -> Result<Vec<Self>, ExtensionLoadError> {
        let invalid = |reason: String| ExtensionLoadError::InvalidSpec { reason };

        match doc.get(EXTENSIONS_KEY) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Sequence(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(id) if !id.trim().is_empty() => Ok(ExtensionSpec {
                        id: id.trim().to_string(),
                        inline: None,
                    }),
                    other => Err(invalid(format!(
                        "entries must be non-empty strings, found {:?}",
                        other
                    ))),
                })
                .collect(),
            Some(Value::Mapping(entries)) => {
                tracing::warn!(
                    "`extensions` as a mapping is deprecated; list the ids and move their \
                     configuration to top-level sections"
                );
                entries
                    .iter()
                    .map(|(key, value)| match key {
                        Value::String(id) => Ok(ExtensionSpec {
                            id: id.trim().to_string(),
                            inline: match value {
                                Value::Null => None,
                                other => Some(other.clone()),
                            },
                        }),
                        other => Err(invalid(format!("ids must be strings, found {:?}", other))),
                    })
                    .collect()
            }
            Some(_) => Err(invalid("expected a list of extension ids".to_string())),
        }
    }
}

/// A constructed extension with the configuration it was built from.
#[derive(Clone)]
pub struct ExtensionInstance {
    pub id: String,
    pub config: ExtensionConfig,
    pub extension: Arc<dyn Extension>,
}

impl fmt::Debug for ExtensionInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionInstance")
            .field("id", &self.id)
            .field("name", &self.extension.name())
            .field("section", &self.config.section())
            .finish()
    }
}

/// Extensions in declaration order.
#[derive(Debug, Clone, Default)]
pub struct LoadedExtensions {
    instances: Vec<ExtensionInstance>,
}

impl LoadedExtensions {
    pub fn iter(&self) -> impl Iterator<Item = &ExtensionInstance> {
        self.instances.iter()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.instances.iter().map(|i| i.id.as_str()).collect()
    }
}

pub struct ExtensionLoader<'a> {
    registry: &'a ExtensionRegistry,
}

impl<'a> ExtensionLoader<'a> {
    pub fn new(registry: &'a ExtensionRegistry) -> Self {
        Self { registry }
    }

    pub fn load(&self, doc: &ConfigDocument) -> Result<LoadedExtensions, ExtensionLoadError> {
        let specs = ExtensionSpec::parse_all(doc)?;
        let mut seen = HashSet::new();
        let mut instances = Vec::with_capacity(specs.len());

        for spec in specs {
            if !seen.insert(spec.id.clone()) {
                return Err(ExtensionLoadError::Duplicate { spec: spec.id });
            }
            instances.push(self.instantiate(doc, spec)?);
        }

        tracing::info!(
            extensions = ?instances.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
            "Extensions loaded"
        );
        Ok(LoadedExtensions { instances })
    }

    fn instantiate(
        &self,
        doc: &ConfigDocument,
        spec: ExtensionSpec,
    ) -> Result<ExtensionInstance, ExtensionLoadError> {
        let registration =
            self.registry
                .get(&spec.id)
                .ok_or_else(|| ExtensionLoadError::Unknown {
                    spec: spec.id.clone(),
                    registered: self.registry.ids().join(", "),
                })?;

        let section = registration.section.as_str();
        let value = match (doc.get(section), spec.inline) {
            (Some(_), Some(_)) => {
                return Err(ExtensionLoadError::InvalidConfig {
                    spec: spec.id,
                    reason: format!(
                        "configured both inline and in the top-level `{}` section",
                        section
                    ),
                })
            }
            (Some(value), None) => value.clone(),
            (None, Some(inline)) => inline,
            (None, None) => Value::Null,
        };

        if !matches!(value, Value::Null | Value::Mapping(_)) {
            return Err(ExtensionLoadError::InvalidConfig {
                spec: spec.id,
                reason: format!("section `{}` must be a mapping", section),
            });
        }

        let config = ExtensionConfig::new(section, value);
        let extension = (registration.constructor)(&config).map_err(|source| {
            ExtensionLoadError::Construction {
                spec: spec.id.clone(),
                source,
            }
        })?;

        tracing::debug!(extension = %spec.id, section = %section, "Extension constructed");
        Ok(ExtensionInstance {
            id: spec.id,
            config,
            extension,
        })
    }
}
