//! Extension registry.
//!
//! Maps the identifiers used in the `extensions:` list to constructors.
//! Applications populate it during bootstrap; the built-in security
//! extensions are available through [`ExtensionRegistry::with_builtins`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::BoxError;
use crate::extensions::{Extension, ExtensionConfig};

/// Builds an extension from its configuration section.
pub type ExtensionConstructor =
    dyn Fn(&ExtensionConfig) -> Result<Arc<dyn Extension>, BoxError> + Send + Sync;

pub(crate) struct Registration {
    pub(crate) section: String,
    pub(crate) constructor: Box<ExtensionConstructor>,
}

#[derive(Default)]
pub struct ExtensionRegistry {
    entries: HashMap<String, Registration>,
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `security_headers`, `rate_limit`, `csrf`
    /// and `auth`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::security::register_builtins(&mut registry);
        registry
    }

    /// Register `id`, reading its configuration from the top-level
    /// `section` key. A later registration under the same id replaces the
    /// earlier one.
    pub fn register<F>(&mut self, id: impl Into<String>, section: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&ExtensionConfig) -> Result<Arc<dyn Extension>, BoxError> + Send + Sync + 'static,
    {
        let id = id.into();
        let registration = Registration {
            section: section.into(),
            constructor: Box::new(constructor),
        };
        if self.entries.insert(id.clone(), registration).is_some() {
            tracing::debug!(extension = %id, "Replaced extension registration");
        }
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn get(&self, id: &str) -> Option<&Registration> {
        self.entries.get(id)
    }
}
