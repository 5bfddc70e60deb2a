//! Extension subsystem.
//!
//! # Data Flow
//! ```text
//! Bootstrap:
//!     ExtensionRegistry (id → constructor, populated by the application)
//!
//! Startup:
//!     `extensions:` list in ConfigDocument
//!     → loader.rs (look up ids, hand each constructor its config section)
//!     → LoadedExtensions (declaration order, process lifetime)
//!
//! Route registration:
//!     composer.rs asks each extension `applies(route, config)`
//!     → `wrap(handler, route, config)` for those that do
//!     → composed MethodRouter handed to axum
//! ```
//!
//! # Design Decisions
//! - No runtime reflection: ids resolve through an explicit registry
//! - The first declared extension wraps outermost and sees requests first
//! - Extensions own any per-request state they need

pub mod composer;
pub mod loader;
pub mod registry;

pub use composer::{ComposeError, ComposedRoute, MiddlewareComposer};
pub use loader::{ExtensionInstance, ExtensionLoadError, ExtensionLoader, ExtensionSpec, LoadedExtensions};
pub use registry::ExtensionRegistry;

use axum::http::Method;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use thiserror::Error;

use crate::http::RouterKind;
use crate::routing::EffectiveRouteConfig;

/// A route handler as registered with axum.
pub type RouteHandler = axum::routing::MethodRouter;

/// What an extension knows about the route it may wrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub path: String,
    pub method: Method,
    pub kind: RouterKind,
}

impl RouteInfo {
    pub fn new(path: impl Into<String>, method: Method, kind: RouterKind) -> Self {
        Self {
            path: path.into(),
            method,
            kind,
        }
    }

    /// Methods served by this registration.
    pub fn methods(&self) -> &[Method] {
        std::slice::from_ref(&self.method)
    }
}

/// A pluggable component that contributes middleware to routes.
pub trait Extension: Send + Sync + 'static {
    /// Name used in logs and route listings.
    fn name(&self) -> &str;

    /// Whether this extension should wrap the given route.
    fn applies(&self, route: &RouteInfo, config: &EffectiveRouteConfig) -> bool;

    /// Wrap `handler` with this extension's middleware.
    fn wrap(
        &self,
        handler: RouteHandler,
        route: &RouteInfo,
        config: &EffectiveRouteConfig,
    ) -> Result<RouteHandler, ExtensionError>;
}

/// Route-level failure raised while wrapping a handler.
#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("invalid `{key}` settings: {source}")]
    InvalidRouteConfig {
        key: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{0}")]
    Invalid(String),
}

/// The configuration section handed to an extension constructor.
#[derive(Debug, Clone, Default)]
pub struct ExtensionConfig {
    section: String,
    value: Value,
}

impl ExtensionConfig {
    pub fn new(section: impl Into<String>, value: Value) -> Self {
        Self {
            section: section.into(),
            value,
        }
    }

    /// Name of the top-level key this section came from.
    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn is_empty(&self) -> bool {
        match &self.value {
            Value::Null => true,
            Value::Mapping(mapping) => mapping.is_empty(),
            _ => false,
        }
    }

    /// Deserialize the section, an absent section meaning `T::default()`.
    pub fn deserialize<T>(&self) -> Result<T, serde_yaml::Error>
    where
        T: DeserializeOwned + Default,
    {
        match &self.value {
            Value::Null => Ok(T::default()),
            value => serde_yaml::from_value(value.clone()),
        }
    }
}

/// Overlay a route-level mapping onto an extension-level one.
///
/// Non-mapping route values (`true`, `false`, null) leave `base` untouched.
pub fn merge_route_settings(base: &Value, route: Option<&Value>) -> Value {
    let mut merged = match base {
        Value::Mapping(mapping) => mapping.clone(),
        _ => Mapping::new(),
    };
    if let Some(Value::Mapping(overrides)) = route {
        crate::routing::resolver::overlay(&mut merged, overrides);
    }
    Value::Mapping(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        limit: u32,
        name: String,
    }

    #[test]
    fn test_absent_section_uses_default() {
        let config = ExtensionConfig::new("sample", Value::Null);
        assert!(config.is_empty());
        assert_eq!(config.deserialize::<Sample>().unwrap(), Sample::default());
    }

    #[test]
    fn test_route_settings_overlay() {
        let base: Value = serde_yaml::from_str("limit: 5\nname: base\n").unwrap();
        let route: Value = serde_yaml::from_str("limit: 1\n").unwrap();

        let merged = merge_route_settings(&base, Some(&route));
        let sample: Sample = serde_yaml::from_value(merged).unwrap();
        assert_eq!(sample, Sample { limit: 1, name: "base".into() });

        let untouched = merge_route_settings(&base, Some(&Value::Bool(true)));
        assert_eq!(untouched, base);
    }
}
