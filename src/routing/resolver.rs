//! Per-route configuration resolution.
//!
//! ```yaml
//! routes:
//!   defaults:
//!     rate_limit: { requests_per_second: 20 }
//!   patterns:
//!     /api/*:
//!       csrf: false
//!     /api/users:
//!       GET:
//!         rate_limit: { requests_per_second: 5 }
//! ```
//!
//! Upper-case HTTP method keys inside a pattern block hold method-specific
//! overrides; they inherit the block's other keys.

use std::collections::HashMap;

use axum::http::Method;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};

use crate::config::ConfigDocument;
use crate::routing::pattern::RoutePattern;
use crate::routing::RouteConfigError;

/// Top-level key holding the route table.
pub const ROUTES_KEY: &str = "routes";

const METHOD_KEYS: [&str; 9] = [
    "GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH",
];

#[derive(Debug, Clone)]
struct RouteEntry {
    pattern: RoutePattern,
    method: Option<Method>,
    overrides: Mapping,
}

impl RouteEntry {
    /// Higher ranks win; equal ranks fall back to declaration order.
    fn rank(&self) -> (bool, bool, usize) {
        (
            self.pattern.is_exact(),
            self.method.is_some(),
            self.pattern.specificity(),
        )
    }

    fn matches(&self, path: &str, method: &Method) -> bool {
        self.pattern.matches(path) && self.method.as_ref().map_or(true, |m| m == method)
    }
}

/// Compiled route override table.
#[derive(Debug, Clone, Default)]
pub struct RouteConfigResolver {
    defaults: Mapping,
    entries: Vec<RouteEntry>,
}

impl RouteConfigResolver {
    pub fn from_document(doc: &ConfigDocument) -> Result<Self, RouteConfigError> {
        Self::from_value(doc.get(ROUTES_KEY))
    }

    pub fn from_value(routes: Option<&Value>) -> Result<Self, RouteConfigError> {
        let routes = match routes {
            None | Some(Value::Null) => return Ok(Self::default()),
            Some(Value::Mapping(routes)) => routes,
            Some(_) => return Err(invalid(ROUTES_KEY, "expected a mapping")),
        };

        let mut resolver = Self::default();
        for (key, value) in routes {
            match key.as_str() {
                Some("defaults") => resolver.defaults = expect_mapping(value, "routes.defaults")?,
                Some("patterns") => resolver.entries = compile_patterns(value)?,
                _ => {
                    return Err(invalid(
                        ROUTES_KEY,
                        &format!("unknown key {:?}, expected `defaults` or `patterns`", key),
                    ))
                }
            }
        }
        Ok(resolver)
    }

    /// Effective configuration for one route path and method.
    pub fn resolve(&self, path: &str, method: &Method) -> EffectiveRouteConfig {
        let mut best: Option<&RouteEntry> = None;
        for entry in self.entries.iter().filter(|e| e.matches(path, method)) {
            match best {
                Some(current) if current.rank() >= entry.rank() => {}
                _ => best = Some(entry),
            }
        }

        let mut values = self.defaults.clone();
        let matched = best.map(|entry| {
            overlay(&mut values, &entry.overrides);
            MatchedPattern {
                pattern: entry.pattern.to_string(),
                method: entry.method.clone(),
            }
        });

        EffectiveRouteConfig { values, matched }
    }

    pub fn defaults(&self) -> &Mapping {
        &self.defaults
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn compile_patterns(value: &Value) -> Result<Vec<RouteEntry>, RouteConfigError> {
    let patterns = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Mapping(patterns) => patterns,
        _ => return Err(invalid("routes.patterns", "expected a mapping of pattern to overrides")),
    };

    let mut entries = Vec::new();
    let mut declared: HashMap<(RoutePattern, Option<Method>), String> = HashMap::new();

    for (key, block) in patterns {
        let raw = key
            .as_str()
            .ok_or_else(|| invalid("routes.patterns", &format!("pattern {:?} is not a string", key)))?;
        let pattern = RoutePattern::parse(raw)?;
        let location = format!("routes.patterns.{}", raw);
        let block = expect_mapping(block, &location)?;

        let mut agnostic = Mapping::new();
        let mut per_method = Vec::new();
        for (name, value) in block {
            let method_key = name
                .as_str()
                .filter(|n| METHOD_KEYS.contains(n))
                .map(str::to_string);
            match method_key {
                Some(method) => {
                    let method_location = format!("{}.{}", location, method);
                    let overrides = expect_mapping(&value, &method_location)?;
                    let method = Method::from_bytes(method.as_bytes())
                        .map_err(|e| invalid(&method_location, &e.to_string()))?;
                    per_method.push((method, overrides));
                }
                None => {
                    agnostic.insert(name, value);
                }
            }
        }

        let mut push = |method: Option<Method>, overrides: Mapping| {
            let slot = (pattern.clone(), method.clone());
            if let Some(first) = declared.get(&slot) {
                return Err(RouteConfigError::Ambiguous {
                    pattern: pattern.to_string(),
                    method: method.map(|m| m.to_string()),
                    first: first.clone(),
                    second: raw.to_string(),
                });
            }
            declared.insert(slot, raw.to_string());
            entries.push(RouteEntry {
                pattern: pattern.clone(),
                method,
                overrides,
            });
            Ok(())
        };

        for (method, overrides) in per_method {
            let mut merged = agnostic.clone();
            overlay(&mut merged, &overrides);
            push(Some(method), merged)?;
        }
        push(None, agnostic)?;
    }

    Ok(entries)
}

fn expect_mapping(value: &Value, location: &str) -> Result<Mapping, RouteConfigError> {
    match value {
        Value::Null => Ok(Mapping::new()),
        Value::Mapping(mapping) => Ok(mapping.clone()),
        _ => Err(invalid(location, "expected a mapping")),
    }
}

fn invalid(location: &str, reason: &str) -> RouteConfigError {
    RouteConfigError::InvalidOverrides {
        location: location.to_string(),
        reason: reason.to_string(),
    }
}

/// Shallow merge: top-level keys of `overrides` replace those in `base`.
pub fn overlay(base: &mut Mapping, overrides: &Mapping) {
    for (key, value) in overrides {
        base.insert(key.clone(), value.clone());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MatchedPattern {
    pattern: String,
    method: Option<Method>,
}

/// Route configuration after defaults and the winning pattern are merged.
///
/// Computed once when a route is registered and captured by its handler.
#[derive(Debug, Clone, Default)]
pub struct EffectiveRouteConfig {
    values: Mapping,
    matched: Option<MatchedPattern>,
}

impl EffectiveRouteConfig {
    pub fn from_mapping(values: Mapping) -> Self {
        Self {
            values,
            matched: None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn values(&self) -> &Mapping {
        &self.values
    }

    /// Pattern that supplied the overrides, if any.
    pub fn matched_pattern(&self) -> Option<&str> {
        self.matched.as_ref().map(|m| m.pattern.as_str())
    }

    /// Method of the winning entry when it was method-specific.
    pub fn matched_method(&self) -> Option<&Method> {
        self.matched.as_ref().and_then(|m| m.method.as_ref())
    }

    /// `key: false` or `key: { enabled: false }`.
    pub fn is_disabled(&self, key: &str) -> bool {
        match self.values.get(key) {
            Some(Value::Bool(false)) => true,
            Some(Value::Mapping(section)) => {
                matches!(section.get("enabled"), Some(Value::Bool(false)))
            }
            _ => false,
        }
    }

    /// Deserialize a mapping section. Booleans and absence yield `None`.
    pub fn section<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_yaml::Error> {
        match self.values.get(key) {
            Some(value @ Value::Mapping(_)) => serde_yaml::from_value(value.clone()).map(Some),
            Some(Value::Bool(_)) | Some(Value::Null) | None => Ok(None),
            Some(other) => serde_yaml::from_value(other.clone()).map(Some),
        }
    }
}
