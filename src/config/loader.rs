//! Configuration loading from disk.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_yaml::{Mapping, Value};
use thiserror::Error;

use crate::config::document::ConfigDocument;
use crate::config::env_interpolation::{interpolate_mapping, process_env, EnvLookup};
use crate::config::validation::ValidationError;

/// Reserved top-level key listing files to merge.
pub const INCLUDE_KEY: &str = "include";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed YAML in {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{origin}: top-level document must be a mapping")]
    NotAMapping { origin: String },

    #[error("{origin}: top-level key {key} is not a string")]
    InvalidKey { origin: String, key: String },

    #[error("{origin}: invalid `include`: {reason}")]
    InvalidInclude { origin: String, reason: String },

    #[error("{} (included from {included_from}) does not exist", .path.display())]
    MissingInclude { path: PathBuf, included_from: String },

    #[error("include cycle detected at {}", .path.display())]
    IncludeCycle { path: PathBuf },

    #[error("key `{key}` defined in both {first} and {second}")]
    Conflict {
        key: String,
        first: String,
        second: String,
    },

    #[error("environment variable `{name}` required by `{key_path}` is not set")]
    MissingVariable { name: String, key_path: String },

    #[error("cannot interpolate `{key_path}`: {reason}")]
    Interpolation { key_path: String, reason: String },

    #[error("invalid `{key}` section (from {origin}): {source}")]
    InvalidSection {
        key: String,
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Accumulated top-level keys and the source that defined each one.
#[derive(Debug, Default)]
struct Merged {
    values: Mapping,
    origins: BTreeMap<String, String>,
}

impl Merged {
    fn from_own(origin: &str, own: Mapping) -> Result<Self, ConfigError> {
        let mut merged = Merged::default();
        for (key, value) in own {
            let name = key_name(origin, &key)?;
            merged.origins.insert(name, origin.to_string());
            merged.values.insert(key, value);
        }
        Ok(merged)
    }

    /// Strict merge: any key already present is a conflict.
    fn absorb(&mut self, other: Merged) -> Result<(), ConfigError> {
        let Merged { values, mut origins } = other;
        for (key, value) in values {
            let name = key.as_str().unwrap_or_default().to_string();
            let second = origins.remove(&name).unwrap_or_default();
            if let Some(first) = self.origins.get(&name) {
                return Err(ConfigError::Conflict {
                    key: name,
                    first: first.clone(),
                    second,
                });
            }
            self.origins.insert(name, second);
            self.values.insert(key, value);
        }
        Ok(())
    }

    /// Override merge: keys from `top` replace existing ones.
    fn overlay(&mut self, top: Merged) {
        let Merged { values, mut origins } = top;
        for (key, value) in values {
            let name = key.as_str().unwrap_or_default().to_string();
            if let Some(previous) = self.origins.get(&name) {
                tracing::debug!(key = %name, replaced = %previous, "Environment override");
            }
            let origin = origins.remove(&name).unwrap_or_default();
            self.origins.insert(name, origin);
            self.values.insert(key, value);
        }
    }
}

/// Files visited while resolving one document's includes.
#[derive(Debug, Default)]
struct IncludeWalk {
    /// Files currently being loaded, outermost first.
    stack: Vec<PathBuf>,
    /// Files already merged; a file reached again through another include
    /// path contributes nothing the second time.
    merged: HashSet<PathBuf>,
}

impl IncludeWalk {
    fn starting_at(canonical: PathBuf) -> Self {
        let mut walk = Self::default();
        walk.merged.insert(canonical.clone());
        walk.stack.push(canonical);
        walk
    }
}

/// Loads YAML documents, resolving includes and environment variables.
#[derive(Clone)]
pub struct ConfigLoader {
    env: Arc<EnvLookup>,
}

impl std::fmt::Debug for ConfigLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigLoader").finish_non_exhaustive()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Loader reading variables from the process environment.
    pub fn new() -> Self {
        Self { env: process_env() }
    }

    /// Loader with a custom variable lookup.
    pub fn with_env<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            env: Arc::new(lookup),
        }
    }

    pub fn with_shared_env(env: Arc<EnvLookup>) -> Self {
        Self { env }
    }

    /// Load a document and everything it includes. Every key may be
    /// defined by exactly one file.
    pub fn load(&self, path: &Path) -> Result<ConfigDocument, ConfigError> {
        let mut walk = IncludeWalk::default();
        let merged = self.load_tree(path, &mut walk)?;
        self.finish(merged)
    }

    /// Load an environment override file. Its own keys replace keys from
    /// the files it includes; `base` is included first when the override
    /// does not list it already.
    pub fn load_override(
        &self,
        path: &Path,
        base: Option<&Path>,
    ) -> Result<ConfigDocument, ConfigError> {
        let canonical = canonical(path)?;
        let origin = path.display().to_string();
        let (own, mut includes) = read_document(&canonical, &origin)?;

        if let Some(base) = base {
            let base_canonical = canonical_or_raw(base);
            if !includes.iter().any(|p| canonical_or_raw(p) == base_canonical) {
                includes.insert(0, base.to_path_buf());
            }
        }

        let mut walk = IncludeWalk::starting_at(canonical);
        let mut merged = Merged::default();
        for include in includes {
            merged.absorb(self.load_include(&include, &origin, &mut walk)?)?;
        }
        merged.overlay(Merged::from_own(&origin, own)?);
        self.finish(merged)
    }

    /// Load a document held in memory. Includes resolve against the
    /// current directory.
    pub fn load_str(&self, origin: &str, yaml: &str) -> Result<ConfigDocument, ConfigError> {
        let mut own = parse_document(origin, yaml)?;
        let includes = take_includes(origin, Path::new("."), &mut own)?;

        let mut walk = IncludeWalk::default();
        let mut merged = Merged::from_own(origin, own)?;
        for include in includes {
            merged.absorb(self.load_include(&include, origin, &mut walk)?)?;
        }
        self.finish(merged)
    }

    fn load_tree(&self, path: &Path, walk: &mut IncludeWalk) -> Result<Merged, ConfigError> {
        let canonical = canonical(path)?;
        if walk.stack.contains(&canonical) {
            return Err(ConfigError::IncludeCycle { path: canonical });
        }
        if !walk.merged.insert(canonical.clone()) {
            tracing::debug!(file = %path.display(), "Configuration file already merged, skipping");
            return Ok(Merged::default());
        }

        let origin = path.display().to_string();
        let (own, includes) = read_document(&canonical, &origin)?;
        tracing::debug!(file = %origin, includes = includes.len(), "Loading configuration file");

        walk.stack.push(canonical);
        let mut merged = Merged::from_own(&origin, own)?;
        for include in includes {
            merged.absorb(self.load_include(&include, &origin, walk)?)?;
        }
        walk.stack.pop();
        Ok(merged)
    }

    fn load_include(
        &self,
        include: &Path,
        included_from: &str,
        walk: &mut IncludeWalk,
    ) -> Result<Merged, ConfigError> {
        if !include.exists() {
            return Err(ConfigError::MissingInclude {
                path: include.to_path_buf(),
                included_from: included_from.to_string(),
            });
        }
        self.load_tree(include, walk)
    }

    fn finish(&self, merged: Merged) -> Result<ConfigDocument, ConfigError> {
        let Merged {
            mut values,
            origins,
        } = merged;
        interpolate_mapping(&mut values, self.env.as_ref())?;
        Ok(ConfigDocument::from_parts(values, origins))
    }
}

fn canonical(path: &Path) -> Result<PathBuf, ConfigError> {
    fs::canonicalize(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn canonical_or_raw(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Read a file and split off its include list.
fn read_document(path: &Path, origin: &str) -> Result<(Mapping, Vec<PathBuf>), ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut own = parse_document(origin, &content)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let includes = take_includes(origin, dir, &mut own)?;
    Ok((own, includes))
}

fn parse_document(origin: &str, content: &str) -> Result<Mapping, ConfigError> {
    let value: Value = serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
        origin: origin.to_string(),
        source,
    })?;
    match value {
        Value::Null => Ok(Mapping::new()),
        Value::Mapping(mapping) => Ok(mapping),
        _ => Err(ConfigError::NotAMapping {
            origin: origin.to_string(),
        }),
    }
}

fn take_includes(origin: &str, dir: &Path, own: &mut Mapping) -> Result<Vec<PathBuf>, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidInclude {
        origin: origin.to_string(),
        reason: reason.to_string(),
    };

    let entries = match own.shift_remove(INCLUDE_KEY) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::String(single)) => vec![single],
        Some(Value::Sequence(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                _ => Err(invalid("entries must be strings")),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(invalid("expected a list of file paths")),
    };

    entries
        .into_iter()
        .map(|entry| {
            if entry.trim().is_empty() {
                Err(invalid("empty path"))
            } else {
                Ok(dir.join(entry))
            }
        })
        .collect()
}

fn key_name(origin: &str, key: &Value) -> Result<String, ConfigError> {
    match key {
        Value::String(s) => Ok(s.clone()),
        other => Err(ConfigError::InvalidKey {
            origin: origin.to_string(),
            key: format!("{:?}", other),
        }),
    }
}
