//! Environment variable interpolation for configuration values.
//!
//! Supported syntax inside any string value:
//! - `${NAME}`: required, startup fails when `NAME` is unset or empty
//! - `${NAME:-default}`: `default` when `NAME` is unset or empty
//! - `$${`: a literal `${`
//!
//! A value consisting of exactly one `${...}` token is re-read as a YAML
//! scalar, so `port: ${PORT:-8080}` produces an integer.

use std::sync::Arc;

use serde_yaml::{Mapping, Value};

use crate::config::loader::ConfigError;

/// Lookup function for environment variables.
pub type EnvLookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Lookup backed by the process environment.
pub fn process_env() -> Arc<EnvLookup> {
    Arc::new(|name: &str| std::env::var(name).ok())
}

/// Interpolate every string value of a top-level mapping in place.
pub fn interpolate_mapping(values: &mut Mapping, env: &EnvLookup) -> Result<(), ConfigError> {
    for (key, value) in values.iter_mut() {
        let path = key_label(key);
        interpolate_value(value, &path, env)?;
    }
    Ok(())
}

fn interpolate_value(value: &mut Value, path: &str, env: &EnvLookup) -> Result<(), ConfigError> {
    match value {
        Value::String(raw) => {
            if let Some(resolved) = resolve_string(raw, path, env)? {
                *value = resolved;
            }
        }
        Value::Mapping(map) => {
            for (key, child) in map.iter_mut() {
                let child_path = format!("{}.{}", path, key_label(key));
                interpolate_value(child, &child_path, env)?;
            }
        }
        Value::Sequence(items) => {
            for (index, child) in items.iter_mut().enumerate() {
                let child_path = format!("{}[{}]", path, index);
                interpolate_value(child, &child_path, env)?;
            }
        }
        Value::Tagged(tagged) => interpolate_value(&mut tagged.value, path, env)?,
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
    Ok(())
}

/// Returns `None` when the string contains nothing to substitute.
fn resolve_string(raw: &str, path: &str, env: &EnvLookup) -> Result<Option<Value>, ConfigError> {
    if !raw.contains('$') {
        return Ok(None);
    }

    let interpolated = interpolate_str(raw, path, env)?;
    if is_single_token(raw) {
        if let Ok(scalar @ (Value::Bool(_) | Value::Number(_))) =
            serde_yaml::from_str::<Value>(&interpolated)
        {
            return Ok(Some(scalar));
        }
    }
    Ok(Some(Value::String(interpolated)))
}

/// Substitute all tokens in a single string.
pub fn interpolate_str(input: &str, path: &str, env: &EnvLookup) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(escaped) = after.strip_prefix("${") {
            out.push_str("${");
            rest = escaped;
            continue;
        }
        let Some(body_and_tail) = after.strip_prefix('{') else {
            out.push('$');
            rest = after;
            continue;
        };

        let end = body_and_tail.find('}').ok_or_else(|| ConfigError::Interpolation {
            key_path: path.to_string(),
            reason: "unterminated `${`".to_string(),
        })?;
        let body = &body_and_tail[..end];
        let (name, default) = match body.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (body, None),
        };

        if !is_valid_name(name) {
            return Err(ConfigError::Interpolation {
                key_path: path.to_string(),
                reason: format!("invalid variable name `{}`", name),
            });
        }

        match (env(name).filter(|v| !v.is_empty()), default) {
            (Some(value), _) => out.push_str(&value),
            (None, Some(default)) => out.push_str(default),
            (None, None) => {
                return Err(ConfigError::MissingVariable {
                    name: name.to_string(),
                    key_path: path.to_string(),
                })
            }
        }
        rest = &body_and_tail[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_single_token(raw: &str) -> bool {
    raw.starts_with("${")
        && raw.ends_with('}')
        && raw.matches('$').count() == 1
        && raw.matches('}').count() == 1
}

fn key_label(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_else(|_| "?".to_string()),
    }
}
