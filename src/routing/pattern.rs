//! Route pattern matching.
//!
//! # Responsibilities
//! - Parse exact (`/login`) and wildcard (`/api/*`, `*`) patterns
//! - Normalise trailing slashes so `/users/` and `/users` are the same route
//! - Match declared route paths (templates such as `/users/{id}` included)
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - A wildcard is only allowed as the final `/*` segment
//! - `/api/*` matches paths below `/api/`, not `/api` itself

use std::fmt;

use crate::routing::RouteConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoutePattern {
    /// Matches one normalised path.
    Exact(String),
    /// Matches every path starting with the prefix. The prefix keeps its
    /// trailing `/`; an empty prefix matches everything.
    Prefix(String),
}

impl RoutePattern {
    pub fn parse(raw: &str) -> Result<Self, RouteConfigError> {
        let trimmed = raw.trim();
        let invalid = |reason: &str| RouteConfigError::InvalidPattern {
            pattern: raw.to_string(),
            reason: reason.to_string(),
        };

        if trimmed == "*" {
            return Ok(RoutePattern::Prefix(String::new()));
        }
        if !trimmed.starts_with('/') {
            return Err(invalid("patterns must start with `/`"));
        }

        if let Some(prefix) = trimmed.strip_suffix('*') {
            if !prefix.ends_with('/') {
                return Err(invalid("a wildcard must be a whole final segment (`/prefix/*`)"));
            }
            if prefix.contains('*') {
                return Err(invalid("only one trailing wildcard is supported"));
            }
            return Ok(RoutePattern::Prefix(prefix.to_string()));
        }

        if trimmed.contains('*') {
            return Err(invalid("wildcards are only supported as a trailing `/*`"));
        }
        Ok(RoutePattern::Exact(normalize_path(trimmed).to_string()))
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            RoutePattern::Exact(expected) => normalize_path(path) == expected,
            RoutePattern::Prefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, RoutePattern::Exact(_))
    }

    /// Length of the literal part, used to rank wildcards.
    pub fn specificity(&self) -> usize {
        match self {
            RoutePattern::Exact(path) | RoutePattern::Prefix(path) => path.len(),
        }
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutePattern::Exact(path) => f.write_str(path),
            RoutePattern::Prefix(prefix) if prefix.is_empty() => f.write_str("*"),
            RoutePattern::Prefix(prefix) => write!(f, "{}*", prefix),
        }
    }
}

/// Strip a trailing `/` (except for the root path).
pub fn normalize_path(path: &str) -> &str {
    if path.len() > 1 {
        path.strip_suffix('/').unwrap_or(path)
    } else {
        path
    }
}
