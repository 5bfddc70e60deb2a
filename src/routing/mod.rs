//! Route configuration subsystem.
//!
//! # Data Flow
//! ```text
//! routes.defaults + routes.patterns (ConfigDocument)
//!     → pattern.rs (parse & normalise exact / wildcard patterns)
//!     → resolver.rs (compile ordered entry table)
//!
//! Route registration (at startup, once per path + method):
//!     resolver.resolve(path, method)
//!     → most specific matching entry
//!     → EffectiveRouteConfig (defaults overlaid with entry overrides)
//! ```
//!
//! # Design Decisions
//! - Resolution happens at registration time, never per request
//! - Precedence: exact > wildcard, method-specific > method-agnostic,
//!   longer wildcard prefix, then declaration order
//! - No regex: exact comparison and prefix checks only
//! - Two entries that normalise to the same pattern and method are rejected

pub mod pattern;
pub mod resolver;

pub use pattern::RoutePattern;
pub use resolver::{EffectiveRouteConfig, RouteConfigResolver};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouteConfigError {
    #[error("route patterns `{first}` and `{second}` both resolve to {pattern}{}", method_suffix(.method))]
    Ambiguous {
        pattern: String,
        method: Option<String>,
        first: String,
        second: String,
    },

    #[error("invalid route pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid route overrides at `{location}`: {reason}")]
    InvalidOverrides { location: String, reason: String },
}

fn method_suffix(method: &Option<String>) -> String {
    method
        .as_ref()
        .map(|m| format!(" for {}", m))
        .unwrap_or_default()
}
