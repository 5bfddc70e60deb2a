//! Crate-level error type.
//!
//! Every variant is a startup-time failure. Per-request failures are turned
//! into HTTP responses by the extensions themselves.

use thiserror::Error;

use crate::config::ConfigError;
use crate::extensions::ExtensionLoadError;
use crate::http::RouteError;
use crate::routing::RouteConfigError;

/// Boxed error used by extension constructors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    RouteConfig(#[from] RouteConfigError),

    #[error(transparent)]
    ExtensionLoad(#[from] ExtensionLoadError),

    #[error(transparent)]
    Route(#[from] RouteError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
