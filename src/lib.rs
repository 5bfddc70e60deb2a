//! trellis: configuration-driven glue for axum applications.
//!
//! Loads layered YAML configuration, resolves per-route overrides and wraps
//! route handlers with declaratively configured extensions (auth, CSRF,
//! rate limiting, security headers).

pub mod app;
pub mod config;
pub mod error;
pub mod extensions;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;
pub mod security;

pub use app::{App, AppBuilder, RegisteredRoute};
pub use config::{AppSettings, ConfigDocument, ConfigLoader, Environment, EnvironmentResolver};
pub use error::{Error, Result};
pub use extensions::{Extension, ExtensionRegistry, RouteHandler, RouteInfo};
pub use http::{AppRouter, HttpServer, RouterKind};
pub use lifecycle::Shutdown;
pub use routing::{EffectiveRouteConfig, RouteConfigResolver};
