//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! TRELLIS_ENV / TRELLIS_FORCE_DEV / TRELLIS_CONFIG_DIR
//!     → environment.rs (pick app.<env>.yaml or app.yaml)
//!     → loader.rs (parse, resolve `include`, shallow merge, conflict check)
//!     → env_interpolation.rs (${VAR} / ${VAR:-default})
//!     → ConfigDocument (immutable, owned by the App)
//!     → schema.rs + validation.rs (typed server/observability sections)
//! ```
//!
//! # Design Decisions
//! - Merging is top-level only; nested mappings are never combined
//! - Two includes defining the same key is fatal, only an environment
//!   override file may replace keys of the files it includes
//! - Every failure happens before the first request is accepted

pub mod document;
pub mod env_interpolation;
pub mod environment;
pub mod loader;
pub mod schema;
pub mod validation;

pub use document::ConfigDocument;
pub use env_interpolation::{process_env, EnvLookup};
pub use environment::{Environment, EnvironmentResolver, ResolvedConfig};
pub use loader::{ConfigError, ConfigLoader};
pub use schema::{AppSettings, LogFormat, ObservabilityConfig, ServerSettings};
pub use validation::{validate_settings, ValidationError};
