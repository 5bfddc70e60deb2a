//! HTTP surface: routers, request/response helpers and the server loop.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum::serve, connect info, graceful shutdown)
//!     → app-wide layers (request ID, trace, timeout, body limit)
//!     → per-route middleware chain (composed extensions)
//!     → response.rs (default content type for the router kind)
//!     → handler
//! ```

pub mod request;
pub mod response;
pub mod router;
pub mod server;

pub use request::{client_ip, MakeRequestUuid, X_REQUEST_ID};
pub use response::with_default_content_type;
pub use router::{AppRouter, RouteDef, RouteError, RouterKind};
pub use server::HttpServer;
