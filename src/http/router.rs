//! HTML and JSON-API routers.
//!
//! # Responsibilities
//! - Collect route declarations (path, methods, handler) for one kind of
//!   endpoint, optionally under a shared prefix
//! - Expose the route kind to extensions (CSRF only guards HTML by default)
//! - Give each kind its default response content type
//!
//! # Design Decisions
//! - Declarations are inert until mounted on an `App`; the app resolves
//!   configuration and composes middleware once per path + method
//! - Handlers are stored as factories so one handler can be registered
//!   separately for each of its methods

use std::fmt;
use std::sync::Arc;

use axum::handler::Handler;
use axum::http::Method;
use axum::routing::MethodFilter;
use thiserror::Error;

use crate::extensions::{ComposeError, RouteHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouterKind {
    /// Browser-facing pages; responses default to `text/html`.
    Html,
    /// JSON endpoints; responses default to `application/json`.
    Api,
}

impl RouterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouterKind::Html => "html",
            RouterKind::Api => "api",
        }
    }
}

impl fmt::Display for RouterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("route path `{path}` must start with `/`")]
    InvalidPath { path: String },

    #[error("route `{path}` declares no methods")]
    NoMethods { path: String },

    #[error("method {method} is not supported (route `{path}`)")]
    UnsupportedMethod { path: String, method: String },

    #[error("route {method} {path} is registered twice")]
    Duplicate { path: String, method: String },

    #[error(transparent)]
    Extension(#[from] ComposeError),
}

type HandlerFactory = Arc<dyn Fn(MethodFilter) -> RouteHandler + Send + Sync>;

/// A declared route, before configuration and middleware are applied.
#[derive(Clone)]
pub struct RouteDef {
    pub path: String,
    pub methods: Vec<Method>,
    factory: HandlerFactory,
}

impl fmt::Debug for RouteDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDef")
            .field("path", &self.path)
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}

impl RouteDef {
    /// Build the bare handler for one method.
    pub fn handler_for(&self, method: &Method) -> Result<RouteHandler, RouteError> {
        let filter =
            MethodFilter::try_from(method.clone()).map_err(|_| RouteError::UnsupportedMethod {
                path: self.path.clone(),
                method: method.to_string(),
            })?;
        Ok((self.factory)(filter))
    }
}

/// Route declarations for one endpoint kind.
#[derive(Debug, Clone)]
pub struct AppRouter {
    kind: RouterKind,
    prefix: String,
    routes: Vec<RouteDef>,
}

impl AppRouter {
    pub fn new(kind: RouterKind) -> Self {
        Self {
            kind,
            prefix: String::new(),
            routes: Vec::new(),
        }
    }

    pub fn html() -> Self {
        Self::new(RouterKind::Html)
    }

    pub fn api() -> Self {
        Self::new(RouterKind::Api)
    }

    /// Mount every route of this router under `prefix`.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn route<H, T>(mut self, path: &str, methods: &[Method], handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        let factory: HandlerFactory =
            Arc::new(move |filter| axum::routing::on(filter, handler.clone()));
        self.routes.push(RouteDef {
            path: path.to_string(),
            methods: methods.to_vec(),
            factory,
        });
        self
    }

    pub fn get<H, T>(self, path: &str, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.route(path, &[Method::GET], handler)
    }

    pub fn post<H, T>(self, path: &str, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.route(path, &[Method::POST], handler)
    }

    pub fn put<H, T>(self, path: &str, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.route(path, &[Method::PUT], handler)
    }

    pub fn patch<H, T>(self, path: &str, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.route(path, &[Method::PATCH], handler)
    }

    pub fn delete<H, T>(self, path: &str, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.route(path, &[Method::DELETE], handler)
    }

    pub fn kind(&self) -> RouterKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Declarations with the prefix applied to their paths.
    pub fn into_routes(self) -> Result<Vec<RouteDef>, RouteError> {
        let prefix = self.prefix;
        self.routes
            .into_iter()
            .map(|mut def| {
                if !def.path.starts_with('/') {
                    return Err(RouteError::InvalidPath { path: def.path });
                }
                if def.methods.is_empty() {
                    return Err(RouteError::NoMethods { path: def.path });
                }
                def.path = join_path(&prefix, &def.path);
                if !def.path.starts_with('/') {
                    return Err(RouteError::InvalidPath { path: def.path });
                }
                Ok(def)
            })
            .collect()
    }
}

fn join_path(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    match (prefix.is_empty(), path) {
        (true, _) => path.to_string(),
        (false, "/") => prefix.to_string(),
        (false, _) => format!("{}{}", prefix, path),
    }
}
