//! Application context.
//!
//! # Data Flow
//! ```text
//! ConfigDocument
//!     → AppBuilder::build (typed settings, route resolver, extensions)
//!     → App::mount(AppRouter) for every router
//!         per (path, method): resolve EffectiveRouteConfig
//!                             → default content type (innermost)
//!                             → composed extensions
//!                             → axum::Router::route
//!     → App::into_router (request ID, trace, timeout, body limit)
//!     → HttpServer
//! ```
//!
//! # Design Decisions
//! - Everything the application needs lives on `App`; nothing is global
//! - Configuration is resolved once per route registration, never per request
//! - Route paths are matched against override patterns as declared
//!   (`/users/{id}`), not against concrete request paths

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::{Method, Request};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::{
    validate_settings, AppSettings, ConfigDocument, ConfigError, Environment, ResolvedConfig,
};
use crate::error::{BoxError, Result};
use crate::extensions::{
    Extension, ExtensionConfig, ExtensionLoader, ExtensionRegistry, LoadedExtensions,
    MiddlewareComposer, RouteInfo,
};
use crate::http::{
    with_default_content_type, AppRouter, HttpServer, MakeRequestUuid, RouteError, RouterKind,
    X_REQUEST_ID,
};
use crate::observability::metrics;
use crate::routing::{EffectiveRouteConfig, RouteConfigResolver};

/// A route as mounted, for introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredRoute {
    pub path: String,
    pub method: Method,
    pub kind: RouterKind,
    /// Override pattern that matched, if any.
    pub matched_pattern: Option<String>,
    /// Applied extensions, outermost first.
    pub extensions: Vec<String>,
}

pub struct AppBuilder {
    document: ConfigDocument,
    environment: Environment,
    registry: ExtensionRegistry,
}

impl AppBuilder {
    /// Builder with the built-in extensions registered.
    pub fn new(document: ConfigDocument) -> Self {
        Self {
            document,
            environment: Environment::default(),
            registry: ExtensionRegistry::with_builtins(),
        }
    }

    pub fn from_resolved(resolved: ResolvedConfig) -> Self {
        Self::new(resolved.document).environment(resolved.environment)
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Replace the registry, built-ins included.
    pub fn registry(mut self, registry: ExtensionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn register_extension<F>(
        mut self,
        id: impl Into<String>,
        section: impl Into<String>,
        constructor: F,
    ) -> Self
    where
        F: Fn(&ExtensionConfig) -> Result<Arc<dyn Extension>, BoxError> + Send + Sync + 'static,
    {
        self.registry.register(id, section, constructor);
        self
    }

    pub fn build(self) -> Result<App> {
        let settings = AppSettings::from_document(&self.document)?;
        validate_settings(&settings).map_err(ConfigError::Validation)?;

        let resolver = RouteConfigResolver::from_document(&self.document)?;
        let extensions = ExtensionLoader::new(&self.registry).load(&self.document)?;

        tracing::info!(
            environment = %self.environment,
            route_patterns = resolver.len(),
            extensions = extensions.len(),
            "Application configured"
        );

        Ok(App {
            environment: self.environment,
            document: self.document,
            settings,
            resolver,
            extensions,
            router: Router::new(),
            routes: Vec::new(),
            registered: HashSet::new(),
        })
    }
}

/// The configured application.
pub struct App {
    environment: Environment,
    document: ConfigDocument,
    settings: AppSettings,
    resolver: RouteConfigResolver,
    extensions: LoadedExtensions,
    router: Router,
    routes: Vec<RegisteredRoute>,
    registered: HashSet<(String, Method)>,
}

impl App {
    pub fn builder(document: ConfigDocument) -> AppBuilder {
        AppBuilder::new(document)
    }

    /// Register every route of `router`, once per declared method.
    pub fn mount(mut self, router: AppRouter) -> Result<Self, RouteError> {
        let kind = router.kind();
        let composer = MiddlewareComposer::new(&self.extensions);
        let mut mounted = 0usize;

        for def in router.into_routes()? {
            for method in &def.methods {
                if !self.registered.insert((def.path.clone(), method.clone())) {
                    return Err(RouteError::Duplicate {
                        path: def.path.clone(),
                        method: method.to_string(),
                    });
                }

                let route = RouteInfo::new(def.path.clone(), method.clone(), kind);
                let config = self.resolver.resolve(&route.path, method);
                let handler = with_default_content_type(kind, def.handler_for(method)?);
                let composed = composer.compose(&route, &config, handler)?;

                self.router = self.router.route(&def.path, composed.handler);
                self.routes.push(RegisteredRoute {
                    path: def.path.clone(),
                    method: method.clone(),
                    kind,
                    matched_pattern: config.matched_pattern().map(str::to_string),
                    extensions: composed.applied,
                });
                mounted += 1;
            }
        }

        let total = self.routes.iter().filter(|r| r.kind == kind).count();
        metrics::record_routes_registered(kind.as_str(), total);
        tracing::info!(kind = %kind, routes = mounted, "Router mounted");
        Ok(self)
    }

    pub fn routes(&self) -> &[RegisteredRoute] {
        &self.routes
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn document(&self) -> &ConfigDocument {
        &self.document
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn extensions(&self) -> &LoadedExtensions {
        &self.extensions
    }

    /// Configuration a route at `path` would receive.
    pub fn route_config(&self, path: &str, method: &Method) -> EffectiveRouteConfig {
        self.resolver.resolve(path, method)
    }

    /// The axum router with app-wide layers applied.
    #[allow(deprecated)]
    pub fn into_router(self) -> Router {
        let server = &self.settings.server;
        let timeout = Duration::from_secs(server.request_timeout_secs);

        self.router
            .layer(DefaultBodyLimit::max(server.max_body_size))
            .layer(TimeoutLayer::new(timeout))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    let request_id = request
                        .headers()
                        .get(X_REQUEST_ID)
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id,
                    )
                }),
            )
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> std::io::Result<()> {
        HttpServer::new(self.into_router()).run(listener, shutdown).await
    }
}
