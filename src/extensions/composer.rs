//! Builds each route's middleware chain.
//!
//! The first extension declared in `extensions:` is the outermost layer:
//! it sees the request first and the response last. Extensions are wrapped
//! in reverse declaration order to get there, since every
//! `MethodRouter::route_layer` call becomes the new outermost layer.

use thiserror::Error;

use crate::extensions::loader::{ExtensionInstance, LoadedExtensions};
use crate::extensions::{ExtensionError, RouteHandler, RouteInfo};
use crate::routing::EffectiveRouteConfig;

#[derive(Debug, Error)]
#[error("extension `{extension}` could not wrap {method} {path}: {source}")]
pub struct ComposeError {
    pub extension: String,
    pub method: String,
    pub path: String,
    #[source]
    pub source: ExtensionError,
}

/// A handler with its middleware applied.
pub struct ComposedRoute {
    pub handler: RouteHandler,
    /// Ids of the applied extensions, outermost first.
    pub applied: Vec<String>,
}

pub struct MiddlewareComposer<'a> {
    extensions: &'a LoadedExtensions,
}

impl<'a> MiddlewareComposer<'a> {
    pub fn new(extensions: &'a LoadedExtensions) -> Self {
        Self { extensions }
    }

    /// Extensions whose predicate accepts this route, in declaration order.
    pub fn applicable(
        &self,
        route: &RouteInfo,
        config: &EffectiveRouteConfig,
    ) -> Vec<&'a ExtensionInstance> {
        self.extensions
            .iter()
            .filter(|instance| instance.extension.applies(route, config))
            .collect()
    }

    pub fn compose(
        &self,
        route: &RouteInfo,
        config: &EffectiveRouteConfig,
        handler: RouteHandler,
    ) -> Result<ComposedRoute, ComposeError> {
        let applicable = self.applicable(route, config);

        let mut handler = handler;
        for instance in applicable.iter().rev() {
            handler = instance
                .extension
                .wrap(handler, route, config)
                .map_err(|source| ComposeError {
                    extension: instance.id.clone(),
                    method: route.method.to_string(),
                    path: route.path.clone(),
                    source,
                })?;
        }

        let applied: Vec<String> = applicable.iter().map(|i| i.id.clone()).collect();
        tracing::debug!(
            method = %route.method,
            path = %route.path,
            extensions = ?applied,
            "Middleware chain composed"
        );

        Ok(ComposedRoute { handler, applied })
    }
}
