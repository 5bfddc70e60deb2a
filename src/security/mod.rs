//! Built-in security extensions.
//!
//! # Data Flow
//! ```text
//! Incoming request (outermost first, in `extensions:` order), e.g.:
//!     → security_headers (decorates the response on the way out)
//!     → rate_limit (per-client token bucket, 429)
//!     → auth (bearer token, 401)
//!     → csrf (double-submit cookie, 403)
//!     → handler
//! ```
//!
//! # Design Decisions
//! - Each extension reads defaults from its top-level section and lets a
//!   route override them under the same key; `key: false` turns it off
//! - Settings are validated when the extension is built or the route is
//!   registered, never per request
//! - Fail closed: a request that cannot be verified is rejected

pub mod auth;
pub mod csrf;
pub mod headers;
pub mod rate_limit;

pub use auth::{AuthContext, AuthExtension, AuthSettings};
pub use csrf::{CsrfExtension, CsrfSettings, CsrfToken};
pub use headers::{SecurityHeaders, SecurityHeadersSettings};
pub use rate_limit::{RateLimitExtension, RateLimitSettings};

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_yaml::Value;

use crate::extensions::{merge_route_settings, Extension, ExtensionError, ExtensionRegistry};
use crate::routing::EffectiveRouteConfig;

/// Register `security_headers`, `rate_limit`, `csrf` and `auth`, each
/// configured from the top-level section of the same name.
pub fn register_builtins(registry: &mut ExtensionRegistry) {
    registry
        .register(headers::EXTENSION_ID, headers::EXTENSION_ID, |config| {
            Ok(Arc::new(SecurityHeaders::from_config(config)?) as Arc<dyn Extension>)
        })
        .register(rate_limit::EXTENSION_ID, rate_limit::EXTENSION_ID, |config| {
            Ok(Arc::new(RateLimitExtension::from_config(config)?) as Arc<dyn Extension>)
        })
        .register(csrf::EXTENSION_ID, csrf::EXTENSION_ID, |config| {
            Ok(Arc::new(CsrfExtension::from_config(config)?) as Arc<dyn Extension>)
        })
        .register(auth::EXTENSION_ID, auth::EXTENSION_ID, |config| {
            Ok(Arc::new(AuthExtension::from_config(config)?) as Arc<dyn Extension>)
        });
}

/// Extension-level settings with the route's `key` mapping laid over them.
pub(crate) fn route_settings<T>(
    base: &Value,
    config: &EffectiveRouteConfig,
    key: &str,
) -> Result<T, ExtensionError>
where
    T: DeserializeOwned,
{
    let merged = merge_route_settings(base, config.get(key));
    serde_yaml::from_value(merged).map_err(|source| ExtensionError::InvalidRouteConfig {
        key: key.to_string(),
        source,
    })
}

/// Compare secrets without short-circuiting on the first mismatch.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
pub(crate) mod testing {
    use axum::body::Body;
    use axum::http::{Method, Request};
    use axum::response::Response;
    use axum::Router;
    use tower::ServiceExt;

    use crate::extensions::{Extension, ExtensionConfig, RouteHandler, RouteInfo};
    use crate::http::RouterKind;
    use crate::routing::EffectiveRouteConfig;

    pub fn extension_config(section: &str, yaml: &str) -> ExtensionConfig {
        ExtensionConfig::new(section, serde_yaml::from_str(yaml).unwrap())
    }

    pub fn route_config(yaml: &str) -> EffectiveRouteConfig {
        match serde_yaml::from_str(yaml).unwrap() {
            serde_yaml::Value::Mapping(values) => EffectiveRouteConfig::from_mapping(values),
            _ => EffectiveRouteConfig::default(),
        }
    }

    /// Wrap `handler` at `/` and return a router ready for `oneshot`.
    pub fn wrapped(
        extension: &dyn Extension,
        kind: RouterKind,
        method: Method,
        config: &EffectiveRouteConfig,
        handler: RouteHandler,
    ) -> Router {
        let route = RouteInfo::new("/", method, kind);
        assert!(extension.applies(&route, config), "extension should apply");
        let handler = extension.wrap(handler, &route, config).unwrap();
        Router::new().route("/", handler)
    }

    pub async fn send(router: &Router, request: Request<Body>) -> Response {
        router.clone().oneshot(request).await.unwrap()
    }
}
