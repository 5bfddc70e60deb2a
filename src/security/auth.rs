//! Bearer-token authentication.
//!
//! ```yaml
//! auth:
//!   tokens:
//!     deploy: ${DEPLOY_TOKEN}
//!     dashboard: ${DASHBOARD_TOKEN}
//!   require_all: false
//!
//! routes:
//!   patterns:
//!     /admin/*:
//!       auth: true
//!     /api/deploy:
//!       auth: { allow: [deploy] }
//! ```
//!
//! A route is protected when its config sets `auth: true` or an `auth`
//! mapping (with `required` defaulting to true), or when `require_all` is
//! set and the route does not opt out with `auth: false` or
//! `auth: { enabled: false }`.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::extensions::{Extension, ExtensionConfig, ExtensionError, RouteHandler, RouteInfo};
use crate::observability::metrics;
use crate::routing::EffectiveRouteConfig;
use crate::security::constant_time_eq;

pub const EXTENSION_ID: &str = "auth";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AuthSettings {
    /// Token name → secret.
    pub tokens: BTreeMap<String, String>,
    pub require_all: bool,
    pub realm: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            tokens: BTreeMap::new(),
            require_all: false,
            realm: "trellis".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RouteAuth {
    enabled: Option<bool>,
    required: Option<bool>,
    allow: Vec<String>,
}

/// Attached to requests that passed authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Name of the matching token.
    pub token_name: String,
}

struct AuthState {
    route: String,
    tokens: Vec<(String, String)>,
    challenge: HeaderValue,
    invalid_challenge: HeaderValue,
}

pub struct AuthExtension {
    settings: AuthSettings,
}

impl AuthExtension {
    pub fn from_config(config: &ExtensionConfig) -> Result<Self, ExtensionError> {
        let settings: AuthSettings =
            config
                .deserialize()
                .map_err(|source| ExtensionError::InvalidRouteConfig {
                    key: EXTENSION_ID.to_string(),
                    source,
                })?;

        if let Some((name, _)) = settings.tokens.iter().find(|(_, token)| token.trim().is_empty()) {
            return Err(ExtensionError::Invalid(format!("auth token `{}` is empty", name)));
        }
        if settings.realm.contains('"') || HeaderValue::from_str(&settings.realm).is_err() {
            return Err(ExtensionError::Invalid(format!(
                "auth.realm `{}` is not a valid realm",
                settings.realm
            )));
        }
        if settings.tokens.is_empty() {
            tracing::warn!("auth extension has no tokens; protected routes will reject every request");
        }
        Ok(Self { settings })
    }

    /// Token names a route accepts, or `None` when it is public.
    fn requirement(&self, config: &EffectiveRouteConfig) -> Result<Option<Vec<String>>, ExtensionError> {
        if config.is_disabled(EXTENSION_ID) {
            return Ok(None);
        }
        match config.get(EXTENSION_ID) {
            None | Some(Value::Null) => Ok(self.settings.require_all.then(Vec::new)),
            Some(Value::Bool(required)) => Ok(required.then(Vec::new)),
            Some(value @ Value::Mapping(_)) => {
                let route: RouteAuth = serde_yaml::from_value(value.clone()).map_err(|source| {
                    ExtensionError::InvalidRouteConfig {
                        key: EXTENSION_ID.to_string(),
                        source,
                    }
                })?;
                let required = route.enabled.unwrap_or(true) && route.required.unwrap_or(true);
                Ok(required.then_some(route.allow))
            }
            Some(other) => Err(ExtensionError::Invalid(format!(
                "route `auth` must be a boolean or a mapping, found {:?}",
                other
            ))),
        }
    }
}

impl Extension for AuthExtension {
    fn name(&self) -> &str {
        EXTENSION_ID
    }

    fn applies(&self, _route: &RouteInfo, config: &EffectiveRouteConfig) -> bool {
        // Invalid route settings still apply so `wrap` reports them.
        self.requirement(config).map_or(true, |required| required.is_some())
    }

    fn wrap(
        &self,
        handler: RouteHandler,
        route: &RouteInfo,
        config: &EffectiveRouteConfig,
    ) -> Result<RouteHandler, ExtensionError> {
        let allow = self.requirement(config)?.unwrap_or_default();
        if let Some(unknown) = allow.iter().find(|name| !self.settings.tokens.contains_key(*name)) {
            return Err(ExtensionError::Invalid(format!(
                "route allows unknown auth token `{}`",
                unknown
            )));
        }

        let tokens = self
            .settings
            .tokens
            .iter()
            .filter(|(name, _)| allow.is_empty() || allow.contains(*name))
            .map(|(name, token)| (name.clone(), token.clone()))
            .collect();
        let challenge = format!("Bearer realm=\"{}\"", self.settings.realm);
        let state = Arc::new(AuthState {
            route: route.path.clone(),
            tokens,
            challenge: HeaderValue::from_str(&challenge)
                .map_err(|_| ExtensionError::Invalid("invalid auth realm".to_string()))?,
            invalid_challenge: HeaderValue::from_str(&format!("{}, error=\"invalid_token\"", challenge))
                .map_err(|_| ExtensionError::Invalid("invalid auth realm".to_string()))?,
        });
        Ok(handler.route_layer(from_fn_with_state(state, auth_middleware)))
    }
}

fn bearer_token(request: &Request) -> Option<&str> {
    let value = request.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|token| !token.is_empty())
}

async fn auth_middleware(State(state): State<Arc<AuthState>>, mut request: Request, next: Next) -> Response {
    let (matched, reason) = match bearer_token(&request) {
        None => (None, "missing"),
        Some(presented) => {
            let matched = state
                .tokens
                .iter()
                .find(|(_, token)| constant_time_eq(token.as_bytes(), presented.as_bytes()))
                .map(|(name, _)| name.clone());
            (matched, "invalid")
        }
    };

    match matched {
        Some(token_name) => {
            tracing::debug!(route = %state.route, token = %token_name, "Request authenticated");
            request.extensions_mut().insert(AuthContext { token_name });
            next.run(request).await
        }
        None => {
            tracing::warn!(route = %state.route, reason, "Authentication failed");
            metrics::record_auth_rejected(&state.route, reason);
            let challenge = if reason == "missing" {
                state.challenge.clone()
            } else {
                state.invalid_challenge.clone()
            };
            (
                StatusCode::UNAUTHORIZED,
                [(WWW_AUTHENTICATE, challenge)],
                "Unauthorized",
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RouterKind;
    use crate::security::testing::{extension_config, route_config, send, wrapped};
    use axum::body::Body;
    use axum::http::Method;
    use axum::routing::get;
    use axum::Extension as Ext;

    const SETTINGS: &str = "tokens:\n  deploy: d-secret\n  dashboard: x-secret\n";

    fn auth(yaml: &str) -> AuthExtension {
        AuthExtension::from_config(&extension_config(EXTENSION_ID, yaml)).unwrap()
    }

    fn request(authorization: Option<&str>) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::builder().uri("/");
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_route_selection() {
        let route = RouteInfo::new("/", Method::GET, RouterKind::Api);
        let ext = auth(SETTINGS);
        assert!(!ext.applies(&route, &EffectiveRouteConfig::default()));
        assert!(ext.applies(&route, &route_config("auth: true")));
        assert!(ext.applies(&route, &route_config("auth:\n  allow: [deploy]\n")));
        assert!(!ext.applies(&route, &route_config("auth:\n  required: false\n")));

        let strict = auth(&format!("{}require_all: true\n", SETTINGS));
        assert!(strict.applies(&route, &EffectiveRouteConfig::default()));
        assert!(!strict.applies(&route, &route_config("auth: false")));
    }

    #[test]
    fn test_enabled_false_opts_out() {
        let route = RouteInfo::new("/health", Method::GET, RouterKind::Api);
        let strict = auth(&format!("{}require_all: true\n", SETTINGS));
        let disabled = route_config("auth:\n  enabled: false\n");
        assert!(!strict.applies(&route, &disabled));
        assert!(strict.wrap(get(|| async { "ok" }), &route, &disabled).is_ok());

        let enabled = route_config("auth:\n  enabled: true\n  allow: [deploy]\n");
        assert!(strict.applies(&route, &enabled));
        assert_eq!(strict.requirement(&enabled).unwrap(), Some(vec!["deploy".to_string()]));
    }

    #[tokio::test]
    async fn test_bearer_tokens() {
        let router = wrapped(
            &auth(SETTINGS),
            RouterKind::Api,
            Method::GET,
            &route_config("auth: true"),
            get(|Ext(ctx): Ext<AuthContext>| async move { ctx.token_name }),
        );

        let ok = send(&router, request(Some("Bearer x-secret"))).await;
        assert_eq!(ok.status(), StatusCode::OK);
        let body = axum::body::to_bytes(ok.into_body(), 64).await.unwrap();
        assert_eq!(&body[..], b"dashboard");

        let lower = send(&router, request(Some("bearer d-secret"))).await;
        assert_eq!(lower.status(), StatusCode::OK);

        let missing = send(&router, request(None)).await;
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(missing.headers()[WWW_AUTHENTICATE], "Bearer realm=\"trellis\"");

        let wrong = send(&router, request(Some("Bearer nope"))).await;
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        assert!(wrong.headers()[WWW_AUTHENTICATE]
            .to_str()
            .unwrap()
            .contains("invalid_token"));

        let basic = send(&router, request(Some("Basic ZGVwbG95"))).await;
        assert_eq!(basic.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_allow_list_restricts_tokens() {
        let router = wrapped(
            &auth(SETTINGS),
            RouterKind::Api,
            Method::GET,
            &route_config("auth:\n  allow: [deploy]\n"),
            get(|| async { "ok" }),
        );
        assert_eq!(send(&router, request(Some("Bearer d-secret"))).await.status(), StatusCode::OK);
        assert_eq!(
            send(&router, request(Some("Bearer x-secret"))).await.status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_invalid_configuration() {
        assert!(AuthExtension::from_config(&extension_config(EXTENSION_ID, "tokens:\n  a: \"\"\n")).is_err());

        let ext = auth(SETTINGS);
        let route = RouteInfo::new("/", Method::GET, RouterKind::Api);
        let unknown = route_config("auth:\n  allow: [ghost]\n");
        let err = ext.wrap(get(|| async { "ok" }), &route, &unknown).unwrap_err();
        assert!(err.to_string().contains("ghost"));

        let typo = route_config("auth:\n  requird: true\n");
        assert!(ext.applies(&route, &typo));
        assert!(ext.wrap(get(|| async { "ok" }), &route, &typo).is_err());
    }
}
