//! CSRF protection with the double-submit cookie pattern.
//!
//! Safe methods (GET, HEAD, OPTIONS, TRACE) pass through and receive a token
//! cookie when they do not carry one; the token is also available to the
//! handler as a [`CsrfToken`] request extension. Unsafe methods must echo
//! the cookie value in the configured header.
//!
//! Only HTML routes are guarded unless `protect_api` is set.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::extensions::{Extension, ExtensionConfig, ExtensionError, RouteHandler, RouteInfo};
use crate::http::RouterKind;
use crate::observability::metrics;
use crate::routing::{EffectiveRouteConfig, RoutePattern};
use crate::security::{constant_time_eq, route_settings};

pub const EXTENSION_ID: &str = "csrf";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CsrfSettings {
    pub cookie_name: String,
    pub header_name: String,
    /// Guard API routes as well.
    pub protect_api: bool,
    /// Route patterns never guarded (`/webhooks/*`).
    pub exempt: Vec<String>,
    pub secure_cookie: bool,
    pub same_site: String,
}

impl Default for CsrfSettings {
    fn default() -> Self {
        Self {
            cookie_name: "csrftoken".to_string(),
            header_name: "x-csrf-token".to_string(),
            protect_api: false,
            exempt: Vec::new(),
            secure_cookie: false,
            same_site: "Lax".to_string(),
        }
    }
}

/// Token issued to the current client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken(pub String);

#[derive(Debug)]
struct CsrfState {
    route: String,
    cookie_name: String,
    header_name: HeaderName,
    cookie_attributes: String,
}

impl CsrfState {
    fn from_settings(route: &str, settings: &CsrfSettings) -> Result<Self, ExtensionError> {
        if settings.cookie_name.is_empty()
            || !settings
                .cookie_name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(ExtensionError::Invalid(format!(
                "csrf.cookie_name `{}` is not a valid cookie name",
                settings.cookie_name
            )));
        }
        let header_name = HeaderName::from_bytes(settings.header_name.as_bytes()).map_err(|_| {
            ExtensionError::Invalid(format!(
                "csrf.header_name `{}` is not a valid header name",
                settings.header_name
            ))
        })?;
        let same_site = match settings.same_site.to_ascii_lowercase().as_str() {
            "strict" => "Strict",
            "lax" => "Lax",
            "none" => "None",
            other => {
                return Err(ExtensionError::Invalid(format!(
                    "csrf.same_site must be Strict, Lax or None, got `{}`",
                    other
                )))
            }
        };

        let mut cookie_attributes = format!("; Path=/; SameSite={}", same_site);
        if settings.secure_cookie || same_site == "None" {
            cookie_attributes.push_str("; Secure");
        }

        Ok(Self {
            route: route.to_string(),
            cookie_name: settings.cookie_name.clone(),
            header_name,
            cookie_attributes,
        })
    }

    fn set_cookie(&self, token: &str) -> Option<HeaderValue> {
        HeaderValue::from_str(&format!("{}={}{}", self.cookie_name, token, self.cookie_attributes)).ok()
    }
}

pub struct CsrfExtension {
    base: Value,
}

impl CsrfExtension {
    pub fn from_config(config: &ExtensionConfig) -> Result<Self, ExtensionError> {
        let settings: CsrfSettings =
            config
                .deserialize()
                .map_err(|source| ExtensionError::InvalidRouteConfig {
                    key: EXTENSION_ID.to_string(),
                    source,
                })?;
        CsrfState::from_settings("", &settings)?;
        for pattern in &settings.exempt {
            RoutePattern::parse(pattern).map_err(|e| ExtensionError::Invalid(e.to_string()))?;
        }
        Ok(Self {
            base: config.value().clone(),
        })
    }
}

impl Extension for CsrfExtension {
    fn name(&self) -> &str {
        EXTENSION_ID
    }

    fn applies(&self, route: &RouteInfo, config: &EffectiveRouteConfig) -> bool {
        if config.is_disabled(EXTENSION_ID) {
            return false;
        }
        // Unparseable settings still apply so `wrap` reports them.
        let settings: CsrfSettings = match route_settings(&self.base, config, EXTENSION_ID) {
            Ok(settings) => settings,
            Err(_) => return true,
        };
        if route.kind == RouterKind::Api && !settings.protect_api {
            return false;
        }
        !settings.exempt.iter().any(|raw| {
            RoutePattern::parse(raw)
                .map(|pattern| pattern.matches(&route.path))
                .unwrap_or(false)
        })
    }

    fn wrap(
        &self,
        handler: RouteHandler,
        route: &RouteInfo,
        config: &EffectiveRouteConfig,
    ) -> Result<RouteHandler, ExtensionError> {
        let settings: CsrfSettings = route_settings(&self.base, config, EXTENSION_ID)?;
        let state = Arc::new(CsrfState::from_settings(&route.path, &settings)?);
        Ok(handler.route_layer(from_fn_with_state(state, csrf_middleware)))
    }
}

fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

async fn csrf_middleware(
    State(state): State<Arc<CsrfState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let cookie_token = read_cookie(request.headers(), &state.cookie_name);

    if request.method().is_safe() {
        let (token, issued) = match cookie_token {
            Some(token) => (token, false),
            None => (new_token(), true),
        };
        request.extensions_mut().insert(CsrfToken(token.clone()));

        let mut response = next.run(request).await;
        if issued {
            if let Some(cookie) = state.set_cookie(&token) {
                response.headers_mut().append(SET_COOKIE, cookie);
            }
        }
        return response;
    }

    let header_token = request
        .headers()
        .get(&state.header_name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    match (cookie_token, header_token) {
        (Some(cookie), Some(header)) if constant_time_eq(cookie.as_bytes(), header.as_bytes()) => {
            request.extensions_mut().insert(CsrfToken(cookie));
            next.run(request).await
        }
        (cookie, header) => {
            tracing::warn!(
                route = %state.route,
                method = %request.method(),
                has_cookie = cookie.is_some(),
                has_header = header.is_some(),
                "CSRF check failed"
            );
            metrics::record_csrf_rejected(&state.route);
            (StatusCode::FORBIDDEN, "CSRF token missing or invalid").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::testing::{extension_config, route_config, send, wrapped};
    use axum::body::Body;
    use axum::http::Method;
    use axum::routing::{get, post};
    use axum::Extension as Ext;

    fn csrf(yaml: &str) -> CsrfExtension {
        CsrfExtension::from_config(&extension_config(EXTENSION_ID, yaml)).unwrap()
    }

    fn post_request(cookie: Option<&str>, header: Option<&str>) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::builder().method(Method::POST).uri("/");
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, format!("theme=dark; csrftoken={}", cookie));
        }
        if let Some(header) = header {
            builder = builder.header("x-csrf-token", header);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_safe_method_issues_cookie() {
        let router = wrapped(
            &csrf("{}"),
            RouterKind::Html,
            Method::GET,
            &EffectiveRouteConfig::default(),
            get(|Ext(token): Ext<CsrfToken>| async move { token.0 }),
        );

        let request = axum::http::Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = send(&router, request).await;
        assert_eq!(response.status(), StatusCode::OK);

        let cookie = response.headers()[SET_COOKIE].to_str().unwrap().to_string();
        assert!(cookie.starts_with("csrftoken="));
        assert!(cookie.contains("SameSite=Lax"));

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let token = std::str::from_utf8(&body).unwrap();
        assert!(cookie.starts_with(&format!("csrftoken={};", token)));
    }

    #[tokio::test]
    async fn test_existing_cookie_not_reissued() {
        let router = wrapped(
            &csrf("{}"),
            RouterKind::Html,
            Method::GET,
            &EffectiveRouteConfig::default(),
            get(|| async { "ok" }),
        );
        let request = axum::http::Request::builder()
            .uri("/")
            .header(COOKIE, "csrftoken=abc")
            .body(Body::empty())
            .unwrap();
        let response = send(&router, request).await;
        assert!(response.headers().get(SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_unsafe_method_requires_matching_token() {
        let router = wrapped(
            &csrf("{}"),
            RouterKind::Html,
            Method::POST,
            &EffectiveRouteConfig::default(),
            post(|| async { "saved" }),
        );

        let ok = send(&router, post_request(Some("t0k3n"), Some("t0k3n"))).await;
        assert_eq!(ok.status(), StatusCode::OK);

        for (cookie, header) in [(None, Some("t0k3n")), (Some("t0k3n"), None), (Some("a"), Some("b"))] {
            let response = send(&router, post_request(cookie, header)).await;
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
        }
    }

    #[test]
    fn test_api_routes_opt_in() {
        let route = RouteInfo::new("/api/items", Method::POST, RouterKind::Api);
        let config = EffectiveRouteConfig::default();
        assert!(!csrf("{}").applies(&route, &config));
        assert!(csrf("protect_api: true").applies(&route, &config));
        assert!(csrf("{}").applies(&route, &route_config("csrf:\n  protect_api: true\n")));
    }

    #[test]
    fn test_exempt_and_disabled_routes() {
        let ext = csrf("exempt: [\"/webhooks/*\"]");
        let config = EffectiveRouteConfig::default();
        assert!(!ext.applies(&RouteInfo::new("/webhooks/stripe", Method::POST, RouterKind::Html), &config));
        assert!(ext.applies(&RouteInfo::new("/contact", Method::POST, RouterKind::Html), &config));
        assert!(!ext.applies(
            &RouteInfo::new("/contact", Method::POST, RouterKind::Html),
            &route_config("csrf: false")
        ));
    }

    #[test]
    fn test_invalid_settings() {
        assert!(CsrfExtension::from_config(&extension_config(EXTENSION_ID, "same_site: sometimes")).is_err());
        assert!(CsrfExtension::from_config(&extension_config(EXTENSION_ID, "cookie_name: \"a b\"")).is_err());
    }
}
