//! Security response headers.
//!
//! Adds `X-Content-Type-Options`, `X-Frame-Options`, `Referrer-Policy` and,
//! when configured, `Strict-Transport-Security` and
//! `Content-Security-Policy`, plus any `extra` headers. A header the
//! handler already set is left alone.
//!
//! ```yaml
//! security_headers:
//!   frame_options: SAMEORIGIN
//!   hsts: max-age=31536000
//!   extra:
//!     permissions-policy: camera=()
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::Response;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::extensions::{Extension, ExtensionConfig, ExtensionError, RouteHandler, RouteInfo};
use crate::routing::EffectiveRouteConfig;
use crate::security::route_settings;

pub const EXTENSION_ID: &str = "security_headers";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SecurityHeadersSettings {
    pub content_type_options: Option<String>,
    pub frame_options: Option<String>,
    pub referrer_policy: Option<String>,
    /// `Strict-Transport-Security` value; off unless set.
    pub hsts: Option<String>,
    pub content_security_policy: Option<String>,
    pub extra: BTreeMap<String, String>,
}

impl Default for SecurityHeadersSettings {
    fn default() -> Self {
        Self {
            content_type_options: Some("nosniff".to_string()),
            frame_options: Some("DENY".to_string()),
            referrer_policy: Some("strict-origin-when-cross-origin".to_string()),
            hsts: None,
            content_security_policy: None,
            extra: BTreeMap::new(),
        }
    }
}

impl SecurityHeadersSettings {
    fn header_list(&self) -> Result<Vec<(HeaderName, HeaderValue)>, ExtensionError> {
        let standard = [
            ("x-content-type-options", &self.content_type_options),
            ("x-frame-options", &self.frame_options),
            ("referrer-policy", &self.referrer_policy),
            ("strict-transport-security", &self.hsts),
            ("content-security-policy", &self.content_security_policy),
        ];

        let mut headers = Vec::new();
        for (name, value) in standard {
            if let Some(value) = value {
                headers.push(parse_header(name, value)?);
            }
        }
        for (name, value) in &self.extra {
            headers.push(parse_header(name, value)?);
        }
        Ok(headers)
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), ExtensionError> {
    let header = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| ExtensionError::Invalid(format!("invalid header name `{}`", name)))?;
    let value = HeaderValue::from_str(value)
        .map_err(|_| ExtensionError::Invalid(format!("invalid value for header `{}`", name)))?;
    Ok((header, value))
}

pub struct SecurityHeaders {
    base: Value,
}

impl SecurityHeaders {
    pub fn from_config(config: &ExtensionConfig) -> Result<Self, ExtensionError> {
        let settings: SecurityHeadersSettings =
            config
                .deserialize()
                .map_err(|source| ExtensionError::InvalidRouteConfig {
                    key: EXTENSION_ID.to_string(),
                    source,
                })?;
        settings.header_list()?;
        Ok(Self {
            base: config.value().clone(),
        })
    }
}

impl Extension for SecurityHeaders {
    fn name(&self) -> &str {
        EXTENSION_ID
    }

    fn applies(&self, _route: &RouteInfo, config: &EffectiveRouteConfig) -> bool {
        !config.is_disabled(EXTENSION_ID)
    }

    fn wrap(
        &self,
        handler: RouteHandler,
        _route: &RouteInfo,
        config: &EffectiveRouteConfig,
    ) -> Result<RouteHandler, ExtensionError> {
        let settings: SecurityHeadersSettings = route_settings(&self.base, config, EXTENSION_ID)?;
        let headers = Arc::new(settings.header_list()?);
        Ok(handler.route_layer(from_fn_with_state(headers, security_headers_middleware)))
    }
}

async fn security_headers_middleware(
    State(headers): State<Arc<Vec<(HeaderName, HeaderValue)>>>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let target = response.headers_mut();
    for (name, value) in headers.iter() {
        if !target.contains_key(name) {
            target.insert(name.clone(), value.clone());
        }
    }
    response
}
