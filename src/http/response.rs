//! Default response content types per router kind.
//!
//! HTML routes turn a missing or `text/plain` content type into
//! `text/html; charset=utf-8`, so handlers can return bare strings. API
//! routes only fill in `application/json` when the handler set nothing.

use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderValue;
use axum::middleware::map_response;
use axum::response::Response;

use crate::extensions::RouteHandler;
use crate::http::RouterKind;

const TEXT_HTML: &str = "text/html; charset=utf-8";
const APPLICATION_JSON: &str = "application/json";

/// Innermost layer of every registered route.
pub fn with_default_content_type(kind: RouterKind, handler: RouteHandler) -> RouteHandler {
    match kind {
        RouterKind::Html => handler.route_layer(map_response(html_content_type)),
        RouterKind::Api => handler.route_layer(map_response(json_content_type)),
    }
}

async fn html_content_type(mut response: Response) -> Response {
    let is_plain = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("text/plain"))
        .unwrap_or(true);
    if is_plain {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_HTML));
    }
    response
}

async fn json_content_type(mut response: Response) -> Response {
    if !response.headers().contains_key(CONTENT_TYPE) {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
    }
    response
}
