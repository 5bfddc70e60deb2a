//! Request helpers.
//!
//! # Responsibilities
//! - Generate a UUID request ID for every request that lacks one
//! - Identify the client for per-client middleware (rate limiting)

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{HeaderName, HeaderValue, Request};
use tower_http::request_id::{MakeRequestId, RequestId};

/// Header carrying the request ID, set on the request and echoed on the response.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Request IDs as UUID v4 strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Best-effort client address.
///
/// Order: the connection's peer address (present when served with
/// `into_make_service_with_connect_info`), the first `X-Forwarded-For`
/// entry, then `"unknown"`.
pub fn client_ip<B>(request: &Request<B>) -> String {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    request
        .headers()
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_connect_info_preferred() {
        let mut request = Request::builder()
            .header(X_FORWARDED_FOR, "10.0.0.9")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo("192.168.1.4:5000".parse::<SocketAddr>().unwrap()));
        assert_eq!(client_ip(&request), "192.168.1.4");
    }

    #[test]
    fn test_forwarded_for_first_hop() {
        let request = Request::builder()
            .header(X_FORWARDED_FOR, " 10.0.0.9 , 172.16.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request), "10.0.0.9");
    }

    #[test]
    fn test_unknown_client() {
        let request = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_ip(&request), "unknown");
    }

    #[test]
    fn test_request_ids_are_unique() {
        let request = Request::builder().body(Body::empty()).unwrap();
        let mut make = MakeRequestUuid;
        let a = make.make_request_id(&request).unwrap();
        let b = make.make_request_id(&request).unwrap();
        assert_ne!(a.header_value(), b.header_value());
    }
}
