//! Per-client rate limiting.
//!
//! Each route registration owns its buckets, keyed by client address (see
//! [`crate::http::client_ip`]). Tokens refill continuously at
//! `requests_per_second` up to `burst`. Buckets that have refilled
//! completely are dropped on a periodic sweep.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::{header::RETRY_AFTER, StatusCode};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::extensions::{Extension, ExtensionConfig, ExtensionError, RouteHandler, RouteInfo};
use crate::http::client_ip;
use crate::observability::metrics;
use crate::routing::EffectiveRouteConfig;
use crate::security::route_settings;

pub const EXTENSION_ID: &str = "rate_limit";

/// Minimum time between sweeps of idle buckets.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RateLimitSettings {
    pub requests_per_second: f64,
    pub burst: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            burst: 20,
        }
    }
}

impl RateLimitSettings {
    fn validate(&self) -> Result<(), ExtensionError> {
        if !(self.requests_per_second.is_finite() && self.requests_per_second > 0.0) {
            return Err(ExtensionError::Invalid(
                "rate_limit.requests_per_second must be greater than 0".to_string(),
            ));
        }
        if self.burst == 0 {
            return Err(ExtensionError::Invalid(
                "rate_limit.burst must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// A simple token bucket rate limiter.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    /// Take one token, or report how long until one is available.
    fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> Result<(), Duration> {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / refill_rate))
        }
    }

    /// A full bucket is indistinguishable from a new one.
    fn is_full(&self, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens + elapsed * refill_rate >= capacity
    }
}

/// Buckets for one route.
#[derive(Debug)]
pub struct RateLimiterState {
    route: String,
    buckets: DashMap<String, TokenBucket>,
    rps: f64,
    burst: f64,
    started: Instant,
    /// Milliseconds after `started` of the last sweep.
    last_sweep_ms: AtomicU64,
}

impl RateLimiterState {
    fn new(route: String, settings: &RateLimitSettings) -> Self {
        Self {
            route,
            buckets: DashMap::new(),
            rps: settings.requests_per_second,
            burst: f64::from(settings.burst),
            started: Instant::now(),
            last_sweep_ms: AtomicU64::new(0),
        }
    }

    fn check(&self, client: &str, now: Instant) -> Result<(), Duration> {
        self.maybe_sweep(now);
        let mut bucket = self
            .buckets
            .entry(client.to_string())
            .or_insert_with(|| TokenBucket::new(self.burst, now));
        bucket.try_acquire(self.burst, self.rps, now)
    }

    /// Drop full buckets at most once per [`SWEEP_INTERVAL`].
    fn maybe_sweep(&self, now: Instant) {
        let now_ms = now.saturating_duration_since(self.started).as_millis() as u64;
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < SWEEP_INTERVAL.as_millis() as u64 {
            return;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| !bucket.is_full(self.burst, self.rps, now));
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            tracing::debug!(route = %self.route, removed, "Idle rate limit buckets dropped");
        }
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}

pub struct RateLimitExtension {
    base: Value,
}

impl RateLimitExtension {
    pub fn from_config(config: &ExtensionConfig) -> Result<Self, ExtensionError> {
        let settings: RateLimitSettings =
            config
                .deserialize()
                .map_err(|source| ExtensionError::InvalidRouteConfig {
                    key: EXTENSION_ID.to_string(),
                    source,
                })?;
        settings.validate()?;
        Ok(Self {
            base: config.value().clone(),
        })
    }
}

impl Extension for RateLimitExtension {
    fn name(&self) -> &str {
        EXTENSION_ID
    }

    fn applies(&self, _route: &RouteInfo, config: &EffectiveRouteConfig) -> bool {
        !config.is_disabled(EXTENSION_ID)
    }

    fn wrap(
        &self,
        handler: RouteHandler,
        route: &RouteInfo,
        config: &EffectiveRouteConfig,
    ) -> Result<RouteHandler, ExtensionError> {
        let settings: RateLimitSettings = route_settings(&self.base, config, EXTENSION_ID)?;
        settings.validate()?;
        tracing::debug!(
            method = %route.method,
            path = %route.path,
            requests_per_second = settings.requests_per_second,
            burst = settings.burst,
            "Rate limit attached"
        );
        let state = Arc::new(RateLimiterState::new(route.path.clone(), &settings));
        Ok(handler.route_layer(from_fn_with_state(state, rate_limit_middleware)))
    }
}

async fn rate_limit_middleware(
    State(state): State<Arc<RateLimiterState>>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_ip(&request);

    match state.check(&client, Instant::now()) {
        Ok(()) => next.run(request).await,
        Err(wait) => {
            let retry_after = wait.as_secs_f64().ceil().max(1.0) as u64;
            tracing::warn!(client = %client, route = %state.route, retry_after, "Rate limit exceeded");
            metrics::record_rate_limited(&state.route);
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(RETRY_AFTER, retry_after.to_string())],
                "Rate limit exceeded",
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

    fn from_client(ip: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri("/")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_bucket_refills_over_time() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(2.0, start);
        assert!(bucket.try_acquire(2.0, 1.0, start).is_ok());
        assert!(bucket.try_acquire(2.0, 1.0, start).is_ok());

        let wait = bucket.try_acquire(2.0, 1.0, start).unwrap_err();
        assert!(wait <= Duration::from_secs(1));

        let later = start + Duration::from_millis(1500);
        assert!(bucket.try_acquire(2.0, 1.0, later).is_ok());
        assert!(bucket.try_acquire(2.0, 1.0, later).is_err());
    }

    #[test]
    fn test_clients_are_independent() {
        let state = RateLimiterState::new(
            "/".into(),
            &RateLimitSettings {
                requests_per_second: 1.0,
                burst: 1,
            },
        );
        let now = Instant::now();
        assert!(state.check("a", now).is_ok());
        assert!(state.check("a", now).is_err());
        assert!(state.check("b", now).is_ok());
        assert_eq!(state.tracked_clients(), 2);
    }

    #[test]
    fn test_idle_buckets_are_swept() {
        let state = RateLimiterState::new(
            "/".into(),
            &RateLimitSettings {
                requests_per_second: 1.0,
                burst: 2,
            },
        );
        let start = Instant::now();
        for client in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            assert!(state.check(client, start).is_ok());
        }
        assert_eq!(state.tracked_clients(), 3);

        let soon = start + Duration::from_secs(1);
        assert!(state.check("10.0.0.4", soon).is_ok());
        assert_eq!(state.tracked_clients(), 4);

        let later = start + SWEEP_INTERVAL + Duration::from_secs(1);
        assert!(state.check("10.0.0.5", later).is_ok());
        assert_eq!(state.tracked_clients(), 1);
    }

    #[test]
    fn test_sweep_keeps_drained_buckets() {
        let state = RateLimiterState::new(
            "/".into(),
            &RateLimitSettings {
                requests_per_second: 0.001,
                burst: 1,
            },
        );
        let start = Instant::now();
        assert!(state.check("10.0.0.1", start).is_ok());

        let later = start + SWEEP_INTERVAL + Duration::from_secs(1);
        assert!(state.check("10.0.0.2", later).is_ok());
        assert_eq!(state.tracked_clients(), 2);
        assert!(state.check("10.0.0.1", later).is_err());
    }

    #[tokio::test]
    async fn test_burst_then_429() {
        let ext = RateLimitExtension::from_config(&extension_config(
            EXTENSION_ID,
            "requests_per_second: 0.5\nburst: 2\n",
        ))
        .unwrap();
        let router = wrapped(
            &ext,
            RouterKind::Api,
            Method::GET,
            &EffectiveRouteConfig::default(),
            get(|| async { "ok" }),
        );

        assert_eq!(send(&router, from_client("10.0.0.1")).await.status(), StatusCode::OK);
        assert_eq!(send(&router, from_client("10.0.0.1")).await.status(), StatusCode::OK);

        let limited = send(&router, from_client("10.0.0.1")).await;
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry: u64 = limited.headers()[RETRY_AFTER].to_str().unwrap().parse().unwrap();
        assert!((1..=2).contains(&retry));

        assert_eq!(send(&router, from_client("10.0.0.2")).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_route_override() {
        let ext = RateLimitExtension::from_config(&extension_config(EXTENSION_ID, "burst: 100\n")).unwrap();
        let config = route_config("rate_limit:\n  burst: 1\n  requests_per_second: 0.1\n");
        let router = wrapped(&ext, RouterKind::Api, Method::GET, &config, get(|| async { "ok" }));

        assert_eq!(send(&router, from_client("10.0.0.1")).await.status(), StatusCode::OK);
        assert_eq!(
            send(&router, from_client("10.0.0.1")).await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_disabled_and_invalid_settings() {
        let ext = RateLimitExtension::from_config(&extension_config(EXTENSION_ID, "{}")).unwrap();
        let route = RouteInfo::new("/", Method::GET, RouterKind::Api);
        assert!(!ext.applies(&route, &route_config("rate_limit: false")));

        let bad = route_config("rate_limit:\n  burst: 0\n");
        let err = ext.wrap(get(|| async { "ok" }), &route, &bad).unwrap_err();
        assert!(err.to_string().contains("burst"));

        assert!(RateLimitExtension::from_config(&extension_config(
            EXTENSION_ID,
            "requests_per_second: 0\n"
        ))
        .is_err());
    }
}
