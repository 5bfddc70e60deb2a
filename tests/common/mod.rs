//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Request, State};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::Response;
use tempfile::TempDir;
use tokio::net::TcpListener;

use trellis::extensions::{Extension, ExtensionConfig, ExtensionError, RouteHandler, RouteInfo};
use trellis::{ExtensionRegistry, EffectiveRouteConfig, Shutdown};

/// A throwaway configuration directory.
pub struct ConfigTree {
    dir: TempDir,
}

impl ConfigTree {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Ordered record of middleware entry/exit events.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Test extension that logs `<name>:in` / `<name>:out` around the handler.
///
/// Routes opt out with `<name>: false`.
pub struct Marker {
    name: String,
    log: CallLog,
    wraps: Arc<AtomicUsize>,
}

impl Extension for Marker {
    fn name(&self) -> &str {
        &self.name
    }

    fn applies(&self, _route: &RouteInfo, config: &EffectiveRouteConfig) -> bool {
        !config.is_disabled(&self.name)
    }

    fn wrap(
        &self,
        handler: RouteHandler,
        _route: &RouteInfo,
        _config: &EffectiveRouteConfig,
    ) -> Result<RouteHandler, ExtensionError> {
        self.wraps.fetch_add(1, Ordering::SeqCst);
        let state = (self.name.clone(), self.log.clone());
        Ok(handler.route_layer(from_fn_with_state(state, marker_middleware)))
    }
}

async fn marker_middleware(
    State((name, log)): State<(String, CallLog)>,
    request: Request,
    next: Next,
) -> Response {
    log.lock().unwrap().push(format!("{}:in", name));
    let response = next.run(request).await;
    log.lock().unwrap().push(format!("{}:out", name));
    response
}

/// Register one marker per name, each counting its `wrap` calls into `wraps`.
pub fn marker_registry(names: &[&str], log: &CallLog, wraps: &Arc<AtomicUsize>) -> ExtensionRegistry {
    let mut registry = ExtensionRegistry::new();
    for name in names {
        let name = name.to_string();
        let log = log.clone();
        let wraps = wraps.clone();
        registry.register(name.clone(), name.clone(), move |_: &ExtensionConfig| {
            Ok(marker(&name, &log, &wraps))
        });
    }
    registry
}

pub fn marker(name: &str, log: &CallLog, wraps: &Arc<AtomicUsize>) -> Arc<dyn Extension> {
    Arc::new(Marker {
        name: name.to_string(),
        log: log.clone(),
        wraps: wraps.clone(),
    })
}

/// Serve `router` on an ephemeral port.
pub async fn spawn_server(router: axum::Router) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = trellis::HttpServer::new(router).run(listener, server_shutdown).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, shutdown)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
