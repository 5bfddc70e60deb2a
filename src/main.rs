//! trellis demo server.
//!
//! Loads `config/app.yaml` (or `app.<env>.yaml`, see `TRELLIS_ENV`), mounts a
//! small HTML site and JSON API and serves them until SIGINT/SIGTERM.
//!
//! ```text
//!   TRELLIS_ENV ──▶ EnvironmentResolver ──▶ ConfigDocument
//!                                               │
//!                      ExtensionRegistry ──▶ AppBuilder ──▶ App
//!                                                            │
//!                    AppRouter::html() / AppRouter::api() ──▶ mount
//!                                                            │
//!                                     Shutdown ──▶ HttpServer (axum)
//! ```

use axum::extract::Path;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use trellis::config::validate_settings;
use trellis::lifecycle::wait_for_signal;
use trellis::observability::{bootstrap_subscriber, init_logging, init_metrics};
use trellis::security::{AuthContext, CsrfToken};
use trellis::{AppBuilder, AppRouter, AppSettings, EnvironmentResolver, Shutdown};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logging settings live in the config, so resolution logs through a
    // temporary subscriber.
    let resolved = tracing::subscriber::with_default(bootstrap_subscriber(), || {
        EnvironmentResolver::from_process_env().resolve()
    })?;

    let settings = AppSettings::from_document(&resolved.document)?;
    if let Err(errors) = validate_settings(&settings) {
        for error in &errors {
            eprintln!("config: {}", error);
        }
        return Err(format!("{} configuration error(s)", errors.len()).into());
    }

    init_logging(&settings.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %resolved.environment,
        source = %resolved.source.display(),
        "trellis starting"
    );

    if settings.observability.metrics_enabled {
        let addr = settings.observability.metrics_address.parse()?;
        init_metrics(addr)?;
    }

    let app = AppBuilder::from_resolved(resolved)
        .build()?
        .mount(site())?
        .mount(api())?;

    for route in app.routes() {
        tracing::debug!(
            method = %route.method,
            path = %route.path,
            kind = %route.kind,
            extensions = ?route.extensions,
            "Route registered"
        );
    }

    let listener = TcpListener::bind(&settings.server.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_shutdown.trigger();
    });

    app.serve(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn site() -> AppRouter {
    AppRouter::html()
        .get("/", || async { "<h1>trellis</h1><p>It works.</p>" })
        .get("/contact", contact_form)
        .post("/contact", || async { "<p>Thanks, message received.</p>" })
}

async fn contact_form(token: Option<axum::Extension<CsrfToken>>) -> String {
    let token = token.map(|axum::Extension(t)| t.0).unwrap_or_default();
    format!(
        "<form method=\"post\"><input type=\"hidden\" name=\"csrf\" value=\"{}\">\
         <textarea name=\"message\"></textarea><button>Send</button></form>",
        token
    )
}

fn api() -> AppRouter {
    AppRouter::api()
        .prefix("/api")
        .get("/health", || async { Json(json!({ "status": "ok" })) })
        .get("/users", || async { Json(json!([{ "id": 1, "name": "ada" }])) })
        .get("/users/{id}", user)
        .get("/whoami", whoami)
}

async fn user(Path(id): Path<u64>) -> Result<Json<Value>, StatusCode> {
    match id {
        1 => Ok(Json(json!({ "id": 1, "name": "ada" }))),
        _ => Err(StatusCode::NOT_FOUND),
    }
}

async fn whoami(auth: Option<axum::Extension<AuthContext>>) -> Json<Value> {
    Json(json!({ "token": auth.map(|axum::Extension(ctx)| ctx.token_name) }))
}
