// Router assembly and the HTTP server loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Method};
use axum::Router;
use keystone_core::{Config, Database, LogMailer, TtlCache};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::error::ApiError;
use crate::routes;
use crate::state::AppState;

const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// The complete application: API routes, static files, CORS and request
/// tracing. Unknown paths get the JSON 404 envelope.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.allowed_origins);
    let static_files = ServeDir::new(&state.config.app.static_dir);

    routes::api()
        .nest_service("/static", static_files)
        .fallback(not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found() -> ApiError {
    ApiError::NotFound("Not found".to_string())
}

/// Credentialed CORS needs explicit origins, so a `*` entry is dropped
/// rather than handed to `AllowOrigin::list`, which rejects it.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter(|origin| {
            let wildcard = origin.trim() == "*";
            if wildcard {
                warn!("ignoring wildcard CORS origin; list each allowed origin instead");
            }
            !wildcard
        })
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid CORS origin {origin:?}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static("x-csrftoken"),
        ])
        .allow_credentials(true)
        .max_age(Duration::from_secs(60 * 60))
}

/// Open the database, build the state and serve until Ctrl+C or SIGTERM.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)
        .with_context(|| format!("failed to open database {}", config.database.path))?;
    info!("Database opened at {}", config.database.path);

    let address = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(config, db, Arc::new(LogMailer))?;
    let purge = tokio::spawn(purge_expired(state.cache.clone()));
    let app = build_router(state);

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!("Server running on http://{address}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    purge.abort();
    info!("Server shut down cleanly");
    Ok(())
}

/// Periodically drop expired cache entries that were never read again.
async fn purge_expired(cache: Arc<TtlCache>) {
    let mut ticker = tokio::time::interval(CACHE_PURGE_INTERVAL);
    loop {
        ticker.tick().await;
        let removed = cache.purge_expired();
        if removed > 0 {
            debug!(removed, "expired cache entries purged");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_cors_origins_are_skipped() {
        // Building the layer must not panic on a bad header value.
        let _ = cors_layer(&["http://ok.example".into(), "bad\norigin".into()]);
    }

    #[test]
    fn wildcard_cors_origin_does_not_break_the_router() {
        let _ = cors_layer(&["*".into()]);
        let _ = cors_layer(&[" * ".into(), "http://ok.example".into()]);
    }
}
