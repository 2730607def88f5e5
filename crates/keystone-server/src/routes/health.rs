// /api/health: liveness and per-component health.

use std::time::{Duration, Instant};

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use tracing::error;

use crate::schemas::{
    CacheCheck, DatabaseCheck, DetailedHealthResponse, HealthChecks, HealthResponse, SystemCheck,
};
use crate::state::AppState;

const HEALTHY: &str = "healthy";
const UNHEALTHY: &str = "unhealthy";
const PROBE_KEY: &str = "health_check";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/health/", get(health))
        .route("/api/health/detailed", get(health_detailed))
}

fn status(ok: bool) -> String {
    let label = if ok { HEALTHY } else { UNHEALTHY };
    label.to_string()
}

fn database_ok(state: &AppState) -> bool {
    match state.db.ping() {
        Ok(()) => true,
        Err(e) => {
            error!("database health check failed: {e:#}");
            false
        }
    }
}

/// Write a unique value and read it back.
fn cache_ok(state: &AppState) -> bool {
    let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
    state
        .cache
        .set(PROBE_KEY, stamp.clone(), Duration::from_secs(5));
    let ok = state.cache.get(PROBE_KEY).as_deref() == Some(stamp.as_str());
    if !ok {
        error!("cache health check read back a different value");
    }
    ok
}

/// Liveness plus database and cache status.
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses((status = 200, body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = database_ok(&state);
    let cache = cache_ok(&state);
    Json(HealthResponse {
        status: status(database && cache),
        timestamp: Utc::now(),
        database: status(database),
        cache: status(cache),
        uptime: format!("{}s", state.started_at.elapsed().as_secs()),
    })
}

#[utoipa::path(
    get,
    path = "/api/health/detailed",
    tag = "health",
    responses((status = 200, body = DetailedHealthResponse))
)]
pub async fn health_detailed(State(state): State<AppState>) -> Json<DetailedHealthResponse> {
    let started = Instant::now();
    let database = match state.db.count_users() {
        Ok(count) => DatabaseCheck {
            connection: HEALTHY.to_string(),
            response_time_ms: Some(round2(started.elapsed().as_secs_f64() * 1000.0)),
            user_count: Some(count),
        },
        Err(e) => {
            error!("database detailed check failed: {e:#}");
            DatabaseCheck {
                connection: UNHEALTHY.to_string(),
                response_time_ms: None,
                user_count: None,
            }
        }
    };

    let cache_rw = cache_ok(&state);
    let cache = CacheCheck {
        connection: HEALTHY.to_string(),
        read_write: status(cache_rw),
        entries: state.cache.len(),
    };

    let overall = database.connection == HEALTHY && cache_rw;
    Json(DetailedHealthResponse {
        status: status(overall),
        timestamp: Utc::now(),
        checks: HealthChecks {
            database,
            cache,
            system: SystemCheck {
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_seconds: state.started_at.elapsed().as_secs(),
            },
        },
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
