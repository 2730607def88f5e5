// Route tables. Each module owns its full paths; the server merges them.

pub mod auth;
pub mod docs;
pub mod health;
pub mod users;

use axum::Router;

use crate::error::ApiError;
use crate::state::AppState;

/// Every API route, without middleware or state attached.
pub fn api() -> Router<AppState> {
    Router::new()
        .merge(auth::router())
        .merge(users::router())
        .merge(health::router())
        .merge(docs::router())
}

/// Run `work` on tokio's blocking pool. Used for calls that hash or verify
/// passwords, which hold a core for tens of milliseconds.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(anyhow::Error::new(e).context("blocking task failed")))?
}
