// Request extractors: JSON/query/path wrappers that reject with the API error
// envelope, bearer authentication and client IP resolution.

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::extract::{ConnectInfo, FromRequest, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use keystone_core::validate::client_ip;
use keystone_core::User;
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

/// `axum::Json` whose rejection is an [`ApiError`] (400).
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

const NOT_AUTHENTICATED: &str = "Authentication credentials were not provided or are invalid";

/// The signed-in user behind a valid bearer access token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    /// The raw bearer token, kept so logout can revoke it.
    pub token: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ApiError::Unauthorized(NOT_AUTHENTICATED.to_string()))?;
        let claims = state
            .auth
            .verify_access(token)
            .ok_or_else(|| ApiError::Unauthorized(NOT_AUTHENTICATED.to_string()))?;
        let user = state.users.get_active_user(claims.user_id).map_err(|e| {
            debug!(user_id = claims.user_id, "bearer user unavailable: {e}");
            ApiError::Unauthorized(NOT_AUTHENTICATED.to_string())
        })?;
        Ok(Self {
            user,
            token: token.to_string(),
        })
    }
}

/// An authenticated user with admin rights; others get 403.
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser { user, .. } = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(ApiError::Forbidden("Admin privileges required".to_string()));
        }
        Ok(Self(user))
    }
}

/// The token of an `Authorization: Bearer <token>` header.
fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

// ---------------------------------------------------------------------------
// Client IP
// ---------------------------------------------------------------------------

/// Best-effort client address: proxy headers first, then the socket peer.
#[derive(Debug, Clone)]
pub struct ClientIp(pub Option<String>);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok());
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(Self(client_ip(
            header("x-forwarded-for"),
            header("x-real-ip"),
            peer,
        )))
    }
}
