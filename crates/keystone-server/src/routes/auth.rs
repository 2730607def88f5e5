// /api/auth: login, token refresh/validation, logout and password flows.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::info;

use crate::error::ApiError;
use crate::extract::{ApiJson, AuthUser, ClientIp};
use crate::routes::blocking;
use crate::schemas::{
    require_match, ErrorBody, LoginRequest, LoginResponse, LogoutRequest, MessageResponse,
    PasswordChangeRequest, PasswordResetConfirm, PasswordResetRequest, RefreshTokenRequest,
    RefreshTokenResponse, TokenValidationRequest, TokenValidationResponse, UserInfoResponse,
};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/validate", post(validate))
        .route("/api/auth/me", get(me))
        .route("/api/auth/password/reset", post(password_reset))
        .route(
            "/api/auth/password/reset/confirm",
            post(password_reset_confirm),
        )
        .route("/api/auth/password/change", post(password_change))
}

/// Log in with a username, email or phone number.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, body = LoginResponse),
        (status = 422, description = "Invalid credentials", body = ErrorBody),
    )
)]
pub async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let auth = state.auth.clone();
    let pair = blocking(move || {
        auth.login(&req.username, &req.password, ip.as_deref())
            .map_err(ApiError::from)
    })
    .await?;
    Ok(Json(LoginResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        token_type: pair.token_type,
        expires_in: pair.expires_in,
        user_id: pair.user_id,
    }))
}

/// Exchange the current refresh token for a new access token.
#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    tag = "auth",
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, body = RefreshTokenResponse),
        (status = 422, description = "Refresh token invalid or expired", body = ErrorBody),
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RefreshTokenRequest>,
) -> Result<Json<RefreshTokenResponse>, ApiError> {
    let token = state
        .auth
        .refresh_access_token(&req.refresh_token)
        .ok_or_else(|| ApiError::validation("Refresh token is invalid or expired"))?;
    Ok(Json(RefreshTokenResponse {
        access_token: token.access_token,
        token_type: token.token_type,
        expires_in: token.expires_in,
    }))
}

/// End the session: drops the refresh token and revokes the bearer token.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "auth",
    request_body = LogoutRequest,
    responses(
        (status = 200, body = MessageResponse),
        (status = 401, body = ErrorBody),
    ),
    security(("bearer" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    auth: AuthUser,
    body: Option<ApiJson<LogoutRequest>>,
) -> Json<MessageResponse> {
    let req = body.map(|ApiJson(req)| req).unwrap_or_default();
    state
        .auth
        .logout_user(auth.user.id, req.refresh_token.as_deref());
    state.auth.revoke_access_token(&auth.token);
    Json(MessageResponse::new("Logged out successfully"))
}

/// Check whether a token is a usable access token. Never fails.
#[utoipa::path(
    post,
    path = "/api/auth/validate",
    tag = "auth",
    request_body = TokenValidationRequest,
    responses((status = 200, body = TokenValidationResponse))
)]
pub async fn validate(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<TokenValidationRequest>,
) -> Json<TokenValidationResponse> {
    let response = match state.auth.verify_access(&req.token) {
        Some(claims) => TokenValidationResponse {
            valid: true,
            user_id: Some(claims.user_id),
            expires_at: state.auth.token_expiry(&req.token),
        },
        None => TokenValidationResponse::invalid(),
    };
    Json(response)
}

/// Basic information about the signed-in user.
#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "auth",
    operation_id = "current_user_info",
    responses(
        (status = 200, body = UserInfoResponse),
        (status = 401, body = ErrorBody),
    ),
    security(("bearer" = []))
)]
pub async fn me(auth: AuthUser) -> Json<UserInfoResponse> {
    Json(UserInfoResponse::from(&auth.user))
}

/// Mail a reset link. The reply does not reveal whether the address exists.
#[utoipa::path(
    post,
    path = "/api/auth/password/reset",
    tag = "auth",
    request_body = PasswordResetRequest,
    responses((status = 200, body = MessageResponse))
)]
pub async fn password_reset(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<PasswordResetRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let message = state
        .auth
        .request_password_reset(&req.email, &state.config.app.public_base_url)?;
    Ok(Json(MessageResponse::new(message)))
}

/// Set a new password with a mailed reset token.
#[utoipa::path(
    post,
    path = "/api/auth/password/reset/confirm",
    tag = "auth",
    request_body = PasswordResetConfirm,
    responses(
        (status = 200, body = MessageResponse),
        (status = 422, description = "Mismatch, weak password or bad token", body = ErrorBody),
    )
)]
pub async fn password_reset_confirm(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<PasswordResetConfirm>,
) -> Result<Json<MessageResponse>, ApiError> {
    require_match(&req.new_password, &req.new_password_confirm)?;
    let auth = state.auth.clone();
    blocking(move || {
        auth.reset_user_password(&req.token, &req.new_password)
            .map_err(ApiError::from)
    })
    .await?;
    Ok(Json(MessageResponse::new("Password has been reset")))
}

/// Change the password of the signed-in user. All sessions end.
#[utoipa::path(
    post,
    path = "/api/auth/password/change",
    tag = "auth",
    request_body = PasswordChangeRequest,
    responses(
        (status = 200, body = MessageResponse),
        (status = 401, body = ErrorBody),
        (status = 422, body = ErrorBody),
    ),
    security(("bearer" = []))
)]
pub async fn password_change(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(req): ApiJson<PasswordChangeRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    change_password(&state, auth, req).await?;
    Ok(Json(MessageResponse::new("Password changed successfully")))
}

/// Shared by `/auth/password/change` and `/users/me/password`.
pub(crate) async fn change_password(
    state: &AppState,
    auth: AuthUser,
    req: PasswordChangeRequest,
) -> Result<(), ApiError> {
    require_match(&req.new_password, &req.new_password_confirm)?;
    let service = state.auth.clone();
    let user_id = auth.user.id;
    blocking(move || {
        service.change_password(&auth.user, &req.old_password, &req.new_password)?;
        service.revoke_access_token(&auth.token);
        Ok(())
    })
    .await?;
    info!(user_id, "password changed, sessions ended");
    Ok(())
}
