// /api/users: registration, self-service account management and the admin
// user CRUD endpoints.

use axum::extract::State;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use keystone_core::model::{NewUser, ProfileUpdate};
use keystone_core::User;
use tracing::info;

use crate::error::ApiError;
use crate::extract::{AdminUser, ApiJson, ApiPath, ApiQuery, AuthUser, ClientIp};
use crate::routes::auth::change_password;
use crate::routes::blocking;
use crate::schemas::{
    require_match, ErrorBody, MessageResponse, PasswordChangeRequest, UserCreate,
    UserDetailResponse, UserListQuery, UserListResponse, UserProfileResponse, UserProfileUpdate,
    UserResponse, UserUpdateRequest,
};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/users/register", post(register))
        .route("/api/users/me", get(me).put(update_me).delete(delete_me))
        .route("/api/users/me/password", put(update_my_password))
        .route(
            "/api/users/me/profile",
            get(my_profile).put(update_my_profile),
        )
        .route("/api/users", get(list_users))
        .route("/api/users/", get(list_users))
        .route(
            "/api/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/api/users/:id/restore", post(restore_user))
        .route("/api/users/:id/verify-email", post(verify_email))
        .route("/api/users/:id/verify-phone", post(verify_phone))
}

fn detail(state: &AppState, user: &User) -> Result<UserDetailResponse, ApiError> {
    let profile = state.users.get_profile(user)?;
    Ok(UserDetailResponse {
        user: UserResponse::from(user),
        profile: Some(profile.into()),
    })
}

// ---------------------------------------------------------------------------
// Self-service
// ---------------------------------------------------------------------------

/// Create an account.
#[utoipa::path(
    post,
    path = "/api/users/register",
    tag = "users",
    request_body = UserCreate,
    responses(
        (status = 200, body = UserResponse),
        (status = 422, description = "Mismatch, duplicate or weak password", body = ErrorBody),
    )
)]
pub async fn register(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    ApiJson(req): ApiJson<UserCreate>,
) -> Result<Json<UserResponse>, ApiError> {
    require_match(&req.password, &req.password_confirm)?;
    let users = state.users.clone();
    let new = NewUser {
        username: req.username,
        email: req.email,
        password: req.password,
        nickname: req.nickname,
        phone_number: req.phone_number,
        ..NewUser::default()
    };
    let user = blocking(move || {
        users
            .create_user(new, ip.as_deref())
            .map_err(ApiError::from)
    })
    .await?;
    Ok(Json(UserResponse::from(&user)))
}

#[utoipa::path(
    get,
    path = "/api/users/me",
    tag = "users",
    operation_id = "current_user_detail",
    responses(
        (status = 200, body = UserDetailResponse),
        (status = 401, body = ErrorBody),
    ),
    security(("bearer" = []))
)]
pub async fn me(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<UserDetailResponse>, ApiError> {
    Ok(Json(detail(&state, &auth.user)?))
}

#[utoipa::path(
    put,
    path = "/api/users/me",
    tag = "users",
    request_body = UserUpdateRequest,
    responses(
        (status = 200, body = UserResponse),
        (status = 401, body = ErrorBody),
        (status = 422, body = ErrorBody),
    ),
    security(("bearer" = []))
)]
pub async fn update_me(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(req): ApiJson<UserUpdateRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state.users.update_user(&auth.user, req.into())?;
    Ok(Json(UserResponse::from(&user)))
}

/// Change password; same rules as `/api/auth/password/change`.
#[utoipa::path(
    put,
    path = "/api/users/me/password",
    tag = "users",
    request_body = PasswordChangeRequest,
    responses(
        (status = 200, body = MessageResponse),
        (status = 401, body = ErrorBody),
        (status = 422, body = ErrorBody),
    ),
    security(("bearer" = []))
)]
pub async fn update_my_password(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(req): ApiJson<PasswordChangeRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    change_password(&state, auth, req).await?;
    Ok(Json(MessageResponse::new("Password updated successfully")))
}

#[utoipa::path(
    get,
    path = "/api/users/me/profile",
    tag = "users",
    responses(
        (status = 200, body = UserProfileResponse),
        (status = 401, body = ErrorBody),
    ),
    security(("bearer" = []))
)]
pub async fn my_profile(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<UserProfileResponse>, ApiError> {
    let profile = state.users.get_profile(&auth.user)?;
    Ok(Json(profile.into()))
}

#[utoipa::path(
    put,
    path = "/api/users/me/profile",
    tag = "users",
    request_body = UserProfileUpdate,
    responses(
        (status = 200, body = UserProfileResponse),
        (status = 401, body = ErrorBody),
        (status = 422, body = ErrorBody),
    ),
    security(("bearer" = []))
)]
pub async fn update_my_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(req): ApiJson<UserProfileUpdate>,
) -> Result<Json<UserProfileResponse>, ApiError> {
    let update = ProfileUpdate::try_from(req)?;
    let profile = state.users.update_profile(&auth.user, update)?;
    Ok(Json(profile.into()))
}

/// Soft-delete the signed-in account. Its tokens stop working at once.
#[utoipa::path(
    delete,
    path = "/api/users/me",
    tag = "users",
    responses(
        (status = 200, body = MessageResponse),
        (status = 401, body = ErrorBody),
    ),
    security(("bearer" = []))
)]
pub async fn delete_me(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<MessageResponse>, ApiError> {
    state.users.soft_delete_user(&auth.user)?;
    state.auth.logout_user(auth.user.id, None);
    Ok(Json(MessageResponse::new("Account deleted successfully")))
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

/// Filtered, paginated user listing, newest first.
#[utoipa::path(
    get,
    path = "/api/users",
    tag = "users",
    params(UserListQuery),
    responses(
        (status = 200, body = UserListResponse),
        (status = 403, body = ErrorBody),
        (status = 422, body = ErrorBody),
    ),
    security(("bearer" = []))
)]
pub async fn list_users(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    ApiQuery(query): ApiQuery<UserListQuery>,
) -> Result<Json<UserListResponse>, ApiError> {
    let filter = query.filter()?;
    let page = query.page.unwrap_or(1);
    let page_size = query
        .page_size
        .unwrap_or_else(|| state.users.default_page_size());
    let result = state.users.list_users(&filter, page, page_size)?;
    Ok(Json(UserListResponse {
        items: result.items.iter().map(UserResponse::from).collect(),
        total: result.total,
        page: result.page,
        page_size: result.page_size,
        total_pages: result.total_pages,
    }))
}

#[utoipa::path(
    get,
    path = "/api/users/{id}",
    tag = "users",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, body = UserDetailResponse),
        (status = 403, body = ErrorBody),
        (status = 404, body = ErrorBody),
    ),
    security(("bearer" = []))
)]
pub async fn get_user(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<UserDetailResponse>, ApiError> {
    let user = state.users.get_active_user(id)?;
    Ok(Json(detail(&state, &user)?))
}

#[utoipa::path(
    put,
    path = "/api/users/{id}",
    tag = "users",
    params(("id" = i64, Path, description = "User id")),
    request_body = UserUpdateRequest,
    responses(
        (status = 200, body = UserResponse),
        (status = 403, body = ErrorBody),
        (status = 404, body = ErrorBody),
        (status = 422, body = ErrorBody),
    ),
    security(("bearer" = []))
)]
pub async fn update_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<UserUpdateRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state.users.get_active_user(id)?;
    let user = state.users.update_user(&user, req.into())?;
    info!(admin_id = admin.id, user_id = id, "user updated by admin");
    Ok(Json(UserResponse::from(&user)))
}

#[utoipa::path(
    delete,
    path = "/api/users/{id}",
    tag = "users",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, body = MessageResponse),
        (status = 403, body = ErrorBody),
        (status = 404, body = ErrorBody),
    ),
    security(("bearer" = []))
)]
pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    let user = state.users.get_active_user(id)?;
    state.users.soft_delete_user(&user)?;
    state.auth.logout_user(user.id, None);
    info!(admin_id = admin.id, user_id = id, "user deleted by admin");
    Ok(Json(MessageResponse::new("User deleted successfully")))
}

/// Undo a soft delete.
#[utoipa::path(
    post,
    path = "/api/users/{id}/restore",
    tag = "users",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, body = UserResponse),
        (status = 403, body = ErrorBody),
        (status = 404, body = ErrorBody),
    ),
    security(("bearer" = []))
)]
pub async fn restore_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state.users.restore_user(id)?;
    info!(admin_id = admin.id, user_id = id, "user restored by admin");
    Ok(Json(UserResponse::from(&user)))
}

#[utoipa::path(
    post,
    path = "/api/users/{id}/verify-email",
    tag = "users",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, body = UserResponse),
        (status = 403, body = ErrorBody),
        (status = 404, body = ErrorBody),
    ),
    security(("bearer" = []))
)]
pub async fn verify_email(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state.users.get_active_user(id)?;
    let user = state.users.verify_email(&user)?;
    Ok(Json(UserResponse::from(&user)))
}

#[utoipa::path(
    post,
    path = "/api/users/{id}/verify-phone",
    tag = "users",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, body = UserResponse),
        (status = 403, body = ErrorBody),
        (status = 404, body = ErrorBody),
    ),
    security(("bearer" = []))
)]
pub async fn verify_phone(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state.users.get_active_user(id)?;
    let user = state.users.verify_phone(&user)?;
    Ok(Json(UserResponse::from(&user)))
}
