// Request and response bodies for the JSON API, with their OpenAPI schemas.
//
// Domain types from keystone-core are converted at this boundary so the
// password hash and other internals never reach a response.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use keystone_core::model::{Gender, ProfileUpdate, UserFilter, UserStatus, UserType, UserUpdate};
use keystone_core::{User, UserProfile};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::error::ApiError;

// ---------------------------------------------------------------------------
// Common
// ---------------------------------------------------------------------------

/// Error envelope returned for every failed request.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Machine-readable kind, e.g. `validation_error`.
    pub error: String,
    pub message: String,
    /// HTTP status code.
    pub code: u16,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Username, email address or phone number.
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub user_id: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RefreshTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenValidationRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenValidationResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenValidationResponse {
    pub fn invalid() -> Self {
        Self {
            valid: false,
            user_id: None,
            expires_at: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserInfoResponse {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub nickname: String,
    pub user_type: String,
    pub status: String,
    pub email_verified: bool,
    pub phone_verified: bool,
}

impl From<&User> for UserInfoResponse {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            nickname: user.nickname.clone(),
            user_type: user.user_type.as_str().to_string(),
            status: user.status.as_str().to_string(),
            email_verified: user.email_verified,
            phone_verified: user.phone_verified,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PasswordResetConfirm {
    pub token: String,
    pub new_password: String,
    pub new_password_confirm: String,
}

/// Used by both `/auth/password/change` and `/users/me/password`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PasswordChangeRequest {
    pub old_password: String,
    pub new_password: String,
    pub new_password_confirm: String,
}

/// Reject mismatched password confirmation.
pub fn require_match(password: &str, confirm: &str) -> Result<(), ApiError> {
    if password == confirm {
        Ok(())
    } else {
        Err(ApiError::validation("Passwords do not match"))
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct UserCreate {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password_confirm: String,
    pub nickname: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UserUpdateRequest {
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub bio: Option<String>,
    pub timezone: Option<String>,
    pub language: Option<String>,
    /// Avatar URL.
    pub avatar: Option<String>,
}

impl From<UserUpdateRequest> for UserUpdate {
    fn from(req: UserUpdateRequest) -> Self {
        Self {
            nickname: req.nickname,
            email: req.email,
            phone_number: req.phone_number,
            birth_date: req.birth_date,
            bio: req.bio,
            timezone: req.timezone,
            language: req.language,
            avatar: req.avatar,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub nickname: String,
    pub phone_number: Option<String>,
    pub user_type: String,
    pub status: String,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub avatar_url: Option<String>,
    pub bio: String,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            nickname: user.nickname.clone(),
            phone_number: user.phone_number.clone(),
            user_type: user.user_type.as_str().to_string(),
            status: user.status.as_str().to_string(),
            email_verified: user.email_verified,
            phone_verified: user.phone_verified,
            avatar_url: user.avatar.clone(),
            bio: user.bio.clone(),
            last_login: user.last_login,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserProfileResponse {
    pub id: i64,
    pub user_id: i64,
    /// One of `M`, `F`, `O`, `N`.
    pub gender: Option<String>,
    pub occupation: String,
    pub company: String,
    pub address: String,
    pub website: String,
    pub interests: String,
    pub social_links: BTreeMap<String, String>,
    pub tags: Vec<String>,
    #[schema(value_type = Object)]
    pub privacy_settings: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserProfile> for UserProfileResponse {
    fn from(profile: UserProfile) -> Self {
        Self {
            id: profile.id,
            user_id: profile.user_id,
            gender: profile.gender.map(|g| g.as_str().to_string()),
            occupation: profile.occupation,
            company: profile.company,
            address: profile.address,
            website: profile.website,
            interests: profile.interests,
            social_links: profile.social_links,
            tags: profile.tags,
            privacy_settings: profile.privacy_settings,
            created_at: profile.created_at,
            updated_at: profile.updated_at,
        }
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UserProfileUpdate {
    pub gender: Option<String>,
    pub occupation: Option<String>,
    pub company: Option<String>,
    pub address: Option<String>,
    pub website: Option<String>,
    pub interests: Option<String>,
    pub social_links: Option<BTreeMap<String, String>>,
    pub tags: Option<Vec<String>>,
    #[schema(value_type = Option<Object>)]
    pub privacy_settings: Option<serde_json::Map<String, serde_json::Value>>,
}

impl TryFrom<UserProfileUpdate> for ProfileUpdate {
    type Error = ApiError;

    fn try_from(req: UserProfileUpdate) -> Result<Self, Self::Error> {
        let gender = req
            .gender
            .map(|g| {
                g.parse::<Gender>()
                    .map_err(|_| ApiError::validation("Gender must be one of M, F, O, N"))
            })
            .transpose()?;
        Ok(Self {
            gender,
            occupation: req.occupation,
            company: req.company,
            address: req.address,
            website: req.website,
            interests: req.interests,
            social_links: req.social_links,
            tags: req.tags,
            privacy_settings: req.privacy_settings,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserDetailResponse {
    pub user: UserResponse,
    pub profile: Option<UserProfileResponse>,
}

/// Admin listing query: filters plus pagination.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UserListQuery {
    /// 1-based page number.
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    /// Substring match.
    pub username: Option<String>,
    /// Substring match.
    pub email: Option<String>,
    /// Substring match.
    pub nickname: Option<String>,
    /// `regular`, `admin` or `superuser`.
    pub user_type: Option<String>,
    /// `active`, `inactive`, `suspended` or `deleted`.
    pub status: Option<String>,
    pub email_verified: Option<bool>,
    pub phone_verified: Option<bool>,
    pub created_at_start: Option<DateTime<Utc>>,
    pub created_at_end: Option<DateTime<Utc>>,
}

impl UserListQuery {
    pub fn filter(&self) -> Result<UserFilter, ApiError> {
        let user_type = self
            .user_type
            .as_deref()
            .map(str::parse::<UserType>)
            .transpose()
            .map_err(|e| ApiError::validation(format!("Invalid filter: {e}")))?;
        let status = self
            .status
            .as_deref()
            .map(str::parse::<UserStatus>)
            .transpose()
            .map_err(|e| ApiError::validation(format!("Invalid filter: {e}")))?;
        Ok(UserFilter {
            username: self.username.clone(),
            email: self.email.clone(),
            nickname: self.nickname.clone(),
            user_type,
            status,
            email_verified: self.email_verified,
            phone_verified: self.phone_verified,
            created_at_start: self.created_at_start,
            created_at_end: self.created_at_end,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserListResponse {
    pub items: Vec<UserResponse>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// `healthy` or `unhealthy`.
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub database: String,
    pub cache: String,
    /// Seconds since start, e.g. `"42s"`.
    pub uptime: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DatabaseCheck {
    pub connection: String,
    pub response_time_ms: Option<f64>,
    pub user_count: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CacheCheck {
    pub connection: String,
    pub read_write: String,
    pub entries: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SystemCheck {
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthChecks {
    pub database: DatabaseCheck,
    pub cache: CacheCheck,
    pub system: SystemCheck,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DetailedHealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub checks: HealthChecks,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_update_rejects_unknown_gender() {
        let req = UserProfileUpdate {
            gender: Some("X".into()),
            ..UserProfileUpdate::default()
        };
        let err = ProfileUpdate::try_from(req).unwrap_err();
        assert_eq!(err.to_string(), "Gender must be one of M, F, O, N");

        let ok = UserProfileUpdate {
            gender: Some("F".into()),
            ..UserProfileUpdate::default()
        };
        assert_eq!(ProfileUpdate::try_from(ok).unwrap().gender, Some(Gender::F));
    }

    #[test]
    fn list_query_parses_enum_filters() {
        let query = UserListQuery {
            user_type: Some("admin".into()),
            status: Some("active".into()),
            ..UserListQuery::default()
        };
        let filter = query.filter().unwrap();
        assert_eq!(filter.user_type, Some(UserType::Admin));
        assert_eq!(filter.status, Some(UserStatus::Active));

        let bad = UserListQuery {
            status: Some("banned".into()),
            ..UserListQuery::default()
        };
        assert!(matches!(bad.filter(), Err(ApiError::Validation(_))));
    }

    #[test]
    fn validation_response_omits_absent_fields() {
        let json = serde_json::to_value(TokenValidationResponse::invalid()).unwrap();
        assert_eq!(json, serde_json::json!({"valid": false}));
    }
}
