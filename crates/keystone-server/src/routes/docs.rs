// Generated OpenAPI document and a Swagger UI page that renders it.

use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::openapi::{Components, OpenApi as OpenApiDoc};
use utoipa::{Modify, OpenApi};

use crate::routes::{auth, health, users};
use crate::schemas;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Keystone API",
        description = "Account service: authentication, registration and user management."
    ),
    paths(
        auth::login,
        auth::refresh,
        auth::logout,
        auth::validate,
        auth::me,
        auth::password_reset,
        auth::password_reset_confirm,
        auth::password_change,
        users::register,
        users::me,
        users::update_me,
        users::update_my_password,
        users::my_profile,
        users::update_my_profile,
        users::delete_me,
        users::list_users,
        users::get_user,
        users::update_user,
        users::delete_user,
        users::restore_user,
        users::verify_email,
        users::verify_phone,
        health::health,
        health::health_detailed,
    ),
    components(schemas(
        schemas::ErrorBody,
        schemas::MessageResponse,
        schemas::LoginRequest,
        schemas::LoginResponse,
        schemas::RefreshTokenRequest,
        schemas::RefreshTokenResponse,
        schemas::LogoutRequest,
        schemas::TokenValidationRequest,
        schemas::TokenValidationResponse,
        schemas::UserInfoResponse,
        schemas::PasswordResetRequest,
        schemas::PasswordResetConfirm,
        schemas::PasswordChangeRequest,
        schemas::UserCreate,
        schemas::UserUpdateRequest,
        schemas::UserResponse,
        schemas::UserProfileResponse,
        schemas::UserProfileUpdate,
        schemas::UserDetailResponse,
        schemas::UserListResponse,
        schemas::HealthResponse,
        schemas::DatabaseCheck,
        schemas::CacheCheck,
        schemas::SystemCheck,
        schemas::HealthChecks,
        schemas::DetailedHealthResponse,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Login, tokens and password flows"),
        (name = "users", description = "Registration, self-service and admin user management"),
        (name = "health", description = "Service health"),
    )
)]
pub struct ApiDoc;

/// Registers the `bearer` security scheme referenced by protected paths.
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut OpenApiDoc) {
        let components = openapi.components.get_or_insert_with(Components::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/openapi.json", get(openapi_json))
        .route("/api/docs", get(swagger_ui))
}

async fn openapi_json() -> Json<OpenApiDoc> {
    Json(ApiDoc::openapi())
}

async fn swagger_ui() -> Html<&'static str> {
    Html(SWAGGER_PAGE)
}

const SWAGGER_PAGE: &str = r##"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Keystone API</title>
  <link rel="stylesheet" href="https://cdn.jsdelivr.net/npm/swagger-ui-dist@5/swagger-ui.css">
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://cdn.jsdelivr.net/npm/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.ui = SwaggerUIBundle({
      url: "/api/openapi.json",
      dom_id: "#swagger-ui",
      persistAuthorization: true
    });
  </script>
</body>
</html>
"##;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route_and_the_bearer_scheme() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let paths = doc["paths"].as_object().unwrap();
        for path in [
            "/api/auth/login",
            "/api/auth/password/reset/confirm",
            "/api/users/register",
            "/api/users/{id}/restore",
            "/api/health/detailed",
        ] {
            assert!(paths.contains_key(path), "missing {path}");
        }
        assert_eq!(
            doc["components"]["securitySchemes"]["bearer"]["scheme"],
            "bearer"
        );
    }

    #[test]
    fn protected_routes_declare_security() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        assert!(doc["paths"]["/api/auth/me"]["get"]["security"].is_array());
        assert!(doc["paths"]["/api/auth/login"]["post"]["security"].is_null());
    }
}
