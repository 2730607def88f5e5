// HTTP tests for health, the OpenAPI document, static files, CORS and the
// fallback error envelope.

mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use common::{app, app_with};
use keystone_core::Config;
use tower::ServiceExt;

#[tokio::test]
async fn health_reports_components() {
    let app = app();
    for uri in ["/api/health", "/api/health/"] {
        let reply = app.get(uri, None).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["status"], "healthy");
        assert_eq!(reply.body["database"], "healthy");
        assert_eq!(reply.body["cache"], "healthy");
        assert!(reply.body["uptime"].as_str().unwrap().ends_with('s'));
        assert!(reply.body["timestamp"].is_string());
    }
}

#[tokio::test]
async fn detailed_health_counts_users() {
    let app = app();
    app.create_user("counted");

    let reply = app.get("/api/health/detailed", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    let checks = &reply.body["checks"];
    assert_eq!(checks["database"]["connection"], "healthy");
    assert_eq!(checks["database"]["user_count"], 1);
    assert!(checks["database"]["response_time_ms"].is_number());
    assert_eq!(checks["cache"]["read_write"], "healthy");
    assert_eq!(checks["system"]["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = app();
    let reply = app.get("/api/openapi.json", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body["openapi"].as_str().unwrap().starts_with("3."));
    assert_eq!(reply.body["info"]["title"], "Keystone API");
    assert!(reply.body["paths"]["/api/users/me/profile"]["put"].is_object());
    assert_eq!(
        reply.body["paths"]["/api/auth/login"]["post"]["responses"]["422"]["content"]
            ["application/json"]["schema"]["$ref"],
        "#/components/schemas/ErrorBody"
    );
    assert!(reply.body["components"]["schemas"]["ErrorBody"].is_object());
}

#[tokio::test]
async fn docs_page_loads_swagger_ui() {
    let app = app();
    let reply = app.get("/api/docs", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.text.contains("SwaggerUIBundle"));
    assert!(reply.text.contains("/api/openapi.json"));
    assert!(reply.text.contains(r##"dom_id: "#swagger-ui""##));
    assert!(reply.text.trim_end().ends_with("</html>"));
}

#[tokio::test]
async fn static_client_script_is_served() {
    let mut config = Config::for_tests();
    config.app.static_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/../../static").to_string();
    let app = app_with(config);

    let reply = app.get("/static/js/app.js", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.text.contains("function apiRequest"));
}

#[tokio::test]
async fn unknown_paths_get_json_404() {
    let app = app();
    let reply = app.get("/api/nope", None).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body["error"], "not_found");
    assert_eq!(reply.body["code"], 404);
}

#[tokio::test]
async fn cors_preflight_allows_configured_origin() {
    let app = app();
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/auth/login")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(
            header::ACCESS_CONTROL_REQUEST_HEADERS,
            "authorization,content-type",
        )
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "http://localhost:3000"
    );

    let foreign = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/auth/login")
        .header(header::ORIGIN, "http://evil.example")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(foreign).await.unwrap();
    assert!(response
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_none());
}

#[tokio::test]
async fn wildcard_origin_in_config_is_ignored() {
    let mut config = Config::for_tests();
    config.server.allowed_origins = vec!["*".into(), "http://localhost:3000".into()];
    let app = app_with(config);

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/auth/login")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "http://localhost:3000"
    );

    let foreign = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/auth/login")
        .header(header::ORIGIN, "http://evil.example")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(foreign).await.unwrap();
    assert!(response
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_none());
}
