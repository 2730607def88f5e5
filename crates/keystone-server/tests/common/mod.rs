// Shared fixtures for the HTTP tests: an in-memory app, a request helper
// that drives the router with `oneshot`, and user factories.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use keystone_core::model::NewUser;
use keystone_core::{Config, Database, MemoryMailer, User};
use keystone_server::{build_router, AppState};
use serde_json::Value;
use tower::ServiceExt;

pub const PASSWORD: &str = "testpassword123";

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub mailer: Arc<MemoryMailer>,
}

pub fn app() -> TestApp {
    app_with(Config::for_tests())
}

pub fn app_with(config: Config) -> TestApp {
    let db = Database::open(":memory:").expect("in-memory database should open");
    let mailer = Arc::new(MemoryMailer::new());
    let state = AppState::new(config, db, mailer.clone()).expect("state should build");
    TestApp {
        router: build_router(state.clone()),
        state,
        mailer,
    }
}

pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
    pub text: String,
}

impl TestApp {
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8_lossy(&bytes).into_owned();
        Reply {
            status,
            body: serde_json::from_slice(&bytes).unwrap_or(Value::Null),
            text,
        }
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> Reply {
        self.request(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> Reply {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    pub async fn put(&self, uri: &str, token: Option<&str>, body: Value) -> Reply {
        self.request(Method::PUT, uri, token, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> Reply {
        self.request(Method::DELETE, uri, token, None).await
    }

    pub fn create_user(&self, username: &str) -> User {
        self.state
            .users
            .create_user(
                NewUser {
                    username: username.into(),
                    email: format!("{username}@example.com"),
                    password: PASSWORD.into(),
                    nickname: Some(format!("{username} nick")),
                    ..NewUser::default()
                },
                None,
            )
            .expect("user should be created")
    }

    pub fn create_admin(&self, username: &str) -> User {
        self.state
            .users
            .create_superuser(username, &format!("{username}@example.com"), PASSWORD)
            .expect("admin should be created")
    }

    /// Log in over HTTP and return `(access_token, refresh_token)`.
    pub async fn login(&self, username: &str, password: &str) -> (String, String) {
        let reply = self
            .post(
                "/api/auth/login",
                None,
                serde_json::json!({"username": username, "password": password}),
            )
            .await;
        assert_eq!(reply.status, StatusCode::OK, "login failed: {}", reply.text);
        (
            reply.body["access_token"].as_str().unwrap().to_string(),
            reply.body["refresh_token"].as_str().unwrap().to_string(),
        )
    }
}
