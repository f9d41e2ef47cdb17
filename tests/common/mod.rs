#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, Request, StatusCode, header},
};
use jobboard::auth::CookieSettings;
use jobboard::cache::Cache;
use jobboard::db::Database;
use jobboard::mailer::Mailer;
use jobboard::oauth::{IdentityProvider, OAuthError, ProviderUser};
use jobboard::rate_limit::RateLimitSettings;
use jobboard::{ServerConfig, create_app};
use serde_json::{Value, json};
use tower::ServiceExt;

pub const JWT_SECRET: &[u8] = b"test-jwt-secret-at-least-32-bytes-long";
pub const PASSWORD: &str = "correct-horse-42";

/// Access token the stub provider accepts.
pub const GOOGLE_TOKEN: &str = "google-access-token";
pub const GOOGLE_EMAIL: &str = "gina@example.com";

/// Socket address every test request appears to come from.
pub const PEER_ADDR: &str = "127.0.0.1:40000";

/// Identity provider that knows a single verified account.
pub struct StubProvider;

#[async_trait]
impl IdentityProvider for StubProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn fetch_user(&self, access_token: &str) -> Result<ProviderUser, OAuthError> {
        if access_token != GOOGLE_TOKEN {
            return Err(OAuthError::Rejected);
        }
        Ok(ProviderUser {
            email: GOOGLE_EMAIL.to_string(),
            first_name: "Gina".to_string(),
            last_name: "Silva".to_string(),
            picture: "https://example.com/gina.png".to_string(),
            email_verified: true,
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub db: Database,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    /// All Set-Cookie header values.
    pub fn cookies(&self) -> Vec<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }
}

pub fn test_config(db: Database) -> ServerConfig {
    ServerConfig {
        db,
        jwt_secret: JWT_SECRET.to_vec(),
        base_ui_host: "http://localhost:3000".to_string(),
        cookies: CookieSettings::default(),
        access_token_ttl: chrono::Duration::hours(1),
        refresh_token_ttl: chrono::Duration::hours(24),
        cache: Cache::memory(),
        role_cache_ttl: Duration::from_secs(300),
        mailer: Mailer::Disabled,
        identity_provider: Arc::new(StubProvider),
        rate_limits: RateLimitSettings::relaxed(),
        ip_extractor: None,
    }
}

pub async fn create_test_app() -> TestApp {
    create_test_app_with(|_| {}).await
}

/// Test app whose configuration is adjusted by `configure` first.
pub async fn create_test_app_with(configure: impl FnOnce(&mut ServerConfig)) -> TestApp {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let mut config = test_config(db.clone());
    configure(&mut config);
    let router = create_app(&config);
    TestApp { router, db }
}

impl TestApp {
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> TestResponse {
        self.request_with_headers(method, uri, body, token, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let mut request = builder.body(body).unwrap();
        // What `into_make_service_with_connect_info` adds in a running server
        request
            .extensions_mut()
            .insert(ConnectInfo(PEER_ADDR.parse::<SocketAddr>().unwrap()));

        let response = self.router.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> TestResponse {
        self.request("GET", uri, None, token).await
    }

    pub async fn post(&self, uri: &str, body: Value, token: Option<&str>) -> TestResponse {
        self.request("POST", uri, Some(body), token).await
    }

    pub async fn sign_up(&self, first_name: &str, email: &str) -> TestResponse {
        self.post(
            "/api/users/signup",
            json!({
                "first_name": first_name,
                "last_name": "Tester",
                "email": email,
                "password": PASSWORD,
                "confirm_password": PASSWORD,
            }),
            None,
        )
        .await
    }

    /// Sign up and confirm an account, returning its id.
    pub async fn confirmed_user(&self, first_name: &str, email: &str) -> String {
        let response = self.sign_up(first_name, email).await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);

        let user = self.db.users().get_by_email(email).await.unwrap().unwrap();
        let token = user.validation_token.unwrap();
        assert!(self.db.users().confirm_email(&token).await.unwrap());
        user.id
    }

    /// Log in and return the access token.
    pub async fn login(&self, email: &str) -> String {
        let response = self
            .post(
                "/api/users/login",
                json!({ "email": email, "password": PASSWORD }),
                None,
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "{}", response.body);
        response.body["access_token"].as_str().unwrap().to_string()
    }

    /// Replace the user's roles with the named ones.
    pub async fn grant_roles(&self, user_id: &str, names: &[&str]) {
        let roles = self.db.roles().list().await.unwrap();
        let ids: Vec<String> = roles
            .into_iter()
            .filter(|role| names.contains(&role.name.as_str()))
            .map(|role| role.id)
            .collect();
        assert_eq!(ids.len(), names.len());
        assert!(self.db.users().set_role_ids(user_id, &ids).await.unwrap());
    }

    /// A confirmed, logged-in admin. Returns (user id, access token).
    pub async fn admin(&self) -> (String, String) {
        let id = self.confirmed_user("Ada", "ada@example.com").await;
        self.grant_roles(&id, &["admin", "user"]).await;
        let token = self.login("ada@example.com").await;
        (id, token)
    }
}
