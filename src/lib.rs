pub mod api;
pub mod auth;
pub mod cache;
pub mod cli;
pub mod codes;
pub mod db;
pub mod filter;
pub mod jwt;
pub mod mailer;
pub mod oauth;
pub mod password;
pub mod rate_limit;
pub mod roles;
pub mod session;

use api::{AppContext, create_api_router, create_redirect_router};
use auth::CookieSettings;
use axum::Router;
use cache::Cache;
use cli::IpExtractor;
use db::Database;
use jwt::JwtConfig;
use mailer::Mailer;
use oauth::IdentityProvider;
use rate_limit::{RateLimitConfig, RateLimitSettings};
use roles::RoleCatalog;
use session::Sessions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// JWT secret for signing tokens
    pub jwt_secret: Vec<u8>,
    /// Web UI origin used in short links and email links
    pub base_ui_host: String,
    /// Domain and Secure flag of the session cookie
    pub cookies: CookieSettings,
    pub access_token_ttl: chrono::Duration,
    pub refresh_token_ttl: chrono::Duration,
    /// Backing store of the role catalog cache
    pub cache: Cache,
    pub role_cache_ttl: Duration,
    pub mailer: Mailer,
    pub identity_provider: Arc<dyn IdentityProvider>,
    pub rate_limits: RateLimitSettings,
    /// Proxy header carrying the client IP. `None` uses the socket address
    pub ip_extractor: Option<IpExtractor>,
}

fn rate_limit_config(config: &ServerConfig) -> Arc<RateLimitConfig> {
    Arc::new(RateLimitConfig::new(
        &config.rate_limits,
        config.ip_extractor.clone(),
    ))
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    create_app_with_rate_limits(config, rate_limit_config(config))
}

fn create_app_with_rate_limits(
    config: &ServerConfig,
    rate_limits: Arc<RateLimitConfig>,
) -> Router {
    let jwt = Arc::new(JwtConfig::new(&config.jwt_secret));
    let sessions = Sessions::new(jwt, config.db.clone())
        .with_ttls(config.access_token_ttl, config.refresh_token_ttl);
    let roles = RoleCatalog::new(
        config.db.clone(),
        config.cache.clone(),
        config.role_cache_ttl,
    );

    let ctx = AppContext {
        db: config.db.clone(),
        sessions,
        roles,
        cookies: config.cookies.clone(),
        mailer: config.mailer.clone(),
        identity_provider: config.identity_provider.clone(),
        base_ui_host: Arc::from(config.base_ui_host.trim_end_matches('/')),
        rate_limits,
    };

    Router::new()
        .nest("/api", create_api_router(&ctx))
        .merge(create_redirect_router(config.db.clone()))
}

/// Run the server on the given listener. This function blocks until the server exits.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let rate_limits = rate_limit_config(&config);
    let _pruning = rate_limit::spawn_pruning(rate_limits.clone());
    let app = create_app_with_rate_limits(&config, rate_limits);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}
