//! CLI argument parsing, validation, and startup helpers.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::ServerConfig;
use crate::auth::CookieSettings;
use crate::cache::Cache;
use crate::db::Database;
use crate::mailer::Mailer;
use crate::oauth::{GOOGLE_USERINFO_URL, GoogleProvider, IdentityProvider};
use crate::rate_limit::RateLimitSettings;
use crate::roles::RoleCatalog;
use clap::Parser;
use tracing::{error, info, warn};
use url::Url;

const MIN_JWT_SECRET_LENGTH: usize = 32;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Header a trusted reverse proxy uses to pass on the client address.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientIpHeader {
    /// `X-Forwarded-For`, read from its last entry (the one the proxy appended)
    XForwardFor,
    XRealIp,
    CfConnectingIp,
}

/// Reads the client IP out of a proxy header.
#[derive(Clone)]
pub struct IpExtractor {
    pub header_name: &'static str,
    parse: fn(&str) -> Result<String, &'static str>,
}

impl IpExtractor {
    pub fn extract(&self, header_value: &str) -> Result<String, &'static str> {
        (self.parse)(header_value)
    }
}

fn parse_ip(value: &str) -> Result<String, &'static str> {
    value
        .trim()
        .parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .map_err(|_| "IP header is not an IP address")
}

fn parse_forwarded_for(value: &str) -> Result<String, &'static str> {
    let last = value.rsplit(',').next().ok_or("IP header is empty")?;
    parse_ip(last)
}

impl From<ClientIpHeader> for IpExtractor {
    fn from(header: ClientIpHeader) -> Self {
        match header {
            ClientIpHeader::XForwardFor => Self {
                header_name: "x-forwarded-for",
                parse: parse_forwarded_for,
            },
            ClientIpHeader::XRealIp => Self {
                header_name: "x-real-ip",
                parse: parse_ip,
            },
            ClientIpHeader::CfConnectingIp => Self {
                header_name: "cf-connecting-ip",
                parse: parse_ip,
            },
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "jobboard", about = "Job board API server")]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "7291")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, default_value = "jobboard.db")]
    pub database: String,

    /// Web UI origin, used for short links and email links (e.g. "https://jobs.example.com")
    #[arg(long, default_value = "http://localhost:3000")]
    pub base_ui_host: String,

    /// Domain attribute of the session cookie
    #[arg(long)]
    pub cookie_domain: Option<String>,

    /// Access token lifetime in minutes
    #[arg(long, default_value = "60")]
    pub access_token_ttl_minutes: i64,

    /// Refresh token lifetime in hours
    #[arg(long, default_value = "24")]
    pub refresh_token_ttl_hours: i64,

    /// Redis URL for the role cache. Without it an in-process cache is used
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// How long the role catalog stays cached, in seconds
    #[arg(long, default_value = "300")]
    pub role_cache_ttl_secs: u64,

    /// HTTP endpoint of the mail relay. Without it email is disabled
    #[arg(long, requires = "mail_from")]
    pub mail_relay_url: Option<String>,

    /// Sender address for outgoing email
    #[arg(long)]
    pub mail_from: Option<String>,

    /// Google userinfo endpoint
    #[arg(long, default_value = GOOGLE_USERINFO_URL)]
    pub google_userinfo_url: String,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Take the client IP from this header instead of the socket address.
    /// Only set it behind a reverse proxy that overwrites or appends the header
    #[arg(long, value_enum)]
    pub ip_header: Option<ClientIpHeader>,

    /// Grant the admin role to the account with this email on startup
    #[arg(long)]
    pub grant_admin: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load JWT secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var("JWT_SECRET") {
        // SAFETY: startup is still single-threaded and nothing else reads this variable.
        unsafe { std::env::remove_var("JWT_SECRET") };
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    if secret.len() < MIN_JWT_SECRET_LENGTH {
        error!(
            "JWT secret is shorter than {} characters. Use a longer secret",
            MIN_JWT_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Parse and validate the web UI origin.
/// Returns None and logs an error if validation fails.
pub fn validate_base_ui_host(base_ui_host: &str) -> Option<Url> {
    let url = match Url::parse(base_ui_host) {
        Ok(url) => url,
        Err(e) => {
            error!(origin = %base_ui_host, error = %e, "Invalid base-ui-host URL");
            return None;
        }
    };

    let is_https = url.scheme() == "https";
    let is_localhost = url.host_str() == Some("localhost");

    if !is_https && !is_localhost {
        error!("base-ui-host must use HTTPS for non-localhost deployments");
        return None;
    }

    Some(url)
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}

/// Connect to Redis when configured, otherwise use an in-process cache.
pub async fn open_cache(redis_url: Option<&str>) -> Option<Cache> {
    let Some(url) = redis_url else {
        info!("No Redis URL configured, using in-process cache");
        return Some(Cache::memory());
    };

    match Cache::redis(url).await {
        Ok(cache) => {
            info!("Connected to Redis");
            Some(cache)
        }
        Err(e) => {
            error!(error = %e, "Failed to connect to Redis");
            None
        }
    }
}

pub fn build_mailer(relay_url: Option<&str>, from: Option<&str>) -> Option<Mailer> {
    let (Some(relay_url), Some(from)) = (relay_url, from) else {
        warn!("No mail relay configured, outgoing email is disabled");
        return Some(Mailer::Disabled);
    };

    match Mailer::http(relay_url, from) {
        Ok(mailer) => Some(mailer),
        Err(e) => {
            error!(error = %e, "Failed to set up mail relay client");
            None
        }
    }
}

pub fn build_identity_provider(userinfo_url: &str) -> Option<Arc<dyn IdentityProvider>> {
    match GoogleProvider::new(userinfo_url) {
        Ok(provider) => Some(Arc::new(provider)),
        Err(e) => {
            error!(error = %e, "Failed to set up identity provider client");
            None
        }
    }
}

/// Handle the --grant-admin flag: add the admin role to an existing account.
pub async fn handle_grant_admin(db: &Database, cache: &Cache, email: &str) {
    let user = match db.users().get_by_email(&email.trim().to_lowercase()).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            error!(email = %email, "No account with this email");
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "Failed to look up account");
            std::process::exit(1);
        }
    };

    let catalog = RoleCatalog::new(db.clone(), cache.clone(), Duration::ZERO);
    let admin_ids = match catalog.ids_for(&["admin".to_string()]).await {
        Ok(Ok(ids)) => ids,
        Ok(Err(_)) => {
            error!("Admin role missing from role catalog");
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "Failed to load roles");
            std::process::exit(1);
        }
    };

    let mut role_ids = user.role_ids.clone();
    for id in admin_ids {
        if !role_ids.contains(&id) {
            role_ids.push(id);
        }
    }

    if let Err(e) = db.users().set_role_ids(&user.id, &role_ids).await {
        error!(error = %e, "Failed to grant admin role");
        std::process::exit(1);
    }
    info!(user_id = %user.id, email = %user.email, "Admin role granted");
}

/// Everything `build_config` needs besides the parsed arguments.
pub struct Services {
    pub db: Database,
    pub cache: Cache,
    pub mailer: Mailer,
    pub identity_provider: Arc<dyn IdentityProvider>,
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    args: &Args,
    base_ui_host: Url,
    jwt_secret: String,
    services: Services,
) -> ServerConfig {
    let secure_cookies = base_ui_host.scheme() == "https";

    ServerConfig {
        db: services.db,
        jwt_secret: jwt_secret.into_bytes(),
        base_ui_host: base_ui_host.as_str().trim_end_matches('/').to_string(),
        cookies: CookieSettings {
            domain: args.cookie_domain.clone(),
            secure: secure_cookies,
        },
        access_token_ttl: chrono::Duration::minutes(args.access_token_ttl_minutes.max(1)),
        refresh_token_ttl: chrono::Duration::hours(args.refresh_token_ttl_hours.max(1)),
        cache: services.cache,
        role_cache_ttl: Duration::from_secs(args.role_cache_ttl_secs),
        mailer: services.mailer,
        identity_provider: services.identity_provider,
        rate_limits: RateLimitSettings::default(),
        ip_extractor: args.ip_header.map(IpExtractor::from),
    }
}
