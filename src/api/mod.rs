mod ad_references;
mod admin;
mod error;
mod jobs;
mod oauth;
mod redirects;
mod users;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};

use crate::auth::CookieSettings;
use crate::db::Database;
use crate::mailer::Mailer;
use crate::oauth::IdentityProvider;
use crate::rate_limit::RateLimitConfig;
use crate::roles::RoleCatalog;
use crate::session::{AuthResponse, Sessions};

pub use error::{ApiError, ResultExt};

/// Everything the route modules are built from.
#[derive(Clone)]
pub struct AppContext {
    pub db: Database,
    pub sessions: Sessions,
    pub roles: RoleCatalog,
    pub cookies: CookieSettings,
    pub mailer: Mailer,
    pub identity_provider: Arc<dyn IdentityProvider>,
    /// Web UI origin, without trailing slash.
    pub base_ui_host: Arc<str>,
    pub rate_limits: Arc<RateLimitConfig>,
}

/// Create the `/api` router.
pub fn create_api_router(ctx: &AppContext) -> Router {
    let users_state = users::UsersState {
        db: ctx.db.clone(),
        sessions: ctx.sessions.clone(),
        roles: ctx.roles.clone(),
        cookies: ctx.cookies.clone(),
        mailer: ctx.mailer.clone(),
        base_ui_host: ctx.base_ui_host.clone(),
    };

    let oauth_state = oauth::OAuthState {
        db: ctx.db.clone(),
        sessions: ctx.sessions.clone(),
        roles: ctx.roles.clone(),
        cookies: ctx.cookies.clone(),
        provider: ctx.identity_provider.clone(),
    };

    let jobs_state = jobs::JobsState {
        db: ctx.db.clone(),
        sessions: ctx.sessions.clone(),
        roles: ctx.roles.clone(),
        cookies: ctx.cookies.clone(),
        base_ui_host: ctx.base_ui_host.clone(),
    };

    let admin_state = admin::AdminState {
        db: ctx.db.clone(),
        sessions: ctx.sessions.clone(),
        roles: ctx.roles.clone(),
        cookies: ctx.cookies.clone(),
    };

    Router::new()
        .nest(
            "/users",
            users::router(users_state.clone(), ctx.rate_limits.clone()),
        )
        .nest("/talents", users::talents_router(users_state))
        .nest("/auth", oauth::router(oauth_state))
        .nest("/jobs", jobs::router(jobs_state))
        .nest("/ad-references", ad_references::router(ctx.db.clone()))
        .nest("/admin", admin::router(admin_state))
}

/// Public short-link redirects, mounted at the root.
pub fn create_redirect_router(db: Database) -> Router {
    redirects::router(db)
}

/// Absolute `http`/`https` URL. Stored links end up in `href`s and redirects.
pub(crate) fn is_web_url(value: &str) -> bool {
    url::Url::parse(value.trim())
        .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .unwrap_or(false)
}

/// JSON auth response carrying the access token cookie.
pub(crate) fn session_response(cookies: &CookieSettings, auth: AuthResponse) -> Response {
    let cookie = cookies.session_cookie(&auth.access_token, auth.max_age());
    let mut response = Json(auth).into_response();
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

/// Attach a cookie-clearing header to `response`.
pub(crate) fn clear_session(cookies: &CookieSettings, mut response: Response) -> Response {
    if let Ok(value) = HeaderValue::from_str(&cookies.clear_session_cookie()) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_web_url() {
        assert!(is_web_url("https://example.com/apply"));
        assert!(is_web_url("http://localhost:3000/x"));
        assert!(!is_web_url("javascript:alert(1)"));
        assert!(!is_web_url("data:text/html,hi"));
        assert!(!is_web_url("ftp://example.com/file"));
        assert!(!is_web_url("/relative/path"));
        assert!(!is_web_url(""));
    }
}
