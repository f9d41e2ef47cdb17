//! Axum extractors for authentication.

use std::marker::PhantomData;
use std::ops::Deref;

use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::error;

use super::cookie::{SESSION_COOKIE_NAME, extract_token};
use super::errors::{ApiAuthError, AuthErrorKind};
use super::state::HasAuthState;
use crate::jwt::Identity;
use crate::roles::has_required_role;

/// Role names a route requires. Empty admits any authenticated user.
pub trait RoleConstraint: Send + Sync + 'static {
    const REQUIRED: &'static [&'static str];
}

pub struct AnyRole;

impl RoleConstraint for AnyRole {
    const REQUIRED: &'static [&'static str] = &[];
}

pub struct AdminOnly;

impl RoleConstraint for AdminOnly {
    const REQUIRED: &'static [&'static str] = &["admin"];
}

/// Admins and recruiters.
pub struct StaffOnly;

impl RoleConstraint for StaffOnly {
    const REQUIRED: &'static [&'static str] = &["admin", "recruiter"];
}

/// Validate the request's token, then check roles against the catalog.
async fn authenticate_request<S>(
    parts: &Parts,
    state: &S,
    required: &[&str],
) -> Result<Identity, AuthErrorKind>
where
    S: HasAuthState + Send + Sync,
{
    let token = extract_token(&parts.headers, SESSION_COOKIE_NAME)?;
    let identity = state.sessions().jwt().validate_token(token)?;

    if required.is_empty() {
        return Ok(identity);
    }

    let role_names = state
        .role_catalog()
        .user_role_names(&identity.id)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to resolve user roles");
            AuthErrorKind::StoreError
        })?
        .ok_or(AuthErrorKind::Unauthenticated)?;

    if !has_required_role(required, &role_names) {
        return Err(AuthErrorKind::Unauthorized);
    }

    Ok(identity)
}

/// Authenticated caller holding one of `R`'s roles.
pub struct Auth<R: RoleConstraint = AnyRole> {
    pub identity: Identity,
    _role: PhantomData<fn() -> R>,
}

impl<R: RoleConstraint> Deref for Auth<R> {
    type Target = Identity;

    fn deref(&self) -> &Identity {
        &self.identity
    }
}

impl<S, R> FromRequestParts<S> for Auth<R>
where
    S: HasAuthState + Send + Sync,
    R: RoleConstraint,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        authenticate_request(parts, state, R::REQUIRED)
            .await
            .map(|identity| Auth {
                identity,
                _role: PhantomData,
            })
            .map_err(|kind| ApiAuthError::new(kind, state.cookies()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::extract::Request;
    use chrono::Duration;

    use super::*;
    use crate::auth::CookieSettings;
    use crate::cache::Cache;
    use crate::db::{Database, NewUser};
    use crate::jwt::JwtConfig;
    use crate::roles::{DEFAULT_ROLE_CACHE_TTL, RoleCatalog};
    use crate::session::Sessions;

    #[derive(Clone)]
    struct TestState {
        sessions: Sessions,
        roles: RoleCatalog,
        cookies: CookieSettings,
    }

    crate::impl_has_auth_state!(TestState);

    async fn setup(role: &str) -> (TestState, Identity) {
        let db = Database::open(":memory:").await.unwrap();
        let roles = RoleCatalog::new(db.clone(), Cache::memory(), DEFAULT_ROLE_CACHE_TTL);
        let role_ids = roles.ids_for(&[role.to_string()]).await.unwrap().unwrap();
        let user = db
            .users()
            .create(&NewUser {
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                email: "ada@example.com".into(),
                password_hash: None,
                provider: "local".into(),
                profile_image_url: String::new(),
                role_ids,
                is_email_confirmed: true,
                validation_token: None,
            })
            .await
            .unwrap();
        let jwt = Arc::new(JwtConfig::new(b"test-secret-key-for-testing-1234"));
        let sessions = Sessions::new(jwt, db);
        let state = TestState {
            sessions,
            roles,
            cookies: CookieSettings::default(),
        };
        (state, Identity::from(&user))
    }

    fn parts_with_bearer(token: &str) -> Parts {
        Request::builder()
            .header("authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap()
            .into_parts()
            .0
    }

    #[tokio::test]
    async fn test_any_role_accepts_valid_token() {
        let (state, identity) = setup("user").await;
        let token = state.sessions.issue_access_token(&identity).unwrap();

        let mut parts = parts_with_bearer(&token.token);
        let auth = Auth::<AnyRole>::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(auth.id, identity.id);
    }

    #[tokio::test]
    async fn test_role_mismatch_is_unauthorized() {
        let (state, identity) = setup("user").await;
        let token = state.sessions.issue_access_token(&identity).unwrap();

        let mut parts = parts_with_bearer(&token.token);
        let err = Auth::<AdminOnly>::from_request_parts(&mut parts, &state)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, AuthErrorKind::Unauthorized);

        let mut parts = parts_with_bearer(&token.token);
        let err = Auth::<StaffOnly>::from_request_parts(&mut parts, &state)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, AuthErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn test_staff_accepts_recruiter() {
        let (state, identity) = setup("recruiter").await;
        let token = state.sessions.issue_access_token(&identity).unwrap();

        let mut parts = parts_with_bearer(&token.token);
        assert!(Auth::<StaffOnly>::from_request_parts(&mut parts, &state).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_and_missing_tokens() {
        let (state, identity) = setup("admin").await;
        let expired = state
            .sessions
            .jwt()
            .issue_access_token(&identity, Duration::seconds(-1))
            .unwrap();

        let mut parts = parts_with_bearer(&expired.token);
        let err = Auth::<AnyRole>::from_request_parts(&mut parts, &state)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, AuthErrorKind::ExpiredToken);

        let (mut parts, _) = Request::builder().body(Body::empty()).unwrap().into_parts();
        let err = Auth::<AnyRole>::from_request_parts(&mut parts, &state)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, AuthErrorKind::TokenNotFound);
    }
}
