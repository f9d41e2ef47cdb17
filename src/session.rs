//! Session lifecycle: access tokens plus one persisted refresh record per user.
//!
//! Access tokens are never stored. The refresh record is upserted by user id
//! on every sign-in, consulted when an access token has expired, and deleted
//! on logout or account removal. Refreshing does not rotate the record.
//!
//! Access tokens issued at sign-in carry the refresh token's `jti` as `sid`.
//! Only tokens whose `sid` names the record currently on file can be
//! refreshed, so signing in again retires every earlier session.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

use crate::db::{Database, DbError, Experience, TechExperience, User, UserLink};
use crate::jwt::{
    ACCESS_TOKEN_TTL_SECS, Identity, IssuedToken, JwtConfig, REFRESH_TOKEN_TTL_SECS, TokenError,
};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("store error: {0}")]
    Store(#[from] DbError),
    #[error("user no longer exists")]
    UserNotFound,
}

/// Account details returned to the signed-in user.
#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub links: Vec<UserLink>,
    pub user_name: String,
    pub profile_image_url: String,
    pub provider: String,
    pub city: String,
    pub state: String,
    pub about_me: String,
    pub experiences: Vec<Experience>,
    pub tech_experiences: Vec<TechExperience>,
    pub is_public: bool,
    pub created_at: String,
    pub last_update: String,
    pub last_login: Option<String>,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            links: user.links.clone(),
            user_name: user.user_name.clone().unwrap_or_default(),
            profile_image_url: user.profile_image_url.clone(),
            provider: user.provider.clone(),
            city: user.city.clone(),
            state: user.state.clone(),
            about_me: user.about_me.clone(),
            experiences: user.experiences.clone(),
            tech_experiences: user.tech_experiences.clone(),
            is_public: user.is_public,
            created_at: user.created_at.clone(),
            last_update: user.updated_at.clone(),
            last_login: user.last_login.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub success: bool,
    pub user_info: Option<UserInfo>,
    pub expiration_date: Option<DateTime<Utc>>,
}

impl AuthResponse {
    pub fn signed_in(access: IssuedToken, user: &User) -> Self {
        Self {
            access_token: access.token,
            success: true,
            user_info: Some(UserInfo::from(user)),
            expiration_date: Some(access.expires_at),
        }
    }

    /// The "no session" answer: nothing issued, nothing to store.
    pub fn disabled() -> Self {
        Self {
            access_token: String::new(),
            success: false,
            user_info: None,
            expiration_date: None,
        }
    }

    /// Seconds the access token stays valid, for the cookie `Max-Age`.
    pub fn max_age(&self) -> i64 {
        self.expiration_date
            .map(|at| (at - Utc::now()).num_seconds().max(0))
            .unwrap_or(0)
    }
}

#[derive(Debug)]
pub enum RefreshOutcome {
    Refreshed(AuthResponse),
    /// The user has no refresh record on file.
    NoRefreshToken,
}

#[derive(Clone)]
pub struct Sessions {
    jwt: Arc<JwtConfig>,
    db: Database,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl Sessions {
    pub fn new(jwt: Arc<JwtConfig>, db: Database) -> Self {
        Self {
            jwt,
            db,
            access_ttl: Duration::seconds(ACCESS_TOKEN_TTL_SECS),
            refresh_ttl: Duration::seconds(REFRESH_TOKEN_TTL_SECS),
        }
    }

    pub fn with_ttls(mut self, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        self.access_ttl = access_ttl;
        self.refresh_ttl = refresh_ttl;
        self
    }

    pub fn jwt(&self) -> &JwtConfig {
        &self.jwt
    }

    /// Sign an access token outside any session. It cannot be refreshed.
    pub fn issue_access_token(&self, identity: &Identity) -> Result<IssuedToken, SessionError> {
        Ok(self.jwt.issue_access_token(identity, self.access_ttl)?)
    }

    /// Sign an access token bound to the refresh record with `session_id`.
    pub fn issue_session_access_token(
        &self,
        identity: &Identity,
        session_id: &str,
    ) -> Result<IssuedToken, SessionError> {
        Ok(self
            .jwt
            .issue_session_access_token(identity, session_id, self.access_ttl)?)
    }

    /// Sign a refresh token and store it as the user's only refresh record.
    /// Returns the issued token and its session id.
    pub async fn issue_refresh_token(
        &self,
        identity: &Identity,
    ) -> Result<(IssuedToken, String), SessionError> {
        let issued = self.jwt.issue_refresh_token(identity, self.refresh_ttl)?;
        let session_id = issued.id.clone().ok_or(TokenError::Invalid)?;
        self.db
            .refresh_tokens()
            .upsert(&identity.id, &session_id, &issued.token, &issued.expires_at)
            .await?;
        Ok((issued, session_id))
    }

    /// Start a session for `user`: refresh record upserted, access token returned.
    pub async fn sign_in(&self, user: &User) -> Result<AuthResponse, SessionError> {
        let identity = Identity::from(user);
        let (_, session_id) = self.issue_refresh_token(&identity).await?;
        let access = self.issue_session_access_token(&identity, &session_id)?;
        Ok(AuthResponse::signed_in(access, user))
    }

    /// Trade a (possibly expired) access token for a fresh one.
    ///
    /// The token's signature must still verify. The stored refresh record
    /// must exist, be unexpired and belong to the token's session, and the
    /// email in the token must match the account as it is now.
    pub async fn refresh_access_token(
        &self,
        raw_token: &str,
    ) -> Result<RefreshOutcome, SessionError> {
        let claims = self.jwt.decode_unverified_expiry(raw_token)?;
        let identity = claims.identity;

        let Some(record) = self.db.refresh_tokens().get_by_user(&identity.id).await? else {
            debug!(user_id = %identity.id, "No refresh record on file");
            return Ok(RefreshOutcome::NoRefreshToken);
        };

        if record.is_expired_at(Utc::now()) {
            return Err(TokenError::Expired.into());
        }

        if claims.sid.as_deref() != Some(record.session_id.as_str()) {
            debug!(user_id = %identity.id, "Token belongs to a retired session");
            return Err(TokenError::Invalid.into());
        }

        let user = self
            .db
            .users()
            .get_by_id(&identity.id)
            .await?
            .ok_or(SessionError::UserNotFound)?;

        if !user.email.eq_ignore_ascii_case(&identity.email) {
            return Err(TokenError::Invalid.into());
        }

        let access = self.issue_session_access_token(&Identity::from(&user), &record.session_id)?;
        Ok(RefreshOutcome::Refreshed(AuthResponse::signed_in(access, &user)))
    }

    /// Delete the user's refresh record. Returns whether one existed.
    pub async fn revoke(&self, user_id: &str) -> Result<bool, SessionError> {
        Ok(self.db.refresh_tokens().delete_by_user(user_id).await?)
    }
}
