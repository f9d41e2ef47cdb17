//! JWT token generation and validation.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::db::{User, UserLink};

/// Default access token lifetime: 1 hour
pub const ACCESS_TOKEN_TTL_SECS: i64 = 60 * 60;

/// Refresh token lifetime: 24 hours
pub const REFRESH_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Sent to the client as a cookie or bearer token
    Access,
    /// Kept server-side in the refresh record
    Refresh,
}

/// The user identity carried inside every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub user_name: String,
    pub email: String,
    #[serde(default)]
    pub links: Vec<UserLink>,
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            user_name: user.user_name.clone().unwrap_or_default(),
            email: user.email.clone(),
            links: user.links.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(flatten)]
    pub identity: Identity,
    /// Token type
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    /// JWT ID, only set on refresh tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Session id: the `jti` of the refresh token an access token was issued under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

/// A freshly signed token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    /// `jti` of a refresh token
    pub id: Option<String>,
}

impl IssuedToken {
    /// Seconds until expiry, clamped at zero (cookie `Max-Age`).
    pub fn max_age(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid token")]
    Invalid,
    #[error("token has expired")]
    Expired,
    #[error("failed to sign token: {0}")]
    Signing(jsonwebtoken::errors::Error),
}

/// Configuration for JWT operations.
#[derive(Clone)]
pub struct JwtConfig {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtConfig {
    /// Create a new JWT configuration with the given secret.
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    fn sign(
        &self,
        identity: &Identity,
        ttl: Duration,
        token_type: TokenType,
        session_id: Option<&str>,
    ) -> Result<IssuedToken, TokenError> {
        let now = Utc::now();
        let expires_at = now + ttl;

        let jti = match token_type {
            TokenType::Access => None,
            TokenType::Refresh => Some(uuid::Uuid::new_v4().to_string()),
        };
        let claims = Claims {
            identity: identity.clone(),
            token_type,
            jti: jti.clone(),
            sid: session_id.map(str::to_string),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(TokenError::Signing)?;

        Ok(IssuedToken {
            token,
            expires_at,
            id: jti,
        })
    }

    /// Sign an access token valid for `ttl` that belongs to no session.
    /// It authenticates requests but can never be refreshed.
    pub fn issue_access_token(
        &self,
        identity: &Identity,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError> {
        self.sign(identity, ttl, TokenType::Access, None)
    }

    /// Sign an access token bound to the refresh token whose `jti` is `session_id`.
    pub fn issue_session_access_token(
        &self,
        identity: &Identity,
        session_id: &str,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError> {
        self.sign(identity, ttl, TokenType::Access, Some(session_id))
    }

    /// Sign a refresh token. Storing it is up to the caller.
    pub fn issue_refresh_token(
        &self,
        identity: &Identity,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError> {
        self.sign(identity, ttl, TokenType::Refresh, None)
    }

    fn decode(&self, token: &str, check_expiry: bool) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = check_expiry;

        // The signature is verified before the expiry, so an expired token
        // with a bad signature reports `Invalid`.
        let token_data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })?;

        if token_data.claims.token_type != TokenType::Access {
            return Err(TokenError::Invalid);
        }

        Ok(token_data.claims)
    }

    /// Verify signature and expiry of an access token.
    pub fn validate_token(&self, token: &str) -> Result<Identity, TokenError> {
        self.decode(token, true).map(|claims| claims.identity)
    }

    /// Verify the signature of an access token that may have expired.
    /// Only the refresh and logout flows use this; the claims are re-checked against the store.
    pub fn decode_unverified_expiry(&self, token: &str) -> Result<Claims, TokenError> {
        self.decode(token, false)
    }
}
