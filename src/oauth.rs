//! Third-party sign-in.
//!
//! The client completes the provider's consent flow and hands us the
//! provider access token; we trade it for the provider's view of the user.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

pub const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
pub const GOOGLE_PROVIDER: &str = "google";

const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("identity provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("identity provider rejected the access token")]
    Rejected,
    #[error("identity provider returned no email")]
    MissingEmail,
}

/// A user as reported by an identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub picture: String,
    pub email_verified: bool,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Provider name recorded on accounts it creates.
    fn name(&self) -> &'static str;

    async fn fetch_user(&self, access_token: &str) -> Result<ProviderUser, OAuthError>;
}

#[derive(Deserialize)]
struct GoogleUserInfo {
    #[serde(default)]
    email: String,
    #[serde(default)]
    verified_email: bool,
    #[serde(default)]
    given_name: String,
    #[serde(default)]
    family_name: String,
    #[serde(default)]
    picture: String,
}

pub struct GoogleProvider {
    client: reqwest::Client,
    userinfo_url: String,
}

impl GoogleProvider {
    pub fn new(userinfo_url: &str) -> Result<Self, OAuthError> {
        let client = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            userinfo_url: userinfo_url.to_string(),
        })
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn name(&self) -> &'static str {
        GOOGLE_PROVIDER
    }

    async fn fetch_user(&self, access_token: &str) -> Result<ProviderUser, OAuthError> {
        let response = self
            .client
            .get(&self.userinfo_url)
            .query(&[("access_token", access_token)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(OAuthError::Rejected);
        }

        let info: GoogleUserInfo = response.json().await?;
        if info.email.trim().is_empty() {
            return Err(OAuthError::MissingEmail);
        }

        Ok(ProviderUser {
            email: info.email.trim().to_lowercase(),
            first_name: info.given_name,
            last_name: info.family_name,
            picture: info.picture,
            email_verified: info.verified_email,
        })
    }
}
