//! Sign-in through an external identity provider.

use axum::{Json, Router, extract::State, response::Response, routing::post};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::error::{ApiError, ResultExt};
use super::session_response;
use super::users::default_role_ids;
use crate::auth::{AuthErrorKind, CookieSettings};
use crate::db::{Database, NewUser};
use crate::impl_has_auth_state;
use crate::oauth::{IdentityProvider, OAuthError};
use crate::roles::RoleCatalog;
use crate::session::Sessions;

#[derive(Clone)]
pub struct OAuthState {
    pub db: Database,
    pub sessions: Sessions,
    pub roles: RoleCatalog,
    pub cookies: CookieSettings,
    pub provider: Arc<dyn IdentityProvider>,
}

impl_has_auth_state!(OAuthState);

pub fn router(state: OAuthState) -> Router {
    Router::new()
        .route("/google", post(google_sign_in))
        .with_state(state)
}

#[derive(Deserialize)]
struct ProviderTokenRequest {
    access_token: String,
}

/// Find or create the account behind a provider token, then sign in as login does.
async fn google_sign_in(
    State(state): State<OAuthState>,
    Json(payload): Json<ProviderTokenRequest>,
) -> Result<Response, ApiError> {
    let provider_user = match state.provider.fetch_user(&payload.access_token).await {
        Ok(user) => user,
        Err(OAuthError::Http(e)) => {
            warn!(error = %e, "Identity provider unreachable");
            return Err(ApiError::internal("Identity provider unavailable"));
        }
        Err(e) => {
            warn!(error = %e, "Identity provider refused sign-in");
            return Err(ApiError::auth(AuthErrorKind::Unauthenticated, &state.cookies));
        }
    };

    let users = state.db.users();
    let existing = users
        .get_by_email(&provider_user.email)
        .await
        .db_err("Failed to look up user")?;

    let user = match existing {
        Some(user) if provider_user.email_verified && !user.is_email_confirmed => {
            users
                .confirm_for_provider(&user.id, state.provider.name())
                .await
                .db_err("Failed to confirm email")?;
            info!(
                user_id = %user.id,
                provider = state.provider.name(),
                "Unconfirmed account claimed"
            );
            users
                .get_by_id(&user.id)
                .await
                .db_err("Failed to look up user")?
                .ok_or_else(|| ApiError::not_found("User not found"))?
        }
        Some(user) => user,
        None => {
            let role_ids = default_role_ids(&state.roles).await?;
            let user = users
                .create(&NewUser {
                    first_name: provider_user.first_name.clone(),
                    last_name: provider_user.last_name.clone(),
                    email: provider_user.email.clone(),
                    password_hash: None,
                    provider: state.provider.name().to_string(),
                    profile_image_url: provider_user.picture.clone(),
                    role_ids,
                    is_email_confirmed: provider_user.email_verified,
                    validation_token: None,
                })
                .await
                .db_err("Failed to create user")?;
            info!(user_id = %user.id, provider = state.provider.name(), "User signed up");
            user
        }
    };

    if !(user.is_email_confirmed || provider_user.email_verified) {
        return Err(ApiError::forbidden("Email not confirmed"));
    }

    users
        .touch_last_login(&user.id)
        .await
        .db_err("Failed to record login")?;

    let auth = state
        .sessions
        .sign_in(&user)
        .await
        .map_err(|e| ApiError::session("Failed to start session", e, &state.cookies))?;

    info!(user_id = %user.id, provider = state.provider.name(), "User signed in");
    Ok(session_response(&state.cookies, auth))
}
