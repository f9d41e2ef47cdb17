//! Account endpoints: sign-up, sign-in, sessions, password recovery,
//! profiles and bookmarks.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

use super::error::{ApiError, ResultExt};
use super::{clear_session, is_web_url, session_response};
use crate::auth::{
    AnyRole, Auth, AuthErrorKind, CookieSettings, SESSION_COOKIE_NAME, extract_token,
};
use crate::codes::secret_token;
use crate::db::{Database, NewUser, Paginated, ProfileUpdate, User};
use crate::filter::{FilterRequest, compile};
use crate::impl_has_auth_state;
use crate::mailer::{Mailer, confirmation_message, recovery_message};
use crate::password::{
    check_password_policy, check_user_name, hash_password, is_valid_email, verify_password,
};
use crate::rate_limit::{
    RateLimitConfig, rate_limit_login, rate_limit_recovery, rate_limit_signup,
};
use crate::roles::{RoleCatalog, has_required_role};
use crate::session::{AuthResponse, RefreshOutcome, Sessions, UserInfo};

/// Role given to every new account.
pub const DEFAULT_ROLE: &str = "user";

pub const LOCAL_PROVIDER: &str = "local";

#[derive(Clone)]
pub struct UsersState {
    pub db: Database,
    pub sessions: Sessions,
    pub roles: RoleCatalog,
    pub cookies: CookieSettings,
    pub mailer: Mailer,
    pub base_ui_host: Arc<str>,
}

impl_has_auth_state!(UsersState);

pub fn router(state: UsersState, limits: Arc<RateLimitConfig>) -> Router {
    let signup_router = Router::new()
        .route("/signup", post(sign_up))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(limits.clone(), rate_limit_signup));

    let login_router = Router::new()
        .route("/login", post(login))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(limits.clone(), rate_limit_login));

    let recovery_router = Router::new()
        .route("/password-recovery", post(request_password_recovery))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(limits, rate_limit_recovery));

    let open_router = Router::new()
        .route("/confirm-email/{token}", get(confirm_email))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/password-recovery/{token}", get(verify_recovery_token))
        .route("/password-reset", post(reset_password))
        .route("/profile/{user_name}", get(public_profile))
        .route("/is-authorized", post(is_authorized))
        .route("/me", get(get_me).put(update_me).delete(delete_me))
        .route("/me/user-name", patch(change_user_name))
        .route("/me/bookmarks", get(list_bookmarks))
        .route(
            "/me/bookmarks/{job_id}",
            post(add_bookmark).delete(remove_bookmark),
        )
        .with_state(state);

    Router::new()
        .merge(signup_router)
        .merge(login_router)
        .merge(recovery_router)
        .merge(open_router)
}

pub fn talents_router(state: UsersState) -> Router {
    Router::new()
        .route("/search", post(search_talents))
        .with_state(state)
}

// =============================================================================
// Sign-up and sign-in
// =============================================================================

#[derive(Deserialize)]
struct SignUpRequest {
    first_name: String,
    last_name: String,
    email: String,
    password: String,
    confirm_password: String,
}

#[derive(Serialize)]
struct SignUpResponse {
    id: String,
    email: String,
}

async fn sign_up(
    State(state): State<UsersState>,
    Json(payload): Json<SignUpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let first_name = payload.first_name.trim();
    let last_name = payload.last_name.trim();
    let email = payload.email.trim().to_lowercase();

    if first_name.is_empty() || last_name.is_empty() {
        return Err(ApiError::bad_request("First and last name are required"));
    }
    if !is_valid_email(&email) {
        return Err(ApiError::bad_request("Invalid email address"));
    }
    check_password_policy(&payload.password).map_err(ApiError::bad_request)?;
    if payload.password != payload.confirm_password {
        return Err(ApiError::bad_request("Passwords do not match"));
    }

    let existing = state
        .db
        .users()
        .get_by_email(&email)
        .await
        .db_err("Failed to look up user")?;
    if existing.is_some() {
        return Err(ApiError::conflict("Email already registered"));
    }

    let role_ids = default_role_ids(&state.roles).await?;
    let password_hash = hash_password(&payload.password).map_err(|e| {
        error!(error = %e, "Failed to hash password");
        ApiError::internal("Failed to create account")
    })?;
    let token = secret_token();

    let user = match state
        .db
        .users()
        .create(&NewUser {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email,
            password_hash: Some(password_hash),
            provider: LOCAL_PROVIDER.to_string(),
            profile_image_url: String::new(),
            role_ids,
            is_email_confirmed: false,
            validation_token: Some(token.clone()),
        })
        .await
    {
        Ok(user) => user,
        Err(e) if e.is_unique_violation() => {
            return Err(ApiError::conflict("Email already registered"));
        }
        Err(e) => return Err(ApiError::db_error("Failed to create user", e)),
    };

    let message = confirmation_message(&state.base_ui_host, &user.first_name, &token);
    state
        .mailer
        .send_detached(vec![user.email.clone()], message.subject, message.html);

    info!(user_id = %user.id, "User signed up");

    Ok((
        StatusCode::CREATED,
        Json(SignUpResponse {
            id: user.id,
            email: user.email,
        }),
    ))
}

pub(super) async fn default_role_ids(roles: &RoleCatalog) -> Result<Vec<String>, ApiError> {
    match roles
        .ids_for(&[DEFAULT_ROLE.to_string()])
        .await
        .db_err("Failed to load roles")?
    {
        Ok(ids) => Ok(ids),
        Err(missing) => {
            error!(role = %missing, "Default role missing from catalog");
            Err(ApiError::internal("Role catalog is incomplete"))
        }
    }
}

async fn confirm_email(
    State(state): State<UsersState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let confirmed = state
        .db
        .users()
        .confirm_email(&token)
        .await
        .db_err("Failed to confirm email")?;

    if !confirmed {
        return Err(ApiError::not_found("Unknown confirmation token"));
    }
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

async fn login(
    State(state): State<UsersState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let email = payload.email.trim().to_lowercase();
    let user = state
        .db
        .users()
        .get_by_email(&email)
        .await
        .db_err("Failed to look up user")?
        .ok_or_else(|| ApiError::auth(AuthErrorKind::Unauthenticated, &state.cookies))?;

    let password_ok = user
        .password_hash
        .as_deref()
        .is_some_and(|hash| verify_password(&payload.password, hash));
    if !password_ok {
        return Err(ApiError::auth(AuthErrorKind::Unauthenticated, &state.cookies));
    }

    if !user.is_email_confirmed {
        return Err(ApiError::forbidden("Email not confirmed"));
    }

    state
        .db
        .users()
        .touch_last_login(&user.id)
        .await
        .db_err("Failed to record login")?;

    let auth = state
        .sessions
        .sign_in(&user)
        .await
        .map_err(|e| ApiError::session("Failed to start session", e, &state.cookies))?;

    info!(user_id = %user.id, "User signed in");
    Ok(session_response(&state.cookies, auth))
}

async fn refresh(
    State(state): State<UsersState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let token = extract_token(&headers, SESSION_COOKIE_NAME)
        .map_err(|kind| ApiError::auth(kind, &state.cookies))?;

    match state.sessions.refresh_access_token(token).await {
        Ok(RefreshOutcome::Refreshed(auth)) => Ok(session_response(&state.cookies, auth)),
        Ok(RefreshOutcome::NoRefreshToken) => {
            Ok((StatusCode::UNAUTHORIZED, Json(AuthResponse::disabled())).into_response())
        }
        Err(e) => Err(ApiError::session("Failed to refresh session", e, &state.cookies)),
    }
}

/// Revoke the refresh record when the token names a user; always clear the cookie.
async fn logout(State(state): State<UsersState>, headers: HeaderMap) -> Response {
    if let Ok(token) = extract_token(&headers, SESSION_COOKIE_NAME) {
        if let Ok(claims) = state.sessions.jwt().decode_unverified_expiry(token) {
            let user_id = claims.identity.id;
            if let Err(e) = state.sessions.revoke(&user_id).await {
                error!(error = %e, user_id = %user_id, "Failed to revoke session");
            }
        }
    }
    clear_session(&state.cookies, Json(json!({ "success": true })).into_response())
}

// =============================================================================
// Password recovery
// =============================================================================

#[derive(Deserialize)]
struct RecoveryRequest {
    email: String,
}

/// Always answers 200 so the endpoint cannot be used to enumerate accounts.
async fn request_password_recovery(
    State(state): State<UsersState>,
    Json(payload): Json<RecoveryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = payload.email.trim().to_lowercase();
    let user = state
        .db
        .users()
        .get_by_email(&email)
        .await
        .db_err("Failed to look up user")?;

    if let Some(user) = user {
        let token = secret_token();
        state
            .db
            .users()
            .set_validation_token(&user.id, &token)
            .await
            .db_err("Failed to store recovery token")?;

        let message = recovery_message(&state.base_ui_host, &user.first_name, &token);
        state
            .mailer
            .send_detached(vec![user.email], message.subject, message.html);
    }

    Ok(Json(json!({ "success": true })))
}

async fn verify_recovery_token(
    State(state): State<UsersState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .users()
        .get_by_validation_token(&token)
        .await
        .db_err("Failed to look up token")?
        .ok_or_else(|| ApiError::not_found("Unknown recovery token"))?;

    Ok(Json(json!({ "valid": true })))
}

#[derive(Deserialize)]
struct ResetPasswordRequest {
    token: String,
    password: String,
    confirm_password: String,
}

async fn reset_password(
    State(state): State<UsersState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check_password_policy(&payload.password).map_err(ApiError::bad_request)?;
    if payload.password != payload.confirm_password {
        return Err(ApiError::bad_request("Passwords do not match"));
    }

    let user = state
        .db
        .users()
        .get_by_validation_token(&payload.token)
        .await
        .db_err("Failed to look up token")?
        .ok_or_else(|| ApiError::not_found("Unknown recovery token"))?;

    let password_hash = hash_password(&payload.password).map_err(|e| {
        error!(error = %e, "Failed to hash password");
        ApiError::internal("Failed to reset password")
    })?;

    let reset = state
        .db
        .users()
        .reset_password(&payload.token, &password_hash)
        .await
        .db_err("Failed to reset password")?;
    if !reset {
        return Err(ApiError::not_found("Unknown recovery token"));
    }

    // Existing sessions end with the old password
    state
        .sessions
        .revoke(&user.id)
        .await
        .map_err(|e| ApiError::db_error("Failed to revoke session", e))?;

    info!(user_id = %user.id, "Password reset");
    Ok(Json(json!({ "success": true })))
}

// =============================================================================
// Profile
// =============================================================================

#[derive(Serialize)]
struct ProfileResponse {
    #[serde(flatten)]
    info: UserInfo,
    roles: Vec<String>,
    bookmarked_jobs: Vec<String>,
    profile_views: i64,
    is_email_confirmed: bool,
}

async fn load_user(db: &Database, id: &str) -> Result<User, ApiError> {
    db.users()
        .get_by_id(id)
        .await
        .db_err("Failed to get user")?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

async fn profile_response(state: &UsersState, user: User) -> Result<ProfileResponse, ApiError> {
    let roles = state
        .roles
        .names_for(&user.role_ids)
        .await
        .db_err("Failed to load roles")?;
    Ok(ProfileResponse {
        info: UserInfo::from(&user),
        roles,
        bookmarked_jobs: user.bookmarked_jobs,
        profile_views: user.profile_views,
        is_email_confirmed: user.is_email_confirmed,
    })
}

async fn get_me(
    State(state): State<UsersState>,
    auth: Auth<AnyRole>,
) -> Result<impl IntoResponse, ApiError> {
    let user = load_user(&state.db, &auth.id).await?;
    Ok(Json(profile_response(&state, user).await?))
}

async fn update_me(
    State(state): State<UsersState>,
    auth: Auth<AnyRole>,
    Json(update): Json<ProfileUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let blank = |v: &Option<String>| v.as_deref().is_some_and(|s| s.trim().is_empty());
    if blank(&update.first_name) || blank(&update.last_name) {
        return Err(ApiError::bad_request("Names cannot be empty"));
    }
    let bad_link = update
        .links
        .iter()
        .flatten()
        .any(|link| !is_web_url(&link.url));
    if bad_link {
        return Err(ApiError::bad_request("Links must be http or https URLs"));
    }

    let updated = state
        .db
        .users()
        .update_profile(&auth.id, &update)
        .await
        .db_err("Failed to update profile")?;
    if !updated {
        return Err(ApiError::not_found("User not found"));
    }

    let user = load_user(&state.db, &auth.id).await?;
    Ok(Json(profile_response(&state, user).await?))
}

#[derive(Deserialize)]
struct UserNameRequest {
    user_name: String,
}

async fn change_user_name(
    State(state): State<UsersState>,
    auth: Auth<AnyRole>,
    Json(payload): Json<UserNameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_name = payload.user_name.trim();
    check_user_name(user_name).map_err(ApiError::bad_request)?;

    let available = state
        .db
        .users()
        .is_user_name_available(user_name, &auth.id)
        .await
        .db_err("Failed to check user name")?;
    if !available {
        return Err(ApiError::conflict("User name already taken"));
    }

    match state.db.users().set_user_name(&auth.id, user_name).await {
        Ok(true) => Ok(Json(json!({ "user_name": user_name }))),
        Ok(false) => Err(ApiError::not_found("User not found")),
        Err(e) if e.is_unique_violation() => Err(ApiError::conflict("User name already taken")),
        Err(e) => Err(ApiError::db_error("Failed to set user name", e)),
    }
}

async fn delete_me(
    State(state): State<UsersState>,
    auth: Auth<AnyRole>,
) -> Result<Response, ApiError> {
    state
        .sessions
        .revoke(&auth.id)
        .await
        .map_err(|e| ApiError::db_error("Failed to revoke session", e))?;

    let deleted = state
        .db
        .users()
        .delete(&auth.id)
        .await
        .db_err("Failed to delete user")?;
    if !deleted {
        return Err(ApiError::not_found("User not found"));
    }

    info!(user_id = %auth.id, "Account deleted");
    Ok(clear_session(
        &state.cookies,
        StatusCode::NO_CONTENT.into_response(),
    ))
}

/// A public profile. Every successful view is counted.
async fn public_profile(
    State(state): State<UsersState>,
    Path(user_name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .users()
        .get_by_user_name(&user_name)
        .await
        .db_err("Failed to get user")?
        .filter(|user| user.is_public)
        .ok_or_else(|| ApiError::not_found("Profile not found"))?;

    state
        .db
        .users()
        .increment_profile_views(&user.id)
        .await
        .db_err("Failed to count profile view")?;

    Ok(Json(UserInfo::from(&user)))
}

#[derive(Deserialize)]
struct IsAuthorizedRequest {
    #[serde(default)]
    roles: Vec<String>,
}

async fn is_authorized(
    State(state): State<UsersState>,
    auth: Auth<AnyRole>,
    Json(payload): Json<IsAuthorizedRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_roles = state
        .roles
        .user_role_names(&auth.id)
        .await
        .db_err("Failed to load roles")?
        .ok_or_else(|| ApiError::auth(AuthErrorKind::Unauthenticated, &state.cookies))?;

    let required: Vec<&str> = payload.roles.iter().map(String::as_str).collect();
    Ok(Json(json!({
        "authorized": has_required_role(&required, &user_roles),
    })))
}

// =============================================================================
// Bookmarks
// =============================================================================

async fn list_bookmarks(
    State(state): State<UsersState>,
    auth: Auth<AnyRole>,
) -> Result<impl IntoResponse, ApiError> {
    let user = load_user(&state.db, &auth.id).await?;
    Ok(Json(json!({ "bookmarked_jobs": user.bookmarked_jobs })))
}

async fn add_bookmark(
    State(state): State<UsersState>,
    auth: Auth<AnyRole>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .jobs()
        .get_by_id(&job_id)
        .await
        .db_err("Failed to get job")?
        .ok_or_else(|| ApiError::not_found("Job not found"))?;

    state
        .db
        .users()
        .add_bookmark(&auth.id, &job_id)
        .await
        .db_err("Failed to add bookmark")?;

    let user = load_user(&state.db, &auth.id).await?;
    Ok(Json(json!({ "bookmarked_jobs": user.bookmarked_jobs })))
}

async fn remove_bookmark(
    State(state): State<UsersState>,
    auth: Auth<AnyRole>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .users()
        .remove_bookmark(&auth.id, &job_id)
        .await
        .db_err("Failed to remove bookmark")?;

    let user = load_user(&state.db, &auth.id).await?;
    Ok(Json(json!({ "bookmarked_jobs": user.bookmarked_jobs })))
}

// =============================================================================
// Talent search
// =============================================================================

/// Public listing of confirmed accounts with a public profile.
async fn search_talents(
    State(state): State<UsersState>,
    Json(request): Json<FilterRequest>,
) -> Result<Json<Paginated<UserInfo>>, ApiError> {
    let page = state
        .db
        .users()
        .search_talents(&compile(&request))
        .await
        .db_err("Failed to search talents")?;
    Ok(Json(page.map(|user| UserInfo::from(&user))))
}
