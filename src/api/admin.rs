//! Back-office endpoints.
//!
//! Job moderation is open to staff (admins and recruiters); everything else
//! requires the admin role.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, patch, post, put},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::{ApiError, ResultExt};
use super::is_web_url;
use crate::auth::{AdminOnly, Auth, CookieSettings, StaffOnly};
use crate::db::{AdReferenceInput, Database, JobStatusUpdate, Paginated};
use crate::filter::{FilterRequest, compile};
use crate::impl_has_auth_state;
use crate::roles::RoleCatalog;
use crate::session::{Sessions, UserInfo};

/// State for admin endpoints.
#[derive(Clone)]
pub struct AdminState {
    pub db: Database,
    pub sessions: Sessions,
    pub roles: RoleCatalog,
    pub cookies: CookieSettings,
}

impl_has_auth_state!(AdminState);

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/users/search", post(search_users))
        .route("/users/{id}", delete(delete_user))
        .route("/users/{id}/roles", put(set_user_roles))
        .route("/roles", get(list_roles).post(create_role))
        .route("/jobs/search", post(search_jobs))
        .route("/jobs/{id}", patch(update_job).delete(delete_job))
        .route("/ads", get(list_ads).post(create_ad))
        .route("/ad-references", post(create_ad_reference))
        .route("/ad-references/search", post(search_ad_references))
        .route(
            "/ad-references/{id}",
            put(update_ad_reference).delete(delete_ad_reference),
        )
        .with_state(state)
}

// =============================================================================
// Users and roles
// =============================================================================

#[derive(Serialize)]
struct AdminUserView {
    #[serde(flatten)]
    info: UserInfo,
    role_ids: Vec<String>,
    is_email_confirmed: bool,
    profile_views: i64,
}

async fn search_users(
    State(state): State<AdminState>,
    _auth: Auth<AdminOnly>,
    Json(request): Json<FilterRequest>,
) -> Result<Json<Paginated<AdminUserView>>, ApiError> {
    let page = state
        .db
        .users()
        .search(&compile(&request))
        .await
        .db_err("Failed to search users")?;

    Ok(Json(page.map(|user| AdminUserView {
        info: UserInfo::from(&user),
        role_ids: user.role_ids,
        is_email_confirmed: user.is_email_confirmed,
        profile_views: user.profile_views,
    })))
}

async fn delete_user(
    State(state): State<AdminState>,
    auth: Auth<AdminOnly>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if id == auth.id {
        return Err(ApiError::bad_request("Cannot delete your own account here"));
    }

    let deleted = state
        .db
        .users()
        .delete(&id)
        .await
        .db_err("Failed to delete user")?;
    if !deleted {
        return Err(ApiError::not_found("User not found"));
    }

    info!(user_id = %id, admin_id = %auth.id, "User deleted by admin");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct SetRolesRequest {
    roles: Vec<String>,
}

async fn set_user_roles(
    State(state): State<AdminState>,
    auth: Auth<AdminOnly>,
    Path(id): Path<String>,
    Json(payload): Json<SetRolesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let role_ids = match state
        .roles
        .ids_for(&payload.roles)
        .await
        .db_err("Failed to load roles")?
    {
        Ok(ids) => ids,
        Err(missing) => return Err(ApiError::bad_request(format!("Unknown role: {}", missing))),
    };

    let updated = state
        .db
        .users()
        .set_role_ids(&id, &role_ids)
        .await
        .db_err("Failed to set roles")?;
    if !updated {
        return Err(ApiError::not_found("User not found"));
    }

    info!(user_id = %id, admin_id = %auth.id, roles = ?payload.roles, "Roles granted");
    Ok(Json(serde_json::json!({ "roles": payload.roles })))
}

async fn list_roles(
    State(state): State<AdminState>,
    _auth: Auth<AdminOnly>,
) -> Result<impl IntoResponse, ApiError> {
    let roles = state.roles.roles().await.db_err("Failed to list roles")?;
    Ok(Json(roles))
}

#[derive(Deserialize)]
struct CreateRoleRequest {
    name: String,
}

async fn create_role(
    State(state): State<AdminState>,
    _auth: Auth<AdminOnly>,
    Json(payload): Json<CreateRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = payload.name.trim().to_lowercase();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ApiError::bad_request("Invalid role name"));
    }

    match state.roles.create_role(&name).await {
        Ok(role) => Ok((StatusCode::CREATED, Json(role))),
        Err(e) if e.is_unique_violation() => Err(ApiError::conflict("Role already exists")),
        Err(e) => Err(ApiError::db_error("Failed to create role", e)),
    }
}

// =============================================================================
// Jobs
// =============================================================================

/// Every posting, approved or not.
async fn search_jobs(
    State(state): State<AdminState>,
    _auth: Auth<StaffOnly>,
    Json(request): Json<FilterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state
        .db
        .jobs()
        .search_all(&compile(&request))
        .await
        .db_err("Failed to search jobs")?;
    Ok(Json(page))
}

async fn update_job(
    State(state): State<AdminState>,
    _auth: Auth<StaffOnly>,
    Path(id): Path<String>,
    Json(update): Json<JobStatusUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = state
        .db
        .jobs()
        .update_status(&id, &update)
        .await
        .db_err("Failed to update job")?;
    if !updated {
        return Err(ApiError::not_found("Job not found"));
    }

    let job = state
        .db
        .jobs()
        .get_by_id(&id)
        .await
        .db_err("Failed to get job")?
        .ok_or_else(|| ApiError::not_found("Job not found"))?;
    Ok(Json(job))
}

async fn delete_job(
    State(state): State<AdminState>,
    _auth: Auth<AdminOnly>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .jobs()
        .delete(&id)
        .await
        .db_err("Failed to delete job")?;
    if !deleted {
        return Err(ApiError::not_found("Job not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Short links
// =============================================================================

#[derive(Deserialize)]
struct CreateAdRequest {
    original_url: String,
    #[serde(default)]
    source: String,
}

async fn create_ad(
    State(state): State<AdminState>,
    _auth: Auth<AdminOnly>,
    Json(payload): Json<CreateAdRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !is_web_url(&payload.original_url) {
        return Err(ApiError::bad_request("Invalid URL"));
    }

    let ad = state
        .db
        .ads()
        .create(&payload.original_url, payload.source.trim())
        .await
        .db_err("Failed to create ad")?;
    Ok((StatusCode::CREATED, Json(ad)))
}

async fn list_ads(
    State(state): State<AdminState>,
    _auth: Auth<AdminOnly>,
) -> Result<impl IntoResponse, ApiError> {
    let ads = state.db.ads().list().await.db_err("Failed to list ads")?;
    Ok(Json(ads))
}

// =============================================================================
// Ad references
// =============================================================================

async fn search_ad_references(
    State(state): State<AdminState>,
    _auth: Auth<AdminOnly>,
    Json(request): Json<FilterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state
        .db
        .ad_references()
        .search(&compile(&request))
        .await
        .db_err("Failed to search ad references")?;
    Ok(Json(page))
}

fn validate_ad_reference(input: &AdReferenceInput) -> Result<(), ApiError> {
    if input.description.trim().is_empty() {
        return Err(ApiError::bad_request("Description is required"));
    }
    Ok(())
}

async fn create_ad_reference(
    State(state): State<AdminState>,
    _auth: Auth<AdminOnly>,
    Json(input): Json<AdReferenceInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_ad_reference(&input)?;
    let reference = state
        .db
        .ad_references()
        .create(&input)
        .await
        .db_err("Failed to create ad reference")?;
    Ok((StatusCode::CREATED, Json(reference)))
}

async fn update_ad_reference(
    State(state): State<AdminState>,
    _auth: Auth<AdminOnly>,
    Path(id): Path<String>,
    Json(input): Json<AdReferenceInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_ad_reference(&input)?;
    let store = state.db.ad_references();
    let updated = store
        .update(&id, &input)
        .await
        .db_err("Failed to update ad reference")?;
    if !updated {
        return Err(ApiError::not_found("Ad reference not found"));
    }

    let reference = store
        .get(&id)
        .await
        .db_err("Failed to get ad reference")?
        .ok_or_else(|| ApiError::not_found("Ad reference not found"))?;
    Ok(Json(reference))
}

async fn delete_ad_reference(
    State(state): State<AdminState>,
    _auth: Auth<AdminOnly>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .ad_references()
        .delete(&id)
        .await
        .db_err("Failed to delete ad reference")?;
    if !deleted {
        return Err(ApiError::not_found("Ad reference not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}
