use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use super::error::{ApiError, ResultExt};
use super::is_web_url;
use crate::auth::{AnyRole, Auth, CookieSettings};
use crate::db::{Database, Job, NewJob, Paginated};
use crate::filter::{FilterRequest, compile};
use crate::impl_has_auth_state;
use crate::roles::RoleCatalog;
use crate::session::Sessions;

#[derive(Clone)]
pub struct JobsState {
    pub db: Database,
    pub sessions: Sessions,
    pub roles: RoleCatalog,
    pub cookies: CookieSettings,
    pub base_ui_host: Arc<str>,
}

impl_has_auth_state!(JobsState);

pub fn router(state: JobsState) -> Router {
    Router::new()
        .route("/", post(create_job))
        .route("/search", post(search_jobs))
        .route("/filter-options", get(filter_options))
        .route("/{code}", get(get_job))
        .route("/{code}/url", get(original_url))
        .with_state(state)
}

/// Approved, open postings only.
async fn search_jobs(
    State(state): State<JobsState>,
    Json(request): Json<FilterRequest>,
) -> Result<Json<Paginated<Job>>, ApiError> {
    let page = state
        .db
        .jobs()
        .search_public(&compile(&request))
        .await
        .db_err("Failed to search jobs")?;
    Ok(Json(page))
}

async fn filter_options(State(state): State<JobsState>) -> Result<impl IntoResponse, ApiError> {
    let options = state
        .db
        .jobs()
        .filter_options()
        .await
        .db_err("Failed to load filter options")?;
    Ok(Json(options))
}

async fn create_job(
    State(state): State<JobsState>,
    auth: Auth<AnyRole>,
    Json(job): Json<NewJob>,
) -> Result<impl IntoResponse, ApiError> {
    if job.title.trim().is_empty() || job.company_name.trim().is_empty() {
        return Err(ApiError::bad_request("Title and company name are required"));
    }
    if !job.url.is_empty() && !is_web_url(&job.url) {
        return Err(ApiError::bad_request("Invalid job URL"));
    }

    let created = state
        .db
        .jobs()
        .create(&job, Some(auth.id.as_str()), &state.base_ui_host)
        .await
        .db_err("Failed to create job")?;

    info!(job_id = %created.id, code = %created.code, "Job posted");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_job(
    State(state): State<JobsState>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .db
        .jobs()
        .get_public_by_code(&code)
        .await
        .db_err("Failed to get job")?
        .ok_or_else(|| ApiError::not_found("Job not found"))?;
    Ok(Json(job))
}

#[derive(Serialize)]
struct OriginalUrl {
    url: String,
}

/// The posting's own URL, or the job page on the web UI when it is unknown.
async fn original_url(
    State(state): State<JobsState>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .db
        .jobs()
        .get_public_by_code(&code)
        .await
        .db_err("Failed to get job")?;

    let url = match job {
        Some(job) if !job.url.is_empty() => job.url,
        _ => format!("{}/vagas/{}", state.base_ui_host, code),
    };
    Ok(Json(OriginalUrl { url }))
}
