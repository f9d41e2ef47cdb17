//! Short-link redirects: `/go/{code}` for jobs, `/r/{code}` for ads.
//! Each hit is counted before redirecting.

use axum::{
    Router,
    extract::{Path, State},
    response::{IntoResponse, Redirect},
    routing::get,
};

use super::error::{ApiError, ResultExt};
use crate::codes::is_short_code;
use crate::db::Database;

pub fn router(db: Database) -> Router {
    Router::new()
        .route("/go/{code}", get(job_redirect))
        .route("/r/{code}", get(ad_redirect))
        .with_state(db)
}

async fn job_redirect(
    State(db): State<Database>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !is_short_code(&code) {
        return Err(ApiError::not_found("Job not found"));
    }

    let job = db
        .jobs()
        .get_public_by_code(&code)
        .await
        .db_err("Failed to get job")?
        .filter(|job| !job.url.is_empty())
        .ok_or_else(|| ApiError::not_found("Job not found"))?;

    db.jobs()
        .increment_clicks(&job.id)
        .await
        .db_err("Failed to count click")?;

    Ok(Redirect::temporary(&job.url))
}

async fn ad_redirect(
    State(db): State<Database>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !is_short_code(&code) {
        return Err(ApiError::not_found("Link not found"));
    }

    let ad = db
        .ads()
        .get_by_code(&code)
        .await
        .db_err("Failed to get ad")?
        .ok_or_else(|| ApiError::not_found("Link not found"))?;

    db.ads()
        .increment_clicks(&ad.code)
        .await
        .db_err("Failed to count click")?;

    Ok(Redirect::temporary(&ad.original_url))
}
