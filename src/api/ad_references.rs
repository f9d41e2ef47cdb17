//! Public ad reference endpoints. Management lives under `/admin`.

use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
};

use super::error::{ApiError, ResultExt};
use crate::db::Database;

pub fn router(db: Database) -> Router {
    Router::new()
        .route("/", get(list_active))
        .route("/{id}", get(get_reference))
        .with_state(db)
}

async fn list_active(State(db): State<Database>) -> Result<impl IntoResponse, ApiError> {
    let references = db
        .ad_references()
        .list_active()
        .await
        .db_err("Failed to list ad references")?;
    Ok(Json(references))
}

async fn get_reference(
    State(db): State<Database>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let reference = db
        .ad_references()
        .get(&id)
        .await
        .db_err("Failed to get ad reference")?
        .ok_or_else(|| ApiError::not_found("Ad reference not found"))?;
    Ok(Json(reference))
}
