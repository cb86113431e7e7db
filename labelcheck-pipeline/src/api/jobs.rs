//! Job submission, status and report endpoints
//!
//! Request-serving code only creates jobs; every later status change belongs
//! to the coordinators.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coordinator;
use crate::db::{jobs, reports};
use crate::error::{ApiError, ApiResult};
use crate::models::{JobStatusView, Report};
use crate::AppState;

/// POST /jobs request
#[derive(Debug, Deserialize, Serialize)]
pub struct CreateJobRequest {
    /// Object references of the uploaded label images
    pub image_refs: Vec<String>,
}

/// POST /jobs
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<JobStatusView>)> {
    if request.image_refs.is_empty() {
        return Err(ApiError::BadRequest("image_refs must not be empty".to_string()));
    }
    if request.image_refs.iter().any(|r| r.trim().is_empty()) {
        return Err(ApiError::BadRequest("image_refs must not contain blank entries".to_string()));
    }

    let job = coordinator::submit_job(&state.ctx, &request.image_refs).await?;
    Ok((StatusCode::CREATED, Json(JobStatusView::from(&job))))
}

/// GET /jobs/:job_id
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobStatusView>> {
    jobs::job_status(&state.ctx.pool, job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("job {}", job_id)))
}

/// GET /jobs/:job_id/report
///
/// 404 until the job is DONE.
pub async fn get_report(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<Report>> {
    if let Some(report) = reports::load_report(&state.ctx.pool, job_id).await? {
        return Ok(Json(report));
    }

    match jobs::job_status(&state.ctx.pool, job_id).await? {
        Some(status) => Err(ApiError::NotFound(format!(
            "report for job {} not available (status {})",
            job_id, status.status
        ))),
        None => Err(ApiError::NotFound(format!("job {}", job_id))),
    }
}

/// Build job routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(create_job))
        .route("/jobs/:job_id", get(get_job_status))
        .route("/jobs/:job_id/report", get(get_report))
}
