//! Job specification endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::error::Result;
use crate::pipeline::NewJob;
use crate::server::AppState;
use crate::types::{JobSpec, MatchScore};

/// POST /api/jobs - Register a job specification
pub async fn create_job(
    State(pipeline): State<AppState>,
    Json(request): Json<NewJob>,
) -> Result<(StatusCode, Json<JobSpec>)> {
    let job = pipeline.create_job(request).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/jobs/:job_id
pub async fn get_job(
    State(pipeline): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobSpec>> {
    Ok(Json(pipeline.job(&job_id).await?))
}

/// GET /api/jobs/:job_id/scores - Scores for a job, best first
pub async fn list_scores(
    State(pipeline): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Vec<MatchScore>>> {
    pipeline.job(&job_id).await?;
    Ok(Json(pipeline.scores_for_job(&job_id).await?))
}
