//! Run status and score lookups

use axum::{
    extract::{Path, State},
    Json,
};

use crate::error::Result;
use crate::server::AppState;
use crate::types::{MatchScore, StatusRecord};

/// GET /api/status/:processing_id
pub async fn get_status(
    State(pipeline): State<AppState>,
    Path(processing_id): Path<String>,
) -> Result<Json<StatusRecord>> {
    Ok(Json(pipeline.status(&processing_id).await?))
}

/// GET /api/scores/:resume_id/:job_id
pub async fn get_score(
    State(pipeline): State<AppState>,
    Path((resume_id, job_id)): Path<(String, String)>,
) -> Result<Json<MatchScore>> {
    Ok(Json(pipeline.score(&resume_id, &job_id).await?))
}
