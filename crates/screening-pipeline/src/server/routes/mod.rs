//! API routes

pub mod jobs;
pub mod resumes;
pub mod status;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::server::AppState;

/// Build all API routes
pub fn api_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        // Job specifications
        .route("/jobs", post(jobs::create_job))
        .route("/jobs/:job_id", get(jobs::get_job))
        .route("/jobs/:job_id/scores", get(jobs::list_scores))
        // Uploads - with larger body limit for files
        .route(
            "/resumes",
            post(resumes::upload_resume).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route("/resumes/:resume_id", get(resumes::get_resume))
        .route("/resumes/:resume_id/reprocess", post(resumes::reprocess_resume))
        // Pipeline results
        .route("/status/:processing_id", get(status::get_status))
        .route("/scores/:resume_id/:job_id", get(status::get_score))
}
