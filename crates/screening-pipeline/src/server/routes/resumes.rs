//! Resume upload and reprocessing endpoints

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};

use crate::error::{Error, Result};
use crate::pipeline::{Submission, Upload};
use crate::server::AppState;
use crate::types::{Contact, ResumeRecord};

/// POST /api/resumes - Upload a resume for screening against a job
///
/// Multipart fields: `file` (required), `jobId` (required), `name`, `email`.
pub async fn upload_resume(
    State(pipeline): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Submission>)> {
    let mut file: Option<(String, Option<String>, Vec<u8>)> = None;
    let mut job_id = None;
    let mut contact = Contact::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidInput(format!("Failed to read multipart field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let file_name = field
                    .file_name()
                    .map(|s| s.to_string())
                    .ok_or_else(|| Error::InvalidInput("file field has no file name".into()))?;
                let content_type = field.content_type().map(|s| s.to_string());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| Error::InvalidInput(format!("Failed to read file: {}", e)))?;
                file = Some((file_name, content_type, data.to_vec()));
            }
            "jobId" | "name" | "email" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| Error::InvalidInput(format!("Failed to read {}: {}", name, e)))?;
                let value = value.trim().to_string();
                if value.is_empty() {
                    continue;
                }
                match name.as_str() {
                    "jobId" => job_id = Some(value),
                    "name" => contact.name = Some(value),
                    _ => contact.email = Some(value),
                }
            }
            other => {
                tracing::debug!("Ignoring multipart field '{}'", other);
            }
        }
    }

    let (file_name, content_type, data) =
        file.ok_or_else(|| Error::InvalidInput("No file provided".into()))?;
    let job_id = job_id.ok_or_else(|| Error::InvalidInput("jobId is required".into()))?;
    if data.is_empty() {
        return Err(Error::InvalidInput(format!("{} is empty", file_name)));
    }

    let submission = pipeline
        .submit(Upload {
            job_id,
            file_name,
            content_type,
            data,
            contact,
        })
        .await?;

    Ok((StatusCode::ACCEPTED, Json(submission)))
}

/// GET /api/resumes/:resume_id
pub async fn get_resume(
    State(pipeline): State<AppState>,
    Path(resume_id): Path<String>,
) -> Result<Json<ResumeRecord>> {
    Ok(Json(pipeline.resume(&resume_id).await?))
}

/// POST /api/resumes/:resume_id/reprocess - Start a new run for an existing upload
pub async fn reprocess_resume(
    State(pipeline): State<AppState>,
    Path(resume_id): Path<String>,
) -> Result<(StatusCode, Json<Submission>)> {
    let submission = pipeline.reprocess(&resume_id).await?;
    Ok((StatusCode::ACCEPTED, Json(submission)))
}
