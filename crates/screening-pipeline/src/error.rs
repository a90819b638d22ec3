//! Error types for the screening pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Queue channel unreachable or rejected the operation
    #[error("Queue error: {0}")]
    Queue(String),

    /// Object or document storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite failure
    #[error("Database error: {0}")]
    Database(String),

    /// Raw object missing from the object store
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// Entity missing from the document store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Text extraction failed for an uploaded file
    #[error("Failed to extract text from '{file_name}': {message}")]
    TextExtraction { file_name: String, message: String },

    /// Unsupported file type
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// Operation exceeded its time budget
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Inference service call failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Inference service replied with something that is not the expected structure
    #[error("Malformed inference response: {0}")]
    MalformedResponse(String),

    /// Request rejected before any work was done
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a queue error
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue(message.into())
    }

    /// Create a database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    /// Create a text extraction error
    pub fn text_extraction(file_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TextExtraction {
            file_name: file_name.into(),
            message: message.into(),
        }
    }

    /// Create an inference error
    pub fn inference(message: impl Into<String>) -> Self {
        Self::Inference(message.into())
    }

    /// Create a malformed response error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    /// Infrastructure failures that must abort the whole stage invocation.
    ///
    /// The batch is left unacknowledged so the queue redelivers all of it.
    pub fn is_systemic(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::Queue(_) | Error::Storage(_) | Error::Database(_) | Error::Io(_)
        )
    }

    /// Transient external-call failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Inference(_) | Error::Http(_) | Error::Timeout(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(err.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            Error::Queue(_) => (StatusCode::SERVICE_UNAVAILABLE, "queue_error"),
            Error::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            Error::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            Error::ObjectNotFound(_) | Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::TextExtraction { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "extraction_error"),
            Error::UnsupportedFileType(_) => (StatusCode::BAD_REQUEST, "unsupported_type"),
            Error::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            Error::Inference(_) => (StatusCode::SERVICE_UNAVAILABLE, "inference_error"),
            Error::MalformedResponse(_) => (StatusCode::BAD_GATEWAY, "malformed_response"),
            Error::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
            Error::Json(_) => (StatusCode::BAD_REQUEST, "json_error"),
            Error::Http(_) => (StatusCode::BAD_GATEWAY, "http_error"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::storage("bucket denied").is_systemic());
        assert!(Error::queue("unreachable").is_systemic());
        assert!(!Error::storage("bucket denied").is_retryable());

        assert!(Error::inference("rate limited").is_retryable());
        assert!(Error::Timeout("attempt".into()).is_retryable());
        assert!(!Error::inference("rate limited").is_systemic());

        let malformed = Error::malformed("not json");
        assert!(!malformed.is_retryable());
        assert!(!malformed.is_systemic());
    }
}
