//! HTTP response models

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use super::validation::InputError;
use crate::core::FailureReason;

/// Placeholder used when a failed compilation left no recognisable error line
pub const UNKNOWN_ERROR: &str = "Unknown LaTeX error";

/// Filename suggested to clients for the returned PDF
pub const PDF_FILENAME: &str = "document.pdf";

/// JSON body of every failed request
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

/// Failure response: status code plus `ErrorBody`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                status: "failed",
                message: message.into(),
                errors: None,
            },
        }
    }

    /// Map a compilation failure onto its status code and message
    pub fn from_failure(reason: &FailureReason, diagnostics: Vec<String>) -> Self {
        match reason {
            FailureReason::Timeout => {
                Self::new(StatusCode::REQUEST_TIMEOUT, "Compilation timed out")
            }
            FailureReason::MemoryLimit { observed_bytes } => Self::new(
                StatusCode::INSUFFICIENT_STORAGE,
                format!(
                    "Compilation exceeded memory limit ({} bytes in use)",
                    observed_bytes
                ),
            ),
            FailureReason::ArtifactTooLarge { .. } => {
                Self::new(StatusCode::INSUFFICIENT_STORAGE, "PDF too large")
            }
            FailureReason::CompilationError => {
                let errors = if diagnostics.is_empty() {
                    vec![UNKNOWN_ERROR.to_string()]
                } else {
                    diagnostics
                };
                let mut error = Self::new(StatusCode::BAD_REQUEST, "LaTeX compilation failed");
                error.body.errors = Some(errors);
                error
            }
        }
    }

    /// Environment failure, details stay in the server log
    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal compilation error",
        )
    }
}

impl From<InputError> for ApiError {
    fn from(err: InputError) -> Self {
        let status = match err {
            InputError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Successful compilation: the raw PDF as an attachment
pub fn pdf_response(artifact: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}", PDF_FILENAME),
            ),
        ],
        artifact,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_error_body_omits_empty_errors() {
        let err = ApiError::from_failure(&FailureReason::Timeout, vec![]);
        assert_eq!(err.status, StatusCode::REQUEST_TIMEOUT);

        let json: Value = serde_json::to_value(&err.body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"status": "failed", "message": "Compilation timed out"})
        );
    }

    #[test]
    fn test_compilation_error_substitutes_unknown() {
        let err = ApiError::from_failure(&FailureReason::CompilationError, vec![]);
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.body.errors, Some(vec![UNKNOWN_ERROR.to_string()]));
    }

    #[test]
    fn test_compilation_error_keeps_diagnostics() {
        let lines = vec!["! Missing $ inserted.".to_string()];
        let err = ApiError::from_failure(&FailureReason::CompilationError, lines.clone());
        assert_eq!(err.body.errors, Some(lines));
    }

    #[test]
    fn test_oversize_statuses() {
        let artifact = ApiError::from_failure(&FailureReason::ArtifactTooLarge { size: 1 }, vec![]);
        assert_eq!(artifact.status, StatusCode::INSUFFICIENT_STORAGE);
        assert_eq!(artifact.body.message, "PDF too large");

        let memory = ApiError::from_failure(
            &FailureReason::MemoryLimit {
                observed_bytes: 2048,
            },
            vec![],
        );
        assert_eq!(memory.status, StatusCode::INSUFFICIENT_STORAGE);
        assert!(memory.body.message.contains("2048"));
    }

    #[test]
    fn test_input_error_statuses() {
        assert_eq!(
            ApiError::from(InputError::TooLarge).status,
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ApiError::from(InputError::Empty).status,
            StatusCode::BAD_REQUEST
        );
    }
}
