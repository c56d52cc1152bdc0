//! HTTP route handlers

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::StringRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, warn};

use super::models::{pdf_response, ApiError};
use super::validation::{validate_source, InputError};
use super::AppState;
use crate::compiler::DOCUMENT_STEM;
use crate::core::CompilationResult;

/// Build the service router
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.config.server.max_input_bytes;

    Router::new()
        .route("/compile", post(compile_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// POST /compile - compile raw LaTeX source into a PDF
async fn compile_handler(
    State(state): State<AppState>,
    body: Result<String, StringRejection>,
) -> Result<Response, ApiError> {
    let code = body.map_err(body_error)?;
    validate_source(&code, state.config.server.max_input_bytes)?;

    info!("Compile request: {} bytes", code.len());

    let result = match compile_source(&state, &code).await {
        Ok(result) => result,
        Err(e) => {
            error!("Compilation could not be run: {:#}", e);
            return Err(ApiError::internal());
        }
    };

    match result {
        CompilationResult::Success { artifact } => {
            info!("Compilation succeeded: {} byte PDF", artifact.len());
            Ok(pdf_response(artifact))
        }
        CompilationResult::Failure {
            reason,
            diagnostics,
        } => {
            info!(
                "Compilation failed: reason={}, diagnostics={}",
                reason,
                diagnostics.len()
            );
            Err(ApiError::from_failure(&reason, diagnostics))
        }
    }
}

/// GET /health - liveness probe
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Stage the source in a fresh directory and hand it to the compiler
///
/// The directory and everything the compiler wrote into it is removed on return.
async fn compile_source(state: &AppState, code: &str) -> Result<CompilationResult> {
    let temp_dir = tempfile::tempdir().context("Failed to create working directory")?;
    let source_path = temp_dir.path().join(format!("{}.tex", DOCUMENT_STEM));

    tokio::fs::write(&source_path, code)
        .await
        .with_context(|| format!("Failed to stage source at {:?}", source_path))?;

    state.compiler.compile(&source_path, temp_dir.path()).await
}

fn body_error(rejection: StringRejection) -> InputError {
    match rejection {
        StringRejection::InvalidUtf8(_) => InputError::NotUtf8,
        rejection if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => InputError::TooLarge,
        rejection => {
            warn!("Rejected request body: {}", rejection.body_text());
            InputError::Body(rejection.body_text())
        }
    }
}
