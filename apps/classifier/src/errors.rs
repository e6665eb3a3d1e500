use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::llm_client::LlmError;

/// Run-level error type.
///
/// Per-document and per-batch problems never surface here: they are recorded in
/// the store and counted in the phase report. Anything that reaches this type
/// terminates the run (or, behind the HTTP surface, the request).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Phase '{phase}' requires a completed '{missing}' checkpoint")]
    Dependency {
        phase: &'static str,
        missing: &'static str,
    },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Discovery failed for '{dimension}': {reason}")]
    Discovery { dimension: String, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Corpus error at {path}: {reason}")]
    Corpus { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Unknown prompt template '{0}'")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Run cancelled before phase '{0}'")]
    Cancelled(&'static str),
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            PipelineError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            PipelineError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            PipelineError::Store(e) => {
                tracing::error!("Store error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORE_ERROR",
                    "A storage error occurred".to_string(),
                )
            }
            other => {
                tracing::error!("Internal error: {other}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
