use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure modes of the retrieval pipeline.
///
/// Signal-level variants (`SignalTimeout`, `SignalError`, `RerankUnavailable`)
/// are absorbed at their component boundary and never abort a request; they
/// exist so the absorbing code can log and count them uniformly. The
/// remaining variants are request-fatal and surface as an HTTP error or a
/// terminal `error` stream event.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Query planning failed: {message}")]
    PlanningFailed { message: String },

    #[error("Retrieval signal '{signal}' timed out after {timeout_ms}ms")]
    SignalTimeout { signal: String, timeout_ms: u64 },

    #[error("Retrieval signal '{signal}' failed: {message}")]
    SignalError { signal: String, message: String },

    #[error("Reranker unavailable: {message}")]
    RerankUnavailable { message: String },

    #[error("Token budget of {budget} cannot fit any chunk (smallest candidate costs {smallest})")]
    ContextOverflow { budget: usize, smallest: usize },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Client disconnected mid-stream")]
    ClientDisconnected,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    /// Machine-readable code included in error bodies and stream events.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::PlanningFailed { .. } => "PLANNING_FAILED",
            PipelineError::SignalTimeout { .. } => "SIGNAL_TIMEOUT",
            PipelineError::SignalError { .. } => "SIGNAL_ERROR",
            PipelineError::RerankUnavailable { .. } => "RERANK_UNAVAILABLE",
            PipelineError::ContextOverflow { .. } => "CONTEXT_OVERFLOW",
            PipelineError::InvalidRequest { .. } => "INVALID_REQUEST",
            PipelineError::ClientDisconnected => "CLIENT_DISCONNECTED",
            PipelineError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            PipelineError::PlanningFailed { .. } | PipelineError::ContextOverflow { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            PipelineError::SignalTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            PipelineError::SignalError { .. } | PipelineError::RerankUnavailable { .. } => {
                StatusCode::BAD_GATEWAY
            }
            PipelineError::ClientDisconnected | PipelineError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        if self.is_server_error() {
            tracing::error!(error = %message, code, status = status.as_u16(), "Request failed");
        } else {
            tracing::warn!(error = %message, code, status = status.as_u16(), "Request rejected");
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}
