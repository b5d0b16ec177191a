//! Error responses.
//!
//! Handler failures are logged where they happen and returned to the client
//! as `{"message": "<status text>"}`; they never reach the shutdown path.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::upstream::UpstreamError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
}

impl ErrorResponse {
    pub fn for_status(status: StatusCode) -> Self {
        Self {
            message: status.canonical_reason().unwrap_or("Unknown").to_string(),
        }
    }
}

/// Failures a handler can return.
#[derive(Debug)]
pub enum HandlerError {
    Upstream(UpstreamError),
}

impl From<UpstreamError> for HandlerError {
    fn from(err: UpstreamError) -> Self {
        HandlerError::Upstream(err)
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let status = match &self {
            HandlerError::Upstream(err) if err.is_cancelled() => {
                tracing::info!(error = %err, "Upstream call cancelled");
                StatusCode::SERVICE_UNAVAILABLE
            }
            HandlerError::Upstream(err) => {
                tracing::warn!(error = %err, "Upstream call failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(ErrorResponse::for_status(status))).into_response()
    }
}
