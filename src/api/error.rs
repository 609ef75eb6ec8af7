use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::services::orchestrator::SubmissionError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Submission(e) => match e {
                SubmissionError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                SubmissionError::Auth { .. } => StatusCode::SERVICE_UNAVAILABLE,
                SubmissionError::ContainerCreationFailed { .. }
                | SubmissionError::ChunkUploadFailed { .. }
                | SubmissionError::SchedulingAggregate { .. } => StatusCode::BAD_GATEWAY,
                SubmissionError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = json!({
            "ok": false,
            "error": self.to_string(),
        });

        match &self {
            AppError::BadRequest(msg) | AppError::PayloadTooLarge(msg) => {
                tracing::warn!("Rejected request: {}", msg);
                body["stage"] = json!("validation");
            }
            AppError::Submission(e) => {
                if status.is_server_error() {
                    tracing::error!(
                        stage = e.stage(),
                        radicado = e.radicado().unwrap_or("-"),
                        "❌ Submission failed: {}",
                        e
                    );
                }
                body["stage"] = json!(e.stage());
                if let Some(radicado) = e.radicado() {
                    body["radicado"] = json!(radicado);
                }
                if let Some(files) = e.files() {
                    body["files"] = json!(files);
                }
            }
        }

        (status, Json(body)).into_response()
    }
}
