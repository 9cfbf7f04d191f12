use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use subtitler_types::ErrorResponse;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StubError {
    #[error("Export not found: {0}")]
    ExportNotFound(String),

    #[error("Export not ready: {0}")]
    NotReady(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for StubError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            StubError::ExportNotFound(token) => {
                tracing::warn!(%token, "export not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Export not found", format!("Token: {token}")),
                )
            }
            StubError::NotReady(token) => (
                StatusCode::CONFLICT,
                ErrorResponse::with_details("Export is not complete", format!("Token: {token}")),
            ),
            StubError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "bad render request");
                (StatusCode::BAD_REQUEST, ErrorResponse::new(msg.clone()))
            }
        };
        (status, Json(body)).into_response()
    }
}
