use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use super::schema::{ErrorResponse, FieldIssue, RateLimitedResponse, ValidationErrorResponse};
use crate::services::rate_limit::{rate_limit_headers, RateLimitStatus};

pub const RATE_LIMITED_MESSAGE: &str = "Taxa de requisições excedida. Tente novamente em breve.";
pub const VALIDATION_FAILED: &str = "Invalid request parameters";
pub const EMBEDDING_FAILED: &str = "Failed to process message";
pub const COMPLETION_FAILED: &str = "Failed to generate response";

#[derive(Error, Debug)]
pub enum AskNormaError {
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Invalid request parameters")]
    Validation(Vec<FieldIssue>),
    #[error("Rate limit exceeded")]
    RateLimited { status: RateLimitStatus, limit: u32 },
    /// A provider failed before any output was sent. The message is the
    /// generic text returned to the caller.
    #[error("{0}")]
    Upstream(&'static str),
}

impl IntoResponse for AskNormaError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation(details) => (
                StatusCode::BAD_REQUEST,
                Json(ValidationErrorResponse {
                    error: VALIDATION_FAILED.to_string(),
                    details,
                }),
            )
                .into_response(),
            Self::RateLimited { status, limit } => (
                StatusCode::TOO_MANY_REQUESTS,
                rate_limit_headers(&status, limit),
                Json(RateLimitedResponse {
                    error: RATE_LIMITED_MESSAGE.to_string(),
                    success: false,
                    retry_after: status.retry_after,
                }),
            )
                .into_response(),
            other => {
                let status = match other {
                    Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (
                    status,
                    Json(ErrorResponse {
                        error: other.to_string(),
                    }),
                )
                    .into_response()
            }
        }
    }
}
