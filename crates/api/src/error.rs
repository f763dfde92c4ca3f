//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::{ErrorKind, SagaError};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed path or query input, rejected before reaching the saga.
    BadRequest(String),
    /// Error raised by an order operation.
    Saga(SagaError),
}

impl ApiError {
    /// Returns the HTTP status this error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Saga(err) => match err.kind() {
                ErrorKind::InvalidParameter => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::Saga(err) if err.kind() == ErrorKind::Internal => {
                tracing::error!(error = %err, "internal server error");
                "Internal server error".to_string()
            }
            ApiError::Saga(err) => {
                tracing::debug!(error = %err, status = status.as_u16(), "request rejected");
                err.to_string()
            }
        };

        metrics::counter!("http_errors_total", "status" => status.as_u16().to_string())
            .increment(1);

        let body = serde_json::json!({ "success": false, "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}
