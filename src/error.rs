use std::io;

use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error types with appropriate HTTP status codes.
///
/// Endpoints answer with plain text, so every variant renders as a
/// single `message\n` body. The message is the one the client needs to fix
/// the request (`"5xyz: invalid size"`); the variant decides the status.
#[derive(Error, Debug)]
pub enum AppError {
    /// Invalid startup configuration. Never produced while serving.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// A confirmation token was missing or wrong.
    #[error("Not acceptable: {0}")]
    NotAcceptable(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AppError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            AppError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Config(_) | AppError::Internal(_) | AppError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Client-facing message (without the variant prefix).
    fn message(&self) -> String {
        match self {
            AppError::Config(_) => "Service configuration error".to_string(),
            AppError::BadRequest(msg)
            | AppError::NotAcceptable(msg)
            | AppError::NotImplemented(msg)
            | AppError::Unauthorized(msg)
            | AppError::PayloadTooLarge(msg)
            | AppError::Internal(msg) => msg.clone(),
            AppError::Io(e) => e.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Emitted inside the request span, so the record carries the request id
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        (
            status,
            [(CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("{}\n", self.message()),
        )
            .into_response()
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn render(err: AppError) -> (StatusCode, String) {
        let response = err.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_bad_request_is_plain_text() {
        let (status, body) = render(AppError::BadRequest("5xyz: invalid size".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "5xyz: invalid size\n");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        assert_eq!(
            AppError::NotAcceptable(String::new()).status(),
            StatusCode::NOT_ACCEPTABLE
        );
        assert_eq!(
            AppError::NotImplemented(String::new()).status(),
            StatusCode::NOT_IMPLEMENTED
        );
        assert_eq!(
            AppError::Unauthorized(String::new()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Io(io::Error::other("disk full")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_config_error_does_not_leak_details() {
        let (status, body) = render(AppError::Config("secret path /etc/x".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.contains("/etc/x"));
    }
}
