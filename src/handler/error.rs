//! Per-request errors and the stage sentinel.

use axum::http::StatusCode;
use thiserror::Error;

/// An error that ends request processing with an HTTP status.
#[derive(Debug, Clone, Error)]
#[error("HTTP {status}: {message}")]
pub struct HttpError {
    pub status: StatusCode,
    pub message: String,
}

impl HttpError {
    /// Build an error from a numeric status. Invalid codes become 500.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }
}

/// Why the stage sequence stopped early.
#[derive(Debug)]
pub enum Halt {
    /// The handler already wrote its error response; recovery does nothing.
    Written,
    /// An error the recovery stage turns into a response.
    Error(HttpError),
}

impl From<HttpError> for Halt {
    fn from(err: HttpError) -> Self {
        Halt::Error(err)
    }
}

/// Result of every lifecycle hook and verb method.
pub type HandlerResult = Result<(), Halt>;
