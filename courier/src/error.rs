//! HTTP-facing error types

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use courier_delivery::DispatchError;
use serde_json::json;
use thiserror::Error;

/// Errors returned from API handlers
///
/// Each renders as `{"error": <message>}` with a matching status code.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing required fields")]
    MissingFields,

    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,

    #[error("{0}")]
    Dispatch(DispatchError),

    #[error("Failed to get status")]
    Status,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingFields | Self::InvalidEmail | Self::InvalidBody(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Dispatch(_) | Self::Status | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(error: DispatchError) -> Self {
        match error {
            DispatchError::RateLimitExceeded => Self::RateLimited,
            other => Self::Dispatch(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// Errors from running the API server itself
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified address
    #[error("Failed to bind API server to {address}: {source}")]
    BindError {
        address: String,
        source: std::io::Error,
    },

    /// API server encountered a runtime error
    #[error("API server error: {0}")]
    ServerError(String),
}
