//! HTTP error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use parley_core::{AuthError, MessageError, StoreError};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

/// An error returned to HTTP callers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn unavailable(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, code, message)
    }

    #[cfg(test)]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        let message = error.to_string();
        match error {
            AuthError::Missing => {
                ApiError::new(StatusCode::UNAUTHORIZED, "MISSING_CREDENTIAL", message)
            }
            AuthError::Invalid(_) => {
                ApiError::new(StatusCode::UNAUTHORIZED, "INVALID_CREDENTIAL", message)
            }
            AuthError::Unverified => {
                ApiError::new(StatusCode::UNAUTHORIZED, "ACCOUNT_UNVERIFIED", message)
            }
            AuthError::Store(_) => ApiError::unavailable("STORE_UNAVAILABLE", message),
        }
    }
}

impl From<MessageError> for ApiError {
    fn from(error: MessageError) -> Self {
        let message = error.to_string();
        match error {
            MessageError::Validation(_) => ApiError::bad_request("INVALID_MESSAGE", message),
            MessageError::Persistence(_) => ApiError::unavailable("PERSISTENCE_FAILED", message),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        ApiError::unavailable("STORE_UNAVAILABLE", error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
