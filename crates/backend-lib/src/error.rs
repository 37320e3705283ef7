// ============================
// crates/backend-lib/src/error.rs
// ============================
//! Central error type + Axum integration.
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use grimstack_common::ErrorBody;
use thiserror::Error;

use crate::auth::token::TokenError;
use crate::mail::MailError;
use crate::mail::templates::TemplateError;
use crate::storage::StoreError;
use crate::validation::ValidationError;

/// Message returned for every authorization failure, whatever the cause
pub const UNAUTHORIZED_MESSAGE: &str = "unauthorized request, cannot proceed";

/// Application error types with error codes and context
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Carries no cause on purpose; callers log the cause before returning it.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::InvalidInput(_) => "VAL_001",
            AppError::Unauthorized => "AUTH_001",
            AppError::RateLimited => "RATE_001",
            AppError::StorageUnavailable(_) => "STORE_001",
            AppError::Internal(_) => "INT_001",
        }
    }

    /// Get a sanitized message suitable for production use
    pub fn sanitized_message(&self) -> String {
        match self {
            // Input errors must be specific enough to fix the request.
            AppError::InvalidInput(msg) => msg.clone(),
            AppError::Unauthorized => UNAUTHORIZED_MESSAGE.to_string(),
            AppError::RateLimited => {
                "too many auth requests/emails, wait a bit and try again".to_string()
            },
            AppError::StorageUnavailable(_) => {
                "server error, could not complete your request".to_string()
            },
            AppError::Internal(_) => "An internal server error occurred".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            AppError::StorageUnavailable(cause) => {
                tracing::error!(error = %cause, "document store unavailable");
            },
            AppError::Internal(cause) => {
                tracing::error!(error = %cause, "internal error");
            },
            _ => {},
        }

        // Only server-side failures show their cause, and only in debug builds.
        let message = match &self {
            AppError::StorageUnavailable(_) | AppError::Internal(_) if cfg!(debug_assertions) => {
                self.to_string()
            },
            _ => self.sanitized_message(),
        };

        let body = ErrorBody {
            msg: message,
            ok: false,
            code: self.error_code().to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Unauthorized => AppError::Unauthorized,
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => AppError::StorageUnavailable(msg),
            StoreError::NotFound | StoreError::Conflict(_) => AppError::Unauthorized,
            StoreError::Io(e) => AppError::Internal(e.to_string()),
            StoreError::Json(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::InvalidInput(err.client_message().to_string())
    }
}

impl From<TemplateError> for AppError {
    fn from(err: TemplateError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<MailError> for AppError {
    fn from(err: MailError) -> Self {
        AppError::Internal(err.to_string())
    }
}
