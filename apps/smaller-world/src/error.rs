//! Errors for the HTTP API and the CLI.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use smaller_world_core::{Error as CoreError, StoreError, TokenError, ValidationErrors};
use thiserror::Error;

use crate::config::ConfigError;
use crate::jobs::JobError;
use crate::push::PushError;

/// API error, rendered as JSON.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("missing friend token")]
    MissingFriendToken,

    #[error("invalid token: {0}")]
    InvalidToken(#[from] TokenError),

    #[error("not allowed")]
    Forbidden,

    #[error("{0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Invalid(ValidationErrors),

    #[error("too many requests")]
    RateLimited,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingParameter(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotAuthenticated | Self::MissingFriendToken | Self::InvalidToken(_) => {
                StatusCode::UNAUTHORIZED
            }
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::NotFound { .. } => Self::NotFound(error.to_string()),
            CoreError::Invalid(errors) => Self::Invalid(errors),
            CoreError::Forbidden => Self::Forbidden,
            CoreError::NotAuthenticated => Self::NotAuthenticated,
            CoreError::Token(token) => Self::InvalidToken(token),
            CoreError::InvalidRecipient(_) | CoreError::Storage(_) => Self::Internal(error.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        Self::Internal(error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        let body = match self {
            Self::Invalid(errors) => json!({ "errors": errors }),
            // Internal details stay in the log.
            Self::Internal(_) => json!({ "error": "internal server error" }),
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

/// CLI error.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("database already exists at {0} (use --force to overwrite)")]
    AlreadyExists(String),

    #[error("database not found at {0} (run `smaller-world init` first)")]
    NotInitialized(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Push(#[from] PushError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Invalid(String),
}
