// crates/backend-lib/src/error.rs

//! Central error type + Axum integration.
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use voiceroom_common::RuleViolation;

/// Application error types with error codes and context
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Username already taken")]
    UsernameTaken,

    #[error("Account suspended")]
    Suspended,

    #[error("Room not found")]
    RoomNotFound,

    #[error("User not found")]
    UserNotFound,

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Authentication rate limit exceeded")]
    AuthRateLimited,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A commit precondition failed; the transaction runner retries these
    #[error("Write conflict on {0}")]
    Conflict(String),

    #[error("Gave up after {attempts} conflicting attempts")]
    Contention { attempts: u32 },

    #[error(transparent)]
    Rule(#[from] RuleViolation),

    #[error("AI host error: {0}")]
    Ai(String),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Auth(_) | AppError::InvalidPassword => StatusCode::UNAUTHORIZED,
            AppError::Suspended => StatusCode::FORBIDDEN,
            AppError::NotFound(_) | AppError::RoomNotFound | AppError::UserNotFound => StatusCode::NOT_FOUND,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimitExceeded | AppError::AuthRateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::UsernameTaken | AppError::Conflict(_) | AppError::Contention { .. } => StatusCode::CONFLICT,
            AppError::Rule(RuleViolation::NotPermitted(_) | RuleViolation::Banned { .. }) => StatusCode::FORBIDDEN,
            AppError::Rule(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Ai(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Auth(_) => "AUTH_001",
            AppError::Internal(_) => "INT_001",
            AppError::NotFound(_) => "NF_001",
            AppError::Io(_) => "IO_001",
            AppError::Json(_) => "JSON_001",
            AppError::InvalidPassword => "AUTH_002",
            AppError::AuthRateLimited => "AUTH_003",
            AppError::UsernameTaken => "AUTH_004",
            AppError::Suspended => "AUTH_005",
            AppError::RoomNotFound => "ROOM_001",
            AppError::UserNotFound => "USER_001",
            AppError::RateLimitExceeded => "RATE_001",
            AppError::InvalidInput(_) => "VAL_001",
            AppError::Conflict(_) => "TXN_001",
            AppError::Contention { .. } => "TXN_002",
            AppError::Rule(rule) => rule.code(),
            AppError::Ai(_) => "AI_001",
        }
    }

    /// Get a sanitized message suitable for production use
    pub fn sanitized_message(&self) -> String {
        match self {
            AppError::Auth(_) | AppError::InvalidPassword => "Authentication failed".to_string(),
            AppError::AuthRateLimited => "Too many authentication attempts, please try again later".to_string(),
            AppError::UsernameTaken => "Username already taken".to_string(),
            AppError::Suspended => "Account suspended".to_string(),
            AppError::Internal(_) | AppError::Io(_) => "An internal server error occurred".to_string(),
            AppError::Json(_) => "Invalid request format".to_string(),
            AppError::NotFound(_) | AppError::RoomNotFound | AppError::UserNotFound => {
                "Resource not found".to_string()
            },
            AppError::RateLimitExceeded => "Rate limit exceeded, please try again later".to_string(),
            AppError::InvalidInput(_) => "Invalid input provided".to_string(),
            AppError::Conflict(_) | AppError::Contention { .. } => "Busy, please try again".to_string(),
            // rule violations carry no internals and are shown as-is
            AppError::Rule(rule) => rule.to_string(),
            AppError::Ai(_) => "The AI host is unavailable".to_string(),
        }
    }

    /// Message for the wire: full detail in debug builds, sanitized otherwise
    pub fn client_message(&self) -> String {
        if cfg!(debug_assertions) {
            self.to_string()
        } else {
            self.sanitized_message()
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": {
                "code": self.error_code(),
                "message": self.client_message(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for AppError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        AppError::Internal("Failed to send message".to_string())
    }
}

impl From<crate::validation::ValidationError> for AppError {
    fn from(err: crate::validation::ValidationError) -> Self {
        AppError::InvalidInput(err.to_string())
    }
}
