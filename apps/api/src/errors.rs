use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::engine::pipeline::CycleReport;

/// Classification of a failed call to any external service (recruitment
/// platform, content generation, chat bot).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExternalError {
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// Network failure, 5xx, or rate limiting. Safe to try again later.
    #[error("transient failure: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },

    /// The service refused the request and will refuse it again.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl ExternalError {
    pub fn transient(message: impl Into<String>) -> Self {
        ExternalError::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExternalError::Timeout(_) | ExternalError::Transient { .. }
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ExternalError::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// The request URL is dropped: the Telegram endpoint carries the bot token.
impl From<reqwest::Error> for ExternalError {
    fn from(e: reqwest::Error) -> Self {
        ExternalError::transient(format!("HTTP error: {}", e.without_url()))
    }
}

/// Failure of the collaborator store or the key-value cache.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum TokenError {
    /// The refresh token was revoked or expired, or no credential is stored.
    /// Only the user can fix this by re-authorizing.
    #[error("authorization expired for user {user_id}: {reason}")]
    AuthorizationExpired { user_id: Uuid, reason: String },

    /// The token endpoint could not be reached; try again next cycle.
    #[error("token refresh unavailable: {0}")]
    Unavailable(ExternalError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors that escape `ApplicationPipeline::run_cycle`. Everything transient is
/// absorbed into the `CycleReport` instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("authorization expired: {reason}")]
    AuthorizationExpired {
        reason: String,
        /// Outcomes recorded before the cycle was halted.
        report: Box<CycleReport>,
    },

    #[error("user {0} not found")]
    UserNotFound(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// HTTP-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Unauthorized")]
    Unauthorized,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication required".to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
