// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;

/// Why the remote API asked us to slow down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitReason {
    /// Ordinary request throttling; handled by the client's backoff curve.
    Throttled,
    /// The account ran out of complexity credits; handled by the fetch
    /// orchestrator's longer cooldown.
    InsufficientCredits,
}

/// Failure of a remote GraphQL call, classified by what the caller can do about it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    #[error("Remote authentication failed: {message}")]
    Authentication {
        message: String,
        code: Option<String>,
    },

    #[error("Remote authorization failed: {message}")]
    Authorization {
        message: String,
        code: Option<String>,
    },

    #[error("Remote rejected input: {message}")]
    Validation {
        message: String,
        code: Option<String>,
        details: Option<serde_json::Value>,
    },

    #[error("Remote rate limit: {message}")]
    RateLimit {
        message: String,
        code: Option<String>,
        reason: RateLimitReason,
        retry_after: Option<Duration>,
    },

    #[error("Remote system error: {message}")]
    System {
        message: String,
        code: Option<String>,
    },
}

impl RemoteError {
    /// Shorthand for an uncoded system error.
    pub fn system(message: impl Into<String>) -> Self {
        RemoteError::System {
            message: message.into(),
            code: None,
        }
    }

    /// Shorthand for an uncoded authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        RemoteError::Authentication {
            message: message.into(),
            code: None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            RemoteError::Authentication { message, .. }
            | RemoteError::Authorization { message, .. }
            | RemoteError::Validation { message, .. }
            | RemoteError::RateLimit { message, .. }
            | RemoteError::System { message, .. } => message,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            RemoteError::Authentication { code, .. }
            | RemoteError::Authorization { code, .. }
            | RemoteError::Validation { code, .. }
            | RemoteError::RateLimit { code, .. }
            | RemoteError::System { code, .. } => code.as_deref(),
        }
    }

    /// Stable machine name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteError::Authentication { .. } => "authentication",
            RemoteError::Authorization { .. } => "authorization",
            RemoteError::Validation { .. } => "validation",
            RemoteError::RateLimit { .. } => "rate_limit",
            RemoteError::System { .. } => "system",
        }
    }

    /// Whether the query client may transparently retry this error.
    ///
    /// Credit shortfalls are excluded: they are surfaced immediately so the
    /// fetch orchestrator can apply its own cooldown.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::RateLimit { reason, .. } => *reason == RateLimitReason::Throttled,
            RemoteError::System { .. } => true,
            _ => false,
        }
    }

    pub fn is_credit_shortfall(&self) -> bool {
        matches!(
            self,
            RemoteError::RateLimit {
                reason: RateLimitReason::InsufficientCredits,
                ..
            }
        )
    }
}

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Aborted: {0}")]
    Aborted(String),

    #[error("Cache for {scope} partially replaced ({written}/{expected} rows written): {reason}")]
    PartialReplace {
        scope: String,
        written: usize,
        expected: usize,
        reason: String,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", Some(msg.clone())),
            AppError::Remote(err) => {
                tracing::warn!(kind = err.kind(), error = %err, "Remote API error");
                let (status, name) = match err {
                    RemoteError::Authentication { .. } => {
                        (StatusCode::BAD_GATEWAY, "remote_auth_error")
                    }
                    RemoteError::Authorization { .. } => {
                        (StatusCode::BAD_GATEWAY, "remote_forbidden")
                    }
                    RemoteError::Validation { .. } => {
                        (StatusCode::BAD_REQUEST, "remote_validation_error")
                    }
                    RemoteError::RateLimit { .. } => {
                        (StatusCode::SERVICE_UNAVAILABLE, "remote_rate_limited")
                    }
                    RemoteError::System { .. } => (StatusCode::BAD_GATEWAY, "remote_error"),
                };
                (status, name, Some(err.message().to_string()))
            }
            AppError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "timeout", Some(msg.clone())),
            AppError::Aborted(msg) => (StatusCode::CONFLICT, "aborted", Some(msg.clone())),
            AppError::PartialReplace { .. } => {
                tracing::error!(error = %self, "Cache left partially replaced");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "partial_replace",
                    Some(self.to_string()),
                )
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_throttling_and_system_errors_retry() {
        assert!(RemoteError::system("boom").is_retryable());
        assert!(RemoteError::RateLimit {
            message: "slow down".into(),
            code: None,
            reason: RateLimitReason::Throttled,
            retry_after: None,
        }
        .is_retryable());

        assert!(!RemoteError::authentication("expired").is_retryable());
        assert!(!RemoteError::Authorization {
            message: "no".into(),
            code: None
        }
        .is_retryable());
        assert!(!RemoteError::Validation {
            message: "bad sku".into(),
            code: None,
            details: None
        }
        .is_retryable());
    }

    #[test]
    fn credit_shortfall_is_rate_limit_but_not_client_retryable() {
        let err = RemoteError::RateLimit {
            message: "There are not enough credits".into(),
            code: Some("30".into()),
            reason: RateLimitReason::InsufficientCredits,
            retry_after: None,
        };
        assert_eq!(err.kind(), "rate_limit");
        assert!(err.is_credit_shortfall());
        assert!(!err.is_retryable());
    }

    #[test]
    fn remote_errors_map_to_gateway_statuses() {
        let response = AppError::from(RemoteError::authentication("bad token")).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let response = AppError::Timeout("snapshot".into()).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

        let response = AppError::Aborted("snapshot".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
