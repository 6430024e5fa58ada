//! Application error types.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tollgate_core::AuthError;
use tracing::error;

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Credential missing or rejected. `code` is the machine-readable reason.
    #[error("Unauthorized: {message}")]
    Unauthorized { code: &'static str, message: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limit exceeded")]
    RateLimited {
        limit: u32,
        remaining: u32,
        reset_epoch_seconds: i64,
        retry_after_secs: u64,
    },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        let (status, error, message) = match &self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, "validation_error", m.clone()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.clone()),
            AppError::Unauthorized { code, message } => {
                headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                (StatusCode::UNAUTHORIZED, *code, message.clone())
            }
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m.clone()),
            AppError::RateLimited {
                limit,
                remaining,
                reset_epoch_seconds,
                retry_after_secs,
            } => {
                headers.insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
                headers.insert("x-ratelimit-limit", HeaderValue::from(*limit));
                headers.insert("x-ratelimit-remaining", HeaderValue::from(*remaining));
                headers.insert("x-ratelimit-reset", HeaderValue::from(*reset_epoch_seconds));
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    "rate_limited",
                    format!("Rate limit exceeded, retry in {retry_after_secs}s"),
                )
            }
            AppError::Unavailable(m) => {
                headers.insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable", m.clone())
            }
            AppError::Internal(detail) => {
                error!("internal error: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message,
        });
        (status, headers, body).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidToken(_) => AppError::Unauthorized {
                code: "invalid_token",
                message: e.to_string(),
            },
            AuthError::Unauthorized(_) => AppError::Unauthorized {
                code: e.kind(),
                message: e.to_string(),
            },
            AuthError::InactiveUser => AppError::Unauthorized {
                code: "inactive_user",
                message: e.to_string(),
            },
            AuthError::Authorization(m) => AppError::Forbidden(m),
            AuthError::InvalidExpiry(m) => AppError::Validation(format!("invalid expiry: {m}")),
            AuthError::Validation(m) => AppError::Validation(m),
            AuthError::RateLimited {
                limit,
                remaining,
                reset_epoch_seconds,
                retry_after,
                ..
            } => AppError::RateLimited {
                limit,
                remaining,
                reset_epoch_seconds,
                retry_after_secs: retry_after.as_secs().max(1),
            },
            AuthError::Unavailable(m) => AppError::Unavailable(m),
            AuthError::NotFound(m) => AppError::NotFound(m),
            AuthError::Store(_) | AuthError::Internal(_) => AppError::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tollgate_core::UnauthorizedReason;

    use super::*;

    #[test]
    fn rate_limit_sets_headers() {
        let resp = AppError::from(AuthError::RateLimited {
            key: "token-create:u1".into(),
            limit: 10,
            remaining: 0,
            reset_epoch_seconds: 1_700_000_000,
            retry_after: Duration::from_secs(42),
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        let h = resp.headers();
        assert_eq!(h[header::RETRY_AFTER], "42");
        assert_eq!(h["x-ratelimit-limit"], "10");
        assert_eq!(h["x-ratelimit-remaining"], "0");
        assert_eq!(h["x-ratelimit-reset"], "1700000000");
    }

    #[test]
    fn status_mapping() {
        let cases = [
            (AuthError::InvalidToken("x".into()), StatusCode::UNAUTHORIZED),
            (
                AuthError::Unauthorized(UnauthorizedReason::Revoked),
                StatusCode::UNAUTHORIZED,
            ),
            (AuthError::InactiveUser, StatusCode::UNAUTHORIZED),
            (AuthError::Authorization("w".into()), StatusCode::FORBIDDEN),
            (AuthError::InvalidExpiry("e".into()), StatusCode::BAD_REQUEST),
            (AuthError::Unavailable("db".into()), StatusCode::SERVICE_UNAVAILABLE),
            (AuthError::NotFound("t".into()), StatusCode::NOT_FOUND),
            (AuthError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn unauthorized_carries_challenge_header() {
        let resp = AppError::from(AuthError::Unauthorized(UnauthorizedReason::Expired))
            .into_response();
        assert_eq!(resp.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }
}
