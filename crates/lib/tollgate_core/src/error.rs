//! Error taxonomy shared by every entry point of the core.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

/// Why a shape-valid credential was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnauthorizedReason {
    MissingCredential,
    NotFound,
    WrongTokenType,
    Revoked,
    Expired,
    SecretMismatch,
    SessionInvalid,
    UnknownPrincipal,
    /// A revoked refresh token was presented again. The whole family and the
    /// owning session have been revoked.
    TokenReuse {
        family_id: Option<Uuid>,
        session_id: Option<Uuid>,
    },
}

impl std::fmt::Display for UnauthorizedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::MissingCredential => "missing credential",
            Self::NotFound => "unknown token",
            Self::WrongTokenType => "token type not accepted here",
            Self::Revoked => "token revoked",
            Self::Expired => "token expired",
            Self::SecretMismatch => "token secret mismatch",
            Self::SessionInvalid => "session revoked or expired",
            Self::UnknownPrincipal => "unknown principal",
            Self::TokenReuse { .. } => "refresh token reuse detected",
        };
        f.write_str(text)
    }
}

/// Authentication core errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed, expired or badly signed credential.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(UnauthorizedReason),

    #[error("Principal is inactive")]
    InactiveUser,

    /// Authenticated but not entitled to the workspace, client or redirect.
    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Invalid expiry: {0}")]
    InvalidExpiry(String),

    /// A dependency did not answer in time. Safe to retry.
    #[error("Dependency unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limit exceeded for {key}")]
    RateLimited {
        key: String,
        limit: u32,
        remaining: u32,
        reset_epoch_seconds: i64,
        retry_after: Duration,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// True for the refresh-token theft signal. Monitoring should page on it.
    pub fn is_compromise_signal(&self) -> bool {
        matches!(
            self,
            AuthError::Unauthorized(UnauthorizedReason::TokenReuse { .. })
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::Unavailable(_))
    }

    /// Short machine-readable label, used in audit metadata and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::InvalidToken(_) => "invalid_token",
            AuthError::Unauthorized(UnauthorizedReason::TokenReuse { .. }) => "token_reuse",
            AuthError::Unauthorized(_) => "unauthorized",
            AuthError::InactiveUser => "inactive_user",
            AuthError::Authorization(_) => "authorization",
            AuthError::InvalidExpiry(_) => "invalid_expiry",
            AuthError::Unavailable(_) => "unavailable",
            AuthError::RateLimited { .. } => "rate_limited",
            AuthError::Validation(_) => "validation",
            AuthError::NotFound(_) => "not_found",
            AuthError::Store(_) => "store",
            AuthError::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        if e.is_transient() {
            AuthError::Unavailable(e.to_string())
        } else {
            AuthError::Store(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuse_is_the_only_compromise_signal() {
        let reuse = AuthError::Unauthorized(UnauthorizedReason::TokenReuse {
            family_id: Some(Uuid::now_v7()),
            session_id: None,
        });
        assert!(reuse.is_compromise_signal());
        assert_eq!(reuse.kind(), "token_reuse");

        let revoked = AuthError::Unauthorized(UnauthorizedReason::Revoked);
        assert!(!revoked.is_compromise_signal());
        assert_eq!(revoked.kind(), "unauthorized");
    }

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(AuthError::Unavailable("db".into()).is_retryable());
        assert!(!AuthError::InactiveUser.is_retryable());
    }

    #[test]
    fn transient_store_errors_become_unavailable() {
        let err: AuthError = StoreError::from(sqlx::Error::PoolTimedOut).into();
        assert!(err.is_retryable());

        let err: AuthError = StoreError::Corrupt("bad row".into()).into();
        assert!(matches!(err, AuthError::Store(_)));
    }
}
