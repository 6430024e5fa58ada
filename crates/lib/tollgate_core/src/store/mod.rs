//! Persistence contracts consumed by the core.
//!
//! `PgAuthStore` implements every trait over Postgres; `MemoryAuthStore`
//! implements the same contracts in memory with identical conditional-write
//! semantics. All calls from the core go through [`bounded`].

pub mod memory;
pub mod postgres;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::error::AuthError;
use crate::models::{OAuthClientRecord, Session, TokenRecord, TokenType, User, WorkspaceMembership};

pub use memory::MemoryAuthStore;
pub use postgres::PgAuthStore;

/// Errors raised by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Duplicate key: {0}")]
    Duplicate(String),

    /// Key-value backend refused or dropped the call.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Connection-level failures that a retry may fix.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_)
                | StoreError::Sql(
                    sqlx::Error::PoolTimedOut
                        | sqlx::Error::PoolClosed
                        | sqlx::Error::Io(_)
                        | sqlx::Error::WorkerCrashed
                )
        )
    }
}

/// Refresh tokens and personal access tokens.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert_token(&self, record: &TokenRecord) -> Result<(), StoreError>;

    async fn find_token(&self, id: Uuid) -> Result<Option<TokenRecord>, StoreError>;

    /// Revoke `old_id` and insert `successor` as one atomic step.
    ///
    /// The revoke is conditional on `old_id` not being revoked yet. Returns
    /// `false`, writing nothing, when another caller got there first.
    async fn rotate_token(
        &self,
        old_id: Uuid,
        successor: &TokenRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Insert a new session and its first refresh token as one atomic step.
    /// On error neither row is written.
    async fn open_session(&self, session: &Session, first: &TokenRecord) -> Result<(), StoreError>;

    /// Stamp `revoked_at` and replace metadata, only if not revoked yet.
    /// Returns whether a write happened.
    async fn revoke_token(
        &self,
        id: Uuid,
        metadata: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Revoke every live member of a family. Returns the number revoked.
    async fn revoke_family(&self, family_id: Uuid, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Revoke every live token bound to a session. Returns the number revoked.
    async fn revoke_session_tokens(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn touch_token(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Tokens of one type for a user, newest first.
    async fn list_tokens(
        &self,
        user_id: &str,
        token_type: TokenType,
    ) -> Result<Vec<TokenRecord>, StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError>;

    async fn find_session(&self, id: Uuid) -> Result<Option<Session>, StoreError>;

    /// Conditionally stamp `revoked_at`. Returns whether a write happened.
    async fn revoke_session(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Slide the idle expiry of a live session, capped at its absolute expiry.
    async fn extend_session(
        &self,
        id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

/// Users and workspace memberships, owned by the wider platform.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError>;

    /// Memberships of a profile, oldest first, ties broken by workspace id.
    async fn list_memberships(
        &self,
        profile_id: &str,
    ) -> Result<Vec<WorkspaceMembership>, StoreError>;
}

#[async_trait]
pub trait OAuthClientStore: Send + Sync {
    async fn find_client(&self, client_id: &str) -> Result<Option<OAuthClientRecord>, StoreError>;
}

/// Handles to every store the core talks to.
#[derive(Clone)]
pub struct AuthStores {
    pub tokens: Arc<dyn TokenStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub directory: Arc<dyn DirectoryStore>,
    pub clients: Arc<dyn OAuthClientStore>,
}

impl AuthStores {
    /// Use one backend for every contract.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: TokenStore + SessionStore + DirectoryStore + OAuthClientStore + 'static,
    {
        Self {
            tokens: store.clone(),
            sessions: store.clone(),
            directory: store.clone(),
            clients: store,
        }
    }
}

/// Run a store call under a deadline. Elapsed deadlines surface as
/// [`AuthError::Unavailable`].
pub async fn bounded<T, F>(limit: Duration, operation: &'static str, fut: F) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(|e| {
            warn!(operation, "store call failed: {e}");
            AuthError::from(e)
        }),
        Err(_) => {
            warn!(operation, ?limit, "store call timed out");
            Err(AuthError::Unavailable(format!(
                "{operation} timed out after {limit:?}"
            )))
        }
    }
}
