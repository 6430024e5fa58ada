//! Session start writes its session and first refresh token together.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{config, harness};
use serde_json::{Map, Value};
use tollgate_core::AuthCoreService;
use tollgate_core::AuthError;
use tollgate_core::audit::AuditEventBus;
use tollgate_core::keys::SigningKeyStore;
use tollgate_core::models::{ClientType, Session, TokenRecord, TokenType};
use tollgate_core::rate_limit::MemoryRateLimitBackend;
use tollgate_core::service::StartSession;
use tollgate_core::store::{AuthStores, MemoryAuthStore, SessionStore, StoreError, TokenStore};
use uuid::Uuid;

/// Token store whose writes are refused by an unavailable backend.
struct UnavailableTokens {
    inner: Arc<MemoryAuthStore>,
}

fn down() -> StoreError {
    StoreError::Unavailable("token backend down".into())
}

#[async_trait]
impl TokenStore for UnavailableTokens {
    async fn insert_token(&self, _record: &TokenRecord) -> Result<(), StoreError> {
        Err(down())
    }

    async fn find_token(&self, id: Uuid) -> Result<Option<TokenRecord>, StoreError> {
        self.inner.find_token(id).await
    }

    async fn rotate_token(
        &self,
        _old_id: Uuid,
        _successor: &TokenRecord,
        _now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Err(down())
    }

    async fn open_session(
        &self,
        _session: &Session,
        _first: &TokenRecord,
    ) -> Result<(), StoreError> {
        Err(down())
    }

    async fn revoke_token(
        &self,
        _id: Uuid,
        _metadata: &Map<String, Value>,
        _now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Err(down())
    }

    async fn revoke_family(&self, _family_id: Uuid, _now: DateTime<Utc>) -> Result<u64, StoreError> {
        Err(down())
    }

    async fn revoke_session_tokens(
        &self,
        _session_id: Uuid,
        _now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Err(down())
    }

    async fn touch_token(&self, _id: Uuid, _now: DateTime<Utc>) -> Result<(), StoreError> {
        Err(down())
    }

    async fn list_tokens(
        &self,
        user_id: &str,
        token_type: TokenType,
    ) -> Result<Vec<TokenRecord>, StoreError> {
        self.inner.list_tokens(user_id, token_type).await
    }
}

#[tokio::test]
async fn failed_token_write_leaves_no_session_behind() {
    let store = harness().store;
    let service = AuthCoreService::new(
        config(),
        AuthStores {
            tokens: Arc::new(UnavailableTokens {
                inner: store.clone(),
            }),
            sessions: store.clone(),
            directory: store.clone(),
            clients: store.clone(),
        },
        Arc::new(SigningKeyStore::from_seed_or_generate(None).unwrap()),
        Arc::new(MemoryRateLimitBackend::new()),
        Arc::new(AuditEventBus::new()),
    );

    let err = service
        .start_session(StartSession {
            user_id: "u1".into(),
            client_type: ClientType::Web,
            client_id: None,
            mfa_level: 1,
            scopes: Vec::new(),
            workspace_id: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::Unavailable(_)));
    assert!(err.is_retryable());
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn successful_start_writes_session_and_token_together() {
    let h = harness();
    let tokens = common::login(&h, "u1").await;
    assert_eq!(h.store.write_count(), 2);
    assert_eq!(tokens.refresh.record.session_id, Some(tokens.session_id));
    assert!(h.store.find_session(tokens.session_id).await.unwrap().is_some());
}
