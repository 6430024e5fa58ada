//! In-memory store.
//!
//! Conditional writes take the map entry's write lock, so a check-and-set on
//! one token id is atomic even when callers race.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{DirectoryStore, OAuthClientStore, SessionStore, StoreError, TokenStore};
use crate::models::{OAuthClientRecord, Session, TokenRecord, TokenType, User, WorkspaceMembership};

#[derive(Default)]
pub struct MemoryAuthStore {
    tokens: DashMap<Uuid, TokenRecord>,
    sessions: DashMap<Uuid, Session>,
    users: DashMap<String, User>,
    memberships: DashMap<String, Vec<WorkspaceMembership>>,
    clients: DashMap<String, OAuthClientRecord>,
    writes: AtomicU64,
}

impl MemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn disable_user(&self, user_id: &str, at: DateTime<Utc>) {
        if let Some(mut user) = self.users.get_mut(user_id) {
            user.disabled_at = Some(at);
        }
    }

    pub fn add_membership(&self, membership: WorkspaceMembership) {
        self.memberships
            .entry(membership.profile_id.clone())
            .or_default()
            .push(membership);
    }

    pub fn remove_membership(&self, profile_id: &str, workspace_id: &str) {
        if let Some(mut list) = self.memberships.get_mut(profile_id) {
            list.retain(|m| m.workspace_id != workspace_id);
        }
    }

    pub fn add_client(&self, client: OAuthClientRecord) {
        self.clients.insert(client.client_id.clone(), client);
    }

    /// Number of token and session writes performed so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Snapshot of every token in a family.
    pub fn family(&self, family_id: Uuid) -> Vec<TokenRecord> {
        self.tokens
            .iter()
            .filter(|t| t.family_id == Some(family_id))
            .map(|t| t.value().clone())
            .collect()
    }

    fn wrote(&self, n: u64) {
        self.writes.fetch_add(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl TokenStore for MemoryAuthStore {
    async fn insert_token(&self, record: &TokenRecord) -> Result<(), StoreError> {
        if self.tokens.contains_key(&record.id) {
            return Err(StoreError::Duplicate(format!("token {}", record.id)));
        }
        self.tokens.insert(record.id, record.clone());
        self.wrote(1);
        Ok(())
    }

    async fn find_token(&self, id: Uuid) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self.tokens.get(&id).map(|t| t.value().clone()))
    }

    async fn rotate_token(
        &self,
        old_id: Uuid,
        successor: &TokenRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        {
            let Some(mut old) = self.tokens.get_mut(&old_id) else {
                return Ok(false);
            };
            if old.revoked_at.is_some() {
                return Ok(false);
            }
            old.revoked_at = Some(now);
            old.metadata
                .insert("replacedBy".into(), Value::String(successor.id.to_string()));
        }
        self.tokens.insert(successor.id, successor.clone());
        self.wrote(2);
        Ok(true)
    }

    async fn open_session(&self, session: &Session, first: &TokenRecord) -> Result<(), StoreError> {
        if self.sessions.contains_key(&session.id) {
            return Err(StoreError::Duplicate(format!("session {}", session.id)));
        }
        if self.tokens.contains_key(&first.id) {
            return Err(StoreError::Duplicate(format!("token {}", first.id)));
        }
        self.sessions.insert(session.id, session.clone());
        self.tokens.insert(first.id, first.clone());
        self.wrote(2);
        Ok(())
    }

    async fn revoke_token(
        &self,
        id: Uuid,
        metadata: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Some(mut token) = self.tokens.get_mut(&id) else {
            return Ok(false);
        };
        if token.revoked_at.is_some() {
            return Ok(false);
        }
        token.revoked_at = Some(now);
        token.metadata = metadata.clone();
        drop(token);
        self.wrote(1);
        Ok(true)
    }

    async fn revoke_family(&self, family_id: Uuid, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut revoked = 0;
        for mut token in self.tokens.iter_mut() {
            if token.family_id == Some(family_id) && token.revoked_at.is_none() {
                token.revoked_at = Some(now);
                revoked += 1;
            }
        }
        self.wrote(revoked);
        Ok(revoked)
    }

    async fn revoke_session_tokens(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut revoked = 0;
        for mut token in self.tokens.iter_mut() {
            if token.session_id == Some(session_id) && token.revoked_at.is_none() {
                token.revoked_at = Some(now);
                revoked += 1;
            }
        }
        self.wrote(revoked);
        Ok(revoked)
    }

    async fn touch_token(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(mut token) = self.tokens.get_mut(&id) {
            token.last_used_at = Some(now);
        }
        Ok(())
    }

    async fn list_tokens(
        &self,
        user_id: &str,
        token_type: TokenType,
    ) -> Result<Vec<TokenRecord>, StoreError> {
        let mut out: Vec<TokenRecord> = self
            .tokens
            .iter()
            .filter(|t| t.user_id == user_id && t.token_type == token_type)
            .map(|t| t.value().clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }
}

#[async_trait]
impl SessionStore for MemoryAuthStore {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        if self.sessions.contains_key(&session.id) {
            return Err(StoreError::Duplicate(format!("session {}", session.id)));
        }
        self.sessions.insert(session.id, session.clone());
        self.wrote(1);
        Ok(())
    }

    async fn find_session(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.get(&id).map(|s| s.value().clone()))
    }

    async fn revoke_session(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let Some(mut session) = self.sessions.get_mut(&id) else {
            return Ok(false);
        };
        if session.revoked_at.is_some() {
            return Ok(false);
        }
        session.revoked_at = Some(now);
        drop(session);
        self.wrote(1);
        Ok(true)
    }

    async fn extend_session(
        &self,
        id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Some(mut session) = self.sessions.get_mut(&id) else {
            return Ok(false);
        };
        if session.revoked_at.is_some() {
            return Ok(false);
        }
        session.expires_at = expires_at.min(session.absolute_expires_at);
        drop(session);
        self.wrote(1);
        Ok(true)
    }
}

#[async_trait]
impl DirectoryStore for MemoryAuthStore {
    async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(id).map(|u| u.value().clone()))
    }

    async fn list_memberships(
        &self,
        profile_id: &str,
    ) -> Result<Vec<WorkspaceMembership>, StoreError> {
        let mut out = self
            .memberships
            .get(profile_id)
            .map(|m| m.value().clone())
            .unwrap_or_default();
        out.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.workspace_id.cmp(&b.workspace_id))
        });
        Ok(out)
    }
}

#[async_trait]
impl OAuthClientStore for MemoryAuthStore {
    async fn find_client(&self, client_id: &str) -> Result<Option<OAuthClientRecord>, StoreError> {
        Ok(self.clients.get(client_id).map(|c| c.value().clone()))
    }
}
