//! Opaque refresh tokens: issuance, rotation and reuse detection.
//!
//! A refresh token is single use. Rotating it revokes the presented token and
//! inserts a successor in the same family as one conditional store write.
//! Presenting a token that is already revoked means someone else holds a copy
//! of it: every member of the family and the owning session are revoked.

pub mod hashing;
pub mod wire;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Map;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditEventBus, AuditEventKind};
use crate::config::AuthConfig;
use crate::error::{AuthError, UnauthorizedReason};
use crate::ids::uuidv7;
use crate::models::{HashEnvelope, Session, TokenRecord, TokenType};
use crate::store::{AuthStores, SessionStore, TokenStore, bounded};

pub use hashing::SecretHasher;
pub use wire::OpaqueToken;

/// Input for [`TokenService::issue_refresh_token`] and
/// [`TokenService::open_session`].
#[derive(Debug, Clone)]
pub struct IssueRefreshToken {
    pub user_id: String,
    pub session_id: Uuid,
    pub expires_at: DateTime<Utc>,
    /// Existing family to join. A new family is started when `None`.
    pub family_id: Option<Uuid>,
    pub workspace_id: Option<String>,
    pub scopes: Vec<String>,
}

/// A stored token plus its plaintext wire value, returned exactly once.
#[derive(Clone)]
pub struct IssuedToken {
    pub wire: String,
    pub record: TokenRecord,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("wire", &"<redacted>")
            .field("record", &self.record)
            .finish()
    }
}

/// Result of a successful rotation.
#[derive(Debug, Clone)]
pub struct Rotation {
    /// The presented token, now revoked.
    pub revoked: TokenRecord,
    /// Its successor in the same family and session.
    pub issued: IssuedToken,
    /// The owning session, as loaded before the rotation.
    pub session: Session,
}

pub struct TokenService {
    tokens: Arc<dyn TokenStore>,
    sessions: Arc<dyn SessionStore>,
    hasher: Arc<SecretHasher>,
    audit: Arc<AuditEventBus>,
    refresh_ttl: Duration,
    store_timeout: std::time::Duration,
}

impl TokenService {
    pub fn new(
        stores: &AuthStores,
        hasher: Arc<SecretHasher>,
        audit: Arc<AuditEventBus>,
        config: &AuthConfig,
    ) -> Self {
        Self {
            tokens: stores.tokens.clone(),
            sessions: stores.sessions.clone(),
            hasher,
            audit,
            refresh_ttl: config.refresh_token_ttl,
            store_timeout: config.store_timeout,
        }
    }

    pub fn hasher(&self) -> &SecretHasher {
        &self.hasher
    }

    /// Fresh opaque token and the envelope to persist for it.
    pub fn mint(&self, now: DateTime<Utc>) -> Result<(OpaqueToken, HashEnvelope), AuthError> {
        let token = OpaqueToken::generate();
        let envelope = self.hasher.seal(&token.secret, now)?;
        Ok((token, envelope))
    }

    pub async fn issue_refresh_token(
        &self,
        request: IssueRefreshToken,
    ) -> Result<IssuedToken, AuthError> {
        let (token, record) = self.refresh_record(request, Utc::now())?;
        bounded(
            self.store_timeout,
            "insert_token",
            self.tokens.insert_token(&record),
        )
        .await?;
        Ok(self.issued(token, record))
    }

    /// Persist `session` together with its first refresh token. Nothing is
    /// written when either insert fails.
    pub async fn open_session(
        &self,
        session: &Session,
        request: IssueRefreshToken,
    ) -> Result<IssuedToken, AuthError> {
        let (token, record) = self.refresh_record(request, Utc::now())?;
        bounded(
            self.store_timeout,
            "open_session",
            self.tokens.open_session(session, &record),
        )
        .await?;
        Ok(self.issued(token, record))
    }

    fn refresh_record(
        &self,
        request: IssueRefreshToken,
        now: DateTime<Utc>,
    ) -> Result<(OpaqueToken, TokenRecord), AuthError> {
        if request.expires_at <= now {
            return Err(AuthError::InvalidExpiry(
                "refresh token expiry must be in the future".into(),
            ));
        }

        let (token, envelope) = self.mint(now)?;
        let record = TokenRecord {
            id: token.id,
            user_id: request.user_id,
            session_id: Some(request.session_id),
            workspace_id: request.workspace_id,
            token_type: TokenType::Refresh,
            token_hash: envelope,
            scopes: request.scopes,
            name: None,
            family_id: Some(request.family_id.unwrap_or_else(uuidv7)),
            metadata: Map::new(),
            expires_at: request.expires_at,
            revoked_at: None,
            last_used_at: None,
            created_at: now,
        };
        Ok((token, record))
    }

    fn issued(&self, token: OpaqueToken, record: TokenRecord) -> IssuedToken {
        self.audit.emit(
            AuditEvent::new(AuditEventKind::TokenIssued)
                .principal(&record.user_id)
                .subject(record.id)
                .meta("type", TokenType::Refresh.as_str())
                .meta(
                    "family",
                    record.family_id.map(|f| f.to_string()).unwrap_or_default(),
                ),
        );
        IssuedToken {
            wire: token.to_wire(),
            record,
        }
    }

    /// Parse a wire value and load its row without judging it.
    pub async fn lookup(&self, wire: &str) -> Result<(OpaqueToken, TokenRecord), AuthError> {
        let token = OpaqueToken::parse(wire)
            .ok_or_else(|| AuthError::InvalidToken("malformed opaque token".into()))?;
        let record = bounded(
            self.store_timeout,
            "find_token",
            self.tokens.find_token(token.id),
        )
        .await?
        .ok_or(AuthError::Unauthorized(UnauthorizedReason::NotFound))?;
        Ok((token, record))
    }

    /// Exchange a refresh token for its successor.
    ///
    /// Only a caller holding the correct secret can trigger reuse handling;
    /// a wrong secret is a plain rejection.
    pub async fn rotate(&self, wire: &str) -> Result<Rotation, AuthError> {
        let now = Utc::now();
        let (token, record) = self.lookup(wire).await?;

        if record.token_type != TokenType::Refresh {
            return Err(AuthError::Unauthorized(UnauthorizedReason::WrongTokenType));
        }
        if !self.hasher.verify(&token.secret, &record.token_hash) {
            debug!(token_id = %record.id, "refresh token secret mismatch");
            return Err(AuthError::Unauthorized(UnauthorizedReason::SecretMismatch));
        }
        if record.is_revoked() {
            return Err(self.detect_reuse(&record).await);
        }
        if record.is_expired(now) {
            return Err(AuthError::Unauthorized(UnauthorizedReason::Expired));
        }

        let session_id = record
            .session_id
            .ok_or(AuthError::Unauthorized(UnauthorizedReason::SessionInvalid))?;
        let session = bounded(
            self.store_timeout,
            "find_session",
            self.sessions.find_session(session_id),
        )
        .await?
        .filter(|s| s.is_live(now) && s.user_id == record.user_id)
        .ok_or(AuthError::Unauthorized(UnauthorizedReason::SessionInvalid))?;

        let (next, envelope) = self.mint(now)?;
        let successor = TokenRecord {
            id: next.id,
            user_id: record.user_id.clone(),
            session_id: Some(session.id),
            workspace_id: record.workspace_id.clone(),
            token_type: TokenType::Refresh,
            token_hash: envelope,
            scopes: record.scopes.clone(),
            name: None,
            family_id: record.family_id,
            metadata: Map::new(),
            expires_at: (now + self.refresh_ttl).min(session.absolute_expires_at),
            revoked_at: None,
            last_used_at: None,
            created_at: now,
        };

        let rotated = bounded(
            self.store_timeout,
            "rotate_token",
            self.tokens.rotate_token(record.id, &successor, now),
        )
        .await?;
        if !rotated {
            // Lost the race: a concurrent caller already spent this token.
            return Err(self.detect_reuse(&record).await);
        }

        if let Err(e) = bounded(
            self.store_timeout,
            "extend_session",
            self.sessions.extend_session(session.id, now + self.refresh_ttl),
        )
        .await
        {
            warn!(session_id = %session.id, "failed to extend session: {e}");
        }

        self.audit.emit(
            AuditEvent::new(AuditEventKind::TokenRotated)
                .principal(&record.user_id)
                .subject(successor.id)
                .meta("replaced", record.id)
                .meta(
                    "family",
                    record.family_id.map(|f| f.to_string()).unwrap_or_default(),
                ),
        );

        let mut revoked = record;
        revoked.revoked_at = Some(now);
        Ok(Rotation {
            revoked,
            issued: IssuedToken {
                wire: next.to_wire(),
                record: successor,
            },
            session,
        })
    }

    /// Revoke every live member of a family. Returns how many were revoked.
    pub async fn revoke_family(&self, family_id: Uuid, reason: &str) -> Result<u64, AuthError> {
        let revoked = bounded(
            self.store_timeout,
            "revoke_family",
            self.tokens.revoke_family(family_id, Utc::now()),
        )
        .await?;
        info!(%family_id, revoked, reason, "token family revoked");
        self.audit.emit(
            AuditEvent::new(AuditEventKind::FamilyRevoked)
                .subject(family_id)
                .meta("revoked", revoked)
                .meta("reason", reason),
        );
        Ok(revoked)
    }

    /// Revoke a session and every token bound to it.
    ///
    /// Returns false when the session was already revoked or does not exist.
    pub async fn end_session(&self, session_id: Uuid, reason: &str) -> Result<bool, AuthError> {
        let now = Utc::now();
        let ended = bounded(
            self.store_timeout,
            "revoke_session",
            self.sessions.revoke_session(session_id, now),
        )
        .await?;
        let tokens = bounded(
            self.store_timeout,
            "revoke_session_tokens",
            self.tokens.revoke_session_tokens(session_id, now),
        )
        .await?;
        if ended || tokens > 0 {
            self.audit.emit(
                AuditEvent::new(AuditEventKind::SessionRevoked)
                    .subject(session_id)
                    .meta("tokens", tokens)
                    .meta("reason", reason),
            );
        }
        Ok(ended)
    }

    /// Contain a replayed refresh token and build the error to surface.
    async fn detect_reuse(&self, record: &TokenRecord) -> AuthError {
        warn!(
            token_id = %record.id,
            user_id = %record.user_id,
            family_id = ?record.family_id,
            session_id = ?record.session_id,
            "refresh token reuse detected"
        );
        let contained = self.contain_reuse(record).await;

        self.audit.emit(
            AuditEvent::new(AuditEventKind::TokenReuseDetected)
                .principal(&record.user_id)
                .subject(record.id)
                .meta(
                    "family",
                    record.family_id.map(|f| f.to_string()).unwrap_or_default(),
                )
                .meta(
                    "session",
                    record.session_id.map(|s| s.to_string()).unwrap_or_default(),
                )
                .meta("contained", contained.is_ok()),
        );

        match contained {
            Ok(()) => AuthError::Unauthorized(UnauthorizedReason::TokenReuse {
                family_id: record.family_id,
                session_id: record.session_id,
            }),
            // Surface the store failure so the caller retries; a retry lands
            // here again because the token stays revoked.
            Err(e) => e,
        }
    }

    async fn contain_reuse(&self, record: &TokenRecord) -> Result<(), AuthError> {
        if let Some(family_id) = record.family_id {
            self.revoke_family(family_id, "token_reuse").await?;
        }
        if let Some(session_id) = record.session_id {
            self.end_session(session_id, "token_reuse").await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClientType;
    use crate::store::MemoryAuthStore;

    struct Fixture {
        store: Arc<MemoryAuthStore>,
        service: TokenService,
        session: Session,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryAuthStore::new());
        let config = AuthConfig::new("https://issuer.test", "api", "hash-secret");
        let service = TokenService::new(
            &AuthStores::shared(store.clone()),
            Arc::new(SecretHasher::from_config(&config)),
            Arc::new(AuditEventBus::new()),
            &config,
        );
        let now = Utc::now();
        let session = Session {
            id: uuidv7(),
            user_id: "u1".into(),
            client_type: ClientType::Web,
            client_id: None,
            expires_at: now + Duration::days(30),
            absolute_expires_at: now + Duration::days(90),
            revoked_at: None,
            mfa_level: 1,
            created_at: now,
        };
        store.insert_session(&session).await.unwrap();
        Fixture {
            store,
            service,
            session,
        }
    }

    fn request(f: &Fixture) -> IssueRefreshToken {
        IssueRefreshToken {
            user_id: "u1".into(),
            session_id: f.session.id,
            expires_at: Utc::now() + Duration::days(30),
            family_id: None,
            workspace_id: None,
            scopes: vec!["read:profile".into()],
        }
    }

    #[tokio::test]
    async fn issued_tokens_store_only_the_hash() {
        let f = fixture().await;
        let issued = f.service.issue_refresh_token(request(&f)).await.unwrap();
        let token = OpaqueToken::parse(&issued.wire).unwrap();

        let stored = f.store.find_token(token.id).await.unwrap().unwrap();
        assert_ne!(stored.token_hash.hash, token.secret);
        assert!(!format!("{stored:?}").contains(&token.secret));
        assert!(stored.family_id.is_some());
    }

    #[tokio::test]
    async fn past_expiry_is_rejected_before_any_write() {
        let f = fixture().await;
        let writes = f.store.write_count();
        let mut req = request(&f);
        req.expires_at = Utc::now() - Duration::seconds(1);

        let err = f.service.issue_refresh_token(req).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidExpiry(_)));
        assert_eq!(f.store.write_count(), writes);
    }

    #[tokio::test]
    async fn rotation_keeps_family_and_session() {
        let f = fixture().await;
        let first = f.service.issue_refresh_token(request(&f)).await.unwrap();
        let rotation = f.service.rotate(&first.wire).await.unwrap();

        assert_eq!(rotation.revoked.id, first.record.id);
        assert!(rotation.revoked.is_revoked());
        assert_eq!(rotation.issued.record.family_id, first.record.family_id);
        assert_eq!(rotation.issued.record.session_id, Some(f.session.id));
        assert!(rotation.issued.record.expires_at <= f.session.absolute_expires_at);

        let old = f.store.find_token(first.record.id).await.unwrap().unwrap();
        assert_eq!(
            old.metadata["replacedBy"],
            serde_json::Value::String(rotation.issued.record.id.to_string())
        );
    }

    #[tokio::test]
    async fn replay_revokes_family_and_session() {
        let f = fixture().await;
        let first = f.service.issue_refresh_token(request(&f)).await.unwrap();
        let second = f.service.rotate(&first.wire).await.unwrap();

        let err = f.service.rotate(&first.wire).await.unwrap_err();
        assert!(err.is_compromise_signal());

        let family = first.record.family_id.unwrap();
        assert!(f.store.family(family).iter().all(|t| t.is_revoked()));
        let session = f.store.find_session(f.session.id).await.unwrap().unwrap();
        assert!(session.revoked_at.is_some());

        let err = f.service.rotate(&second.issued.wire).await.unwrap_err();
        assert!(err.is_compromise_signal());
    }

    #[tokio::test]
    async fn wrong_secret_does_not_trigger_reuse_handling() {
        let f = fixture().await;
        let first = f.service.issue_refresh_token(request(&f)).await.unwrap();
        f.service.rotate(&first.wire).await.unwrap();

        let forged = format!("{}.{}", first.record.id, crate::ids::generate_secret());
        let err = f.service.rotate(&forged).await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::Unauthorized(UnauthorizedReason::SecretMismatch)
        ));
        let session = f.store.find_session(f.session.id).await.unwrap().unwrap();
        assert!(session.revoked_at.is_none());
    }

    #[tokio::test]
    async fn malformed_and_unknown_tokens() {
        let f = fixture().await;
        assert!(matches!(
            f.service.rotate("garbage").await.unwrap_err(),
            AuthError::InvalidToken(_)
        ));
        let unknown = OpaqueToken::generate().to_wire();
        assert!(matches!(
            f.service.rotate(&unknown).await.unwrap_err(),
            AuthError::Unauthorized(UnauthorizedReason::NotFound)
        ));
    }

    #[tokio::test]
    async fn revoked_session_blocks_rotation() {
        let f = fixture().await;
        let first = f.service.issue_refresh_token(request(&f)).await.unwrap();
        f.store.revoke_session(f.session.id, Utc::now()).await.unwrap();

        let err = f.service.rotate(&first.wire).await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::Unauthorized(UnauthorizedReason::SessionInvalid)
        ));
    }

    #[tokio::test]
    async fn end_session_revokes_bound_tokens() {
        let f = fixture().await;
        let first = f.service.issue_refresh_token(request(&f)).await.unwrap();

        assert!(f.service.end_session(f.session.id, "logout").await.unwrap());
        assert!(!f.service.end_session(f.session.id, "logout").await.unwrap());
        let stored = f.store.find_token(first.record.id).await.unwrap().unwrap();
        assert!(stored.is_revoked());
    }
}
