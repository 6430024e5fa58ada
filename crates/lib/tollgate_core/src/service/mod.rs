//! Authentication façade used by the HTTP layer.
//!
//! Every entry point either completes or fails without partial writes. The
//! exceptions are reuse detection, which revokes a token family and session
//! before reporting the failure, and the rate-limit counters.

pub mod context;
pub mod credential;
pub mod workspace;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditEventBus, AuditEventKind};
use crate::config::AuthConfig;
use crate::error::{AuthError, UnauthorizedReason};
use crate::ids::uuidv7;
use crate::keys::{
    AccessTokenClaims, AccessTokenCodec, AccessTokenSubject, JwkSet, SignedAccessToken,
    SigningKeyStore,
};
use crate::models::{
    ClientType, PrincipalKind, Session, TokenRecord, TokenSummary, TokenType, User,
    merge_metadata,
};
use crate::oauth::OAuthClientRegistry;
use crate::oauth::pkce::{self, AuthorizationCodeStore, AuthorizationGrant};
use crate::rate_limit::{RateLimitBackend, RateLimitDecision, RateLimiter};
use crate::scopes::{ALL_SCOPES, normalize_requested};
use crate::store::{AuthStores, bounded};
use crate::tokens::{IssueRefreshToken, IssuedToken, OpaqueToken, SecretHasher, TokenService};

pub use context::{
    AuthContext, ContextPropagator, CredentialKind, SpanContextPropagator, VerifyRequest,
    WorkspaceSource,
};
pub use credential::Credential;
pub use workspace::ResolvedWorkspace;

/// Longest personal access token name accepted.
pub const MAX_TOKEN_NAME_LEN: usize = 100;

/// Input for [`AuthCoreService::issue_personal_access_token`].
#[derive(Debug, Clone)]
pub struct IssuePersonalAccessToken {
    pub user_id: String,
    pub workspace_id: Option<String>,
    pub scopes: Vec<String>,
    pub name: String,
    pub expires_at: DateTime<Utc>,
}

/// Input for [`AuthCoreService::revoke_token`].
#[derive(Debug, Clone, Default)]
pub struct RevokeToken {
    pub token_id: Uuid,
    pub reason: Option<String>,
    pub revoked_by: Option<String>,
    /// When set, only this user's tokens may be revoked.
    pub owner: Option<String>,
}

/// Input for [`AuthCoreService::start_session`].
#[derive(Debug, Clone)]
pub struct StartSession {
    pub user_id: String,
    pub client_type: ClientType,
    pub client_id: Option<String>,
    pub mfa_level: i16,
    /// Requested scopes. Empty means every known scope; the role in the
    /// active workspace narrows them at verification time.
    pub scopes: Vec<String>,
    pub workspace_id: Option<String>,
}

/// Tokens handed out when a session starts or refreshes.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub session_id: Uuid,
    pub access: SignedAccessToken,
    pub refresh: IssuedToken,
}

/// Input for [`AuthCoreService::issue_service_token`].
#[derive(Debug, Clone)]
pub struct IssueServiceToken {
    pub service_id: String,
    pub allowed_workspaces: Vec<String>,
    pub scopes: Vec<String>,
    /// Defaults to the access token TTL.
    pub ttl: Option<Duration>,
}

/// The authorize step of the OAuth code flow, after the user consented.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub user_id: String,
    pub scopes: Vec<String>,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

/// The token step of the OAuth code flow.
#[derive(Debug, Clone)]
pub struct CodeExchange {
    pub code: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub code_verifier: String,
}

pub struct AuthCoreService {
    config: AuthConfig,
    stores: AuthStores,
    codec: AccessTokenCodec,
    tokens: TokenService,
    clients: OAuthClientRegistry,
    codes: Arc<AuthorizationCodeStore>,
    limiter: RateLimiter,
    audit: Arc<AuditEventBus>,
    propagator: Arc<dyn ContextPropagator>,
}

impl AuthCoreService {
    pub fn new(
        config: AuthConfig,
        stores: AuthStores,
        keys: Arc<SigningKeyStore>,
        rate_limits: Arc<dyn RateLimitBackend>,
        audit: Arc<AuditEventBus>,
    ) -> Self {
        let codec = AccessTokenCodec::new(
            keys,
            config.issuer.clone(),
            config.audience.clone(),
            config.leeway_secs,
        );
        let hasher = Arc::new(SecretHasher::from_config(&config));
        let tokens = TokenService::new(&stores, hasher, audit.clone(), &config);
        let clients = OAuthClientRegistry::new(stores.clients.clone(), config.store_timeout);
        let codes = Arc::new(AuthorizationCodeStore::new(config.authorization_code_ttl));
        let limiter = RateLimiter::new(
            rate_limits,
            config.rate_limits.clone(),
            config.store_timeout,
        );
        Self {
            config,
            stores,
            codec,
            tokens,
            clients,
            codes,
            limiter,
            audit,
            propagator: Arc::new(SpanContextPropagator),
        }
    }

    /// Replace the hook run after every successful verification.
    pub fn with_propagator(mut self, propagator: Arc<dyn ContextPropagator>) -> Self {
        self.propagator = propagator;
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn audit(&self) -> &Arc<AuditEventBus> {
        &self.audit
    }

    pub fn codec(&self) -> &AccessTokenCodec {
        &self.codec
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn authorization_codes(&self) -> &Arc<AuthorizationCodeStore> {
        &self.codes
    }

    // =========================================================================
    // Request verification
    // =========================================================================

    /// Authenticate a request and resolve its workspace and scopes.
    ///
    /// Every failure counts against the caller IP's failed-auth budget.
    pub async fn verify_request(&self, request: VerifyRequest) -> Result<AuthContext, AuthError> {
        let ip = request.ip.as_deref().unwrap_or("unknown");
        if let Err(e) = self.limiter.ensure_failed_auth_budget(ip).await {
            return Err(self.note_rate_limited(e));
        }

        match self.authenticate(&request).await {
            Ok(ctx) => {
                self.propagator.propagate(&ctx);
                Ok(ctx)
            }
            Err(e) => {
                debug!(reason = e.kind(), ip, "request authentication failed: {e}");
                if let Err(count_err) = self.limiter.record_failed_auth(ip).await {
                    warn!(ip, "failed to count failed authentication: {count_err}");
                }
                self.audit.emit(
                    AuditEvent::new(AuditEventKind::AuthFailed)
                        .meta("reason", e.kind())
                        .meta("ip", ip)
                        .meta("userAgent", request.user_agent.as_deref().unwrap_or("")),
                );
                Err(e)
            }
        }
    }

    async fn authenticate(&self, request: &VerifyRequest) -> Result<AuthContext, AuthError> {
        match Credential::classify(request.authorization.as_deref())? {
            Credential::Signed(token) => {
                let claims = self.codec.verify(&token)?;
                match claims.kind {
                    PrincipalKind::User => self.authenticate_user_token(claims, request).await,
                    PrincipalKind::Service => authenticate_service_token(claims, request),
                }
            }
            Credential::Opaque(token) => self.authenticate_personal_token(token, request).await,
        }
    }

    async fn authenticate_user_token(
        &self,
        claims: AccessTokenClaims,
        request: &VerifyRequest,
    ) -> Result<AuthContext, AuthError> {
        self.require_active_user(&claims.sub).await?;

        let now = Utc::now();
        let session_id = claims
            .sid
            .ok_or(AuthError::Unauthorized(UnauthorizedReason::SessionInvalid))?;
        let session = bounded(
            self.config.store_timeout,
            "find_session",
            self.stores.sessions.find_session(session_id),
        )
        .await?
        .filter(|s| s.is_live(now) && s.user_id == claims.sub)
        .ok_or(AuthError::Unauthorized(UnauthorizedReason::SessionInvalid))?;

        let hint = workspace::pick_hint(
            request.workspace_path.as_deref(),
            request.workspace_header.as_deref(),
            claims.wid.as_deref(),
        );
        let resolved = self.resolve_user_workspace(&claims.sub, hint).await?;
        let scopes = workspace::effective_user_scopes(&claims.scopes, resolved.as_ref());

        Ok(AuthContext {
            principal_id: claims.sub,
            principal_kind: PrincipalKind::User,
            credential: CredentialKind::AccessToken,
            session_id: Some(session.id),
            token_id: None,
            workspace_id: resolved.as_ref().map(|r| r.workspace_id.clone()),
            workspace_source: resolved.as_ref().map(|r| r.source),
            role: resolved.as_ref().and_then(|r| r.role),
            scopes,
            client_id: claims.client_id,
            client_type: claims.client_type,
        })
    }

    async fn authenticate_personal_token(
        &self,
        token: OpaqueToken,
        request: &VerifyRequest,
    ) -> Result<AuthContext, AuthError> {
        let now = Utc::now();
        let record = bounded(
            self.config.store_timeout,
            "find_token",
            self.stores.tokens.find_token(token.id),
        )
        .await?
        .ok_or(AuthError::Unauthorized(UnauthorizedReason::NotFound))?;

        if record.token_type != TokenType::PersonalAccess {
            return Err(AuthError::Unauthorized(UnauthorizedReason::WrongTokenType));
        }
        if !self.tokens.hasher().verify(&token.secret, &record.token_hash) {
            return Err(AuthError::Unauthorized(UnauthorizedReason::SecretMismatch));
        }
        if record.is_revoked() {
            return Err(AuthError::Unauthorized(UnauthorizedReason::Revoked));
        }
        if record.is_expired(now) {
            return Err(AuthError::Unauthorized(UnauthorizedReason::Expired));
        }
        self.require_active_user(&record.user_id).await?;

        let hint = workspace::pick_hint(
            request.workspace_path.as_deref(),
            request.workspace_header.as_deref(),
            record.workspace_id.as_deref(),
        );
        let resolved = self.resolve_user_workspace(&record.user_id, hint).await?;
        if let (Some(bound), Some(resolved)) = (&record.workspace_id, &resolved) {
            // A workspace-bound token only works in that workspace.
            if *bound != resolved.workspace_id {
                return Err(AuthError::Authorization(format!(
                    "token is bound to workspace {bound}"
                )));
            }
        }
        let scopes = workspace::effective_user_scopes(&record.scopes, resolved.as_ref());

        if let Err(e) = bounded(
            self.config.store_timeout,
            "touch_token",
            self.stores.tokens.touch_token(record.id, now),
        )
        .await
        {
            debug!(token_id = %record.id, "failed to record token use: {e}");
        }

        Ok(AuthContext {
            principal_id: record.user_id,
            principal_kind: PrincipalKind::User,
            credential: CredentialKind::PersonalAccessToken,
            session_id: None,
            token_id: Some(record.id),
            workspace_id: resolved.as_ref().map(|r| r.workspace_id.clone()),
            workspace_source: resolved.as_ref().map(|r| r.source),
            role: resolved.as_ref().and_then(|r| r.role),
            scopes,
            client_id: None,
            client_type: None,
        })
    }

    async fn resolve_user_workspace(
        &self,
        user_id: &str,
        hint: Option<(&str, WorkspaceSource)>,
    ) -> Result<Option<ResolvedWorkspace>, AuthError> {
        let memberships = bounded(
            self.config.store_timeout,
            "list_memberships",
            self.stores.directory.list_memberships(user_id),
        )
        .await?;
        workspace::resolve_for_user(&memberships, hint)
    }

    async fn require_active_user(&self, user_id: &str) -> Result<User, AuthError> {
        let user = bounded(
            self.config.store_timeout,
            "find_user",
            self.stores.directory.find_user(user_id),
        )
        .await?
        .ok_or(AuthError::Unauthorized(UnauthorizedReason::UnknownPrincipal))?;
        if !user.is_active() {
            return Err(AuthError::InactiveUser);
        }
        Ok(user)
    }

    async fn require_membership(&self, user_id: &str, workspace_id: &str) -> Result<(), AuthError> {
        let hint = Some((workspace_id, WorkspaceSource::Header));
        self.resolve_user_workspace(user_id, hint).await.map(|_| ())
    }

    // =========================================================================
    // Personal access tokens
    // =========================================================================

    pub async fn issue_personal_access_token(
        &self,
        request: IssuePersonalAccessToken,
    ) -> Result<IssuedToken, AuthError> {
        let now = Utc::now();
        if request.expires_at <= now {
            return Err(AuthError::InvalidExpiry("expiry must be in the future".into()));
        }
        if request.expires_at > now + self.config.max_token_lifetime {
            return Err(AuthError::InvalidExpiry(format!(
                "expiry may be at most {} days away",
                self.config.max_token_lifetime.num_days()
            )));
        }
        let name = request.name.trim();
        if name.is_empty() || name.chars().count() > MAX_TOKEN_NAME_LEN {
            return Err(AuthError::Validation(format!(
                "name must be 1 to {MAX_TOKEN_NAME_LEN} characters"
            )));
        }
        let scopes = normalize_requested(&request.scopes).map_err(AuthError::Validation)?;
        let workspace_id = request
            .workspace_id
            .as_deref()
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .map(str::to_string);

        self.limiter
            .check_token_creation(&request.user_id)
            .await
            .map_err(|e| self.note_rate_limited(e))?;
        self.require_active_user(&request.user_id).await?;
        if let Some(workspace_id) = &workspace_id {
            self.require_membership(&request.user_id, workspace_id).await?;
        }

        let (token, envelope) = self.tokens.mint(now)?;
        let record = TokenRecord {
            id: token.id,
            user_id: request.user_id,
            session_id: None,
            workspace_id,
            token_type: TokenType::PersonalAccess,
            token_hash: envelope,
            scopes,
            name: Some(name.to_string()),
            family_id: None,
            metadata: Map::new(),
            expires_at: request.expires_at,
            revoked_at: None,
            last_used_at: None,
            created_at: now,
        };
        bounded(
            self.config.store_timeout,
            "insert_token",
            self.stores.tokens.insert_token(&record),
        )
        .await?;

        self.audit.emit(
            AuditEvent::new(AuditEventKind::TokenIssued)
                .principal(&record.user_id)
                .subject(record.id)
                .meta("type", TokenType::PersonalAccess.as_str()),
        );
        Ok(IssuedToken {
            wire: token.to_wire(),
            record,
        })
    }

    /// Revoke a token. Returns whether this call performed the revocation;
    /// revoking an already revoked token is a no-op.
    pub async fn revoke_token(&self, request: RevokeToken) -> Result<bool, AuthError> {
        let record = bounded(
            self.config.store_timeout,
            "find_token",
            self.stores.tokens.find_token(request.token_id),
        )
        .await?
        .ok_or_else(|| AuthError::NotFound(format!("token {}", request.token_id)))?;

        if let Some(owner) = &request.owner
            && record.user_id != *owner
        {
            return Err(AuthError::Authorization("token belongs to another user".into()));
        }
        if record.is_revoked() {
            return Ok(false);
        }

        let now = Utc::now();
        let mut incoming = Map::new();
        incoming.insert("revokedAt".into(), Value::String(now.to_rfc3339()));
        if let Some(reason) = request.reason {
            incoming.insert("revokedReason".into(), Value::String(reason));
        }
        if let Some(by) = request.revoked_by {
            incoming.insert("revokedBy".into(), Value::String(by));
        }
        let metadata = merge_metadata(&record.metadata, incoming);

        let revoked = bounded(
            self.config.store_timeout,
            "revoke_token",
            self.stores.tokens.revoke_token(record.id, &metadata, now),
        )
        .await?;
        if revoked {
            self.audit.emit(
                AuditEvent::new(AuditEventKind::TokenRevoked)
                    .principal(&record.user_id)
                    .subject(record.id)
                    .meta("type", record.token_type.as_str()),
            );
        }
        Ok(revoked)
    }

    /// A user's personal access tokens, newest first, without hash material.
    pub async fn list_personal_access_tokens(
        &self,
        user_id: &str,
    ) -> Result<Vec<TokenSummary>, AuthError> {
        let records = bounded(
            self.config.store_timeout,
            "list_tokens",
            self.stores
                .tokens
                .list_tokens(user_id, TokenType::PersonalAccess),
        )
        .await?;
        Ok(records.iter().map(TokenRecord::summary).collect())
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Open a session for an authenticated user and hand out its first
    /// access and refresh tokens.
    pub async fn start_session(&self, request: StartSession) -> Result<SessionTokens, AuthError> {
        let scopes = if request.scopes.is_empty() {
            ALL_SCOPES.iter().map(|s| s.to_string()).collect()
        } else {
            normalize_requested(&request.scopes).map_err(AuthError::Validation)?
        };
        self.require_active_user(&request.user_id).await?;
        if let Some(workspace_id) = &request.workspace_id {
            self.require_membership(&request.user_id, workspace_id).await?;
        }

        let now = Utc::now();
        let absolute_expires_at = now + self.config.session_absolute_ttl;
        let expires_at = (now + self.config.refresh_token_ttl).min(absolute_expires_at);
        let session = Session {
            id: uuidv7(),
            user_id: request.user_id.clone(),
            client_type: request.client_type,
            client_id: request.client_id.clone(),
            expires_at,
            absolute_expires_at,
            revoked_at: None,
            mfa_level: request.mfa_level,
            created_at: now,
        };
        // Sign before writing so a signing failure leaves nothing behind.
        let access =
            self.sign_session_access(&session, scopes.clone(), request.workspace_id.clone())?;
        let refresh = self
            .tokens
            .open_session(
                &session,
                IssueRefreshToken {
                    user_id: request.user_id.clone(),
                    session_id: session.id,
                    expires_at,
                    family_id: None,
                    workspace_id: request.workspace_id,
                    scopes,
                },
            )
            .await?;

        self.audit.emit(
            AuditEvent::new(AuditEventKind::SessionStarted)
                .principal(&request.user_id)
                .subject(session.id)
                .meta("clientType", session.client_type.as_str()),
        );
        Ok(SessionTokens {
            session_id: session.id,
            access,
            refresh,
        })
    }

    /// Exchange a refresh token for a new refresh token and access token.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<SessionTokens, AuthError> {
        let (_, record) = self.tokens.lookup(refresh_token).await?;
        if record.token_type == TokenType::Refresh && !record.is_revoked() {
            self.require_active_user(&record.user_id).await?;
        }

        let rotation = self.tokens.rotate(refresh_token).await?;
        let successor = &rotation.issued.record;
        let access = self.sign_session_access(
            &rotation.session,
            successor.scopes.clone(),
            successor.workspace_id.clone(),
        )?;
        Ok(SessionTokens {
            session_id: rotation.session.id,
            access,
            refresh: rotation.issued,
        })
    }

    /// End a session. When `user_id` is given the session must be theirs.
    pub async fn logout(&self, session_id: Uuid, user_id: Option<&str>) -> Result<bool, AuthError> {
        if let Some(user_id) = user_id {
            let session = bounded(
                self.config.store_timeout,
                "find_session",
                self.stores.sessions.find_session(session_id),
            )
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("session {session_id}")))?;
            if session.user_id != user_id {
                return Err(AuthError::Authorization("session belongs to another user".into()));
            }
        }
        self.tokens.end_session(session_id, "logout").await
    }

    fn sign_session_access(
        &self,
        session: &Session,
        scopes: Vec<String>,
        workspace_id: Option<String>,
    ) -> Result<SignedAccessToken, AuthError> {
        let mut subject = AccessTokenSubject::user(&session.user_id, session.id, scopes);
        subject.workspace_id = workspace_id;
        subject.client_id = session.client_id.clone();
        subject.client_type = Some(session.client_type);
        self.codec.sign(subject, self.config.access_token_ttl)
    }

    // =========================================================================
    // Service principals
    // =========================================================================

    /// Sign an access token for a backend service, pre-scoped to a fixed set
    /// of workspaces. Verification trusts these claims without lookups.
    pub fn issue_service_token(
        &self,
        request: IssueServiceToken,
    ) -> Result<SignedAccessToken, AuthError> {
        let service_id = request.service_id.trim();
        if service_id.is_empty() {
            return Err(AuthError::Validation("service id is required".into()));
        }
        let mut allowed: Vec<String> = Vec::new();
        for w in request.allowed_workspaces.iter().map(|w| w.trim()) {
            if !w.is_empty() && !allowed.iter().any(|a| a == w) {
                allowed.push(w.to_string());
            }
        }
        if allowed.is_empty() {
            return Err(AuthError::Validation(
                "at least one allowed workspace is required".into(),
            ));
        }
        let scopes = normalize_requested(&request.scopes).map_err(AuthError::Validation)?;
        let ttl = request.ttl.unwrap_or(self.config.access_token_ttl);
        if ttl <= Duration::zero() || ttl > self.config.max_token_lifetime {
            return Err(AuthError::InvalidExpiry(
                "service token lifetime out of range".into(),
            ));
        }

        let signed = self
            .codec
            .sign(AccessTokenSubject::service(service_id, allowed, scopes), ttl)?;
        self.audit.emit(
            AuditEvent::new(AuditEventKind::TokenIssued)
                .principal(service_id)
                .subject(signed.claims.jti)
                .meta("type", "service"),
        );
        Ok(signed)
    }

    // =========================================================================
    // OAuth authorization code + PKCE
    // =========================================================================

    /// Record a consented authorization request and return its code.
    pub async fn create_authorization_code(
        &self,
        request: AuthorizationRequest,
    ) -> Result<String, AuthError> {
        if request.code_challenge_method != pkce::S256 {
            return Err(AuthError::Validation(
                "code_challenge_method must be S256".into(),
            ));
        }
        let challenge = request.code_challenge.trim();
        if challenge.len() != 43 || !crate::ids::is_urlsafe(challenge) {
            return Err(AuthError::Validation("malformed code_challenge".into()));
        }
        let scopes = normalize_requested(&request.scopes).map_err(AuthError::Validation)?;
        let client = self
            .clients
            .require_oauth_client(&request.client_id, &request.redirect_uri)
            .await?;
        self.require_active_user(&request.user_id).await?;

        Ok(self.codes.insert(AuthorizationGrant {
            client_id: client.client_id,
            redirect_uri: request.redirect_uri.trim().to_string(),
            user_id: request.user_id,
            scopes,
            code_challenge: challenge.to_string(),
            created_at: std::time::Instant::now(),
        }))
    }

    /// Redeem an authorization code. The code is consumed even when the
    /// exchange fails.
    pub async fn exchange_authorization_code(
        &self,
        request: CodeExchange,
    ) -> Result<SessionTokens, AuthError> {
        let grant = self.codes.take(request.code.trim()).ok_or_else(|| {
            AuthError::InvalidToken("authorization code invalid or expired".into())
        })?;
        let client = self
            .clients
            .require_oauth_client(&request.client_id, &request.redirect_uri)
            .await?;
        if grant.client_id != client.client_id {
            return Err(AuthError::Authorization(
                "authorization code was issued to another client".into(),
            ));
        }
        if grant.redirect_uri != request.redirect_uri.trim() {
            return Err(AuthError::Authorization("redirect_uri mismatch".into()));
        }
        if !pkce::verify_code_verifier(&request.code_verifier, &grant.code_challenge) {
            return Err(AuthError::Authorization("PKCE verification failed".into()));
        }

        let client_type = if client.is_first_party {
            ClientType::Cli
        } else {
            ClientType::ThirdParty
        };
        self.start_session(StartSession {
            user_id: grant.user_id,
            client_type,
            client_id: Some(client.client_id),
            mfa_level: 1,
            scopes: grant.scopes,
            workspace_id: None,
        })
        .await
    }

    // =========================================================================
    // Keys and budgets
    // =========================================================================

    /// Public key set for external verifiers.
    pub fn jwks(&self) -> JwkSet {
        self.codec.keys().jwks()
    }

    /// Switch to a fresh signing key and drop retired keys whose tokens can
    /// no longer verify. Returns the new key id.
    pub fn rotate_signing_key(&self) -> Result<String, AuthError> {
        let keys = self.codec.keys();
        let kid = keys.rotate()?;
        let pruned = keys.prune_retired(Utc::now(), self.config.leeway_secs);
        info!(%kid, pruned = pruned.len(), "signing key rotated");
        self.audit.emit(
            AuditEvent::new(AuditEventKind::SigningKeyRotated)
                .subject(&kid)
                .meta("pruned", pruned.join(",")),
        );
        Ok(kid)
    }

    /// Count a magic-link request against the mailbox's budget.
    pub async fn check_magic_link(&self, email: &str) -> Result<RateLimitDecision, AuthError> {
        self.limiter
            .check_magic_link(email)
            .await
            .map_err(|e| self.note_rate_limited(e))
    }

    fn note_rate_limited(&self, e: AuthError) -> AuthError {
        if let AuthError::RateLimited { key, limit, .. } = &e {
            self.audit.emit(
                AuditEvent::new(AuditEventKind::RateLimited)
                    .subject(key)
                    .meta("limit", limit),
            );
        }
        e
    }
}

fn authenticate_service_token(
    claims: AccessTokenClaims,
    request: &VerifyRequest,
) -> Result<AuthContext, AuthError> {
    let hint = workspace::pick_hint(
        request.workspace_path.as_deref(),
        request.workspace_header.as_deref(),
        claims.wid.as_deref(),
    );
    let resolved = workspace::resolve_for_service(&claims.allowed_workspaces, hint)?;
    Ok(AuthContext {
        principal_id: claims.sub,
        principal_kind: PrincipalKind::Service,
        credential: CredentialKind::AccessToken,
        session_id: None,
        token_id: None,
        workspace_id: resolved.as_ref().map(|r| r.workspace_id.clone()),
        workspace_source: resolved.as_ref().map(|r| r.source),
        role: None,
        scopes: claims.scopes,
        client_id: claims.client_id,
        client_type: claims.client_type,
    })
}
