#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tollgate_core::AuthCoreService;
use tollgate_core::audit::{AuditEventBus, AuditRecord, ChannelAuditHandler};
use tollgate_core::config::AuthConfig;
use tollgate_core::keys::SigningKeyStore;
use tollgate_core::models::{
    ClientType, OAuthClientRecord, OAuthClientType, TokenEndpointAuthMethod, User,
    WorkspaceMembership,
};
use tollgate_core::rate_limit::MemoryRateLimitBackend;
use tollgate_core::scopes::WorkspaceRole;
use tollgate_core::service::{AuthContext, ContextPropagator, SessionTokens, StartSession};
use tollgate_core::store::{AuthStores, MemoryAuthStore};
use tokio::sync::mpsc::UnboundedReceiver;

pub const CLI_REDIRECT: &str = "http://127.0.0.1:8787/callback";

pub struct Harness {
    pub store: Arc<MemoryAuthStore>,
    pub service: AuthCoreService,
    pub events: UnboundedReceiver<AuditRecord>,
    pub propagated: Arc<RecordingPropagator>,
}

/// Counts hook invocations.
#[derive(Default)]
pub struct RecordingPropagator {
    pub seen: Mutex<Vec<String>>,
}

impl ContextPropagator for RecordingPropagator {
    fn propagate(&self, ctx: &AuthContext) {
        self.seen.lock().unwrap().push(ctx.principal_id.clone());
    }
}

pub fn config() -> AuthConfig {
    AuthConfig::new("https://auth.test", "tollgate-test", "test-hash-secret")
}

pub fn harness() -> Harness {
    harness_with(config())
}

/// Users: `u1` (viewer of `w1` since 10 days, owner of `w2` since 1 day),
/// `u2` (no memberships), `u3` (disabled). One first-party public client `cli`.
pub fn harness_with(config: AuthConfig) -> Harness {
    let store = Arc::new(MemoryAuthStore::new());
    let now = Utc::now();
    for (id, disabled) in [("u1", false), ("u2", false), ("u3", true)] {
        store.add_user(User {
            id: id.into(),
            email: format!("{id}@example.com"),
            name: None,
            disabled_at: disabled.then_some(now),
        });
    }
    store.add_membership(WorkspaceMembership {
        workspace_id: "w1".into(),
        profile_id: "u1".into(),
        role: WorkspaceRole::Viewer,
        created_at: now - Duration::days(10),
    });
    store.add_membership(WorkspaceMembership {
        workspace_id: "w2".into(),
        profile_id: "u1".into(),
        role: WorkspaceRole::Owner,
        created_at: now - Duration::days(1),
    });
    store.add_client(OAuthClientRecord {
        client_id: "cli".into(),
        name: "Tollgate CLI".into(),
        client_type: OAuthClientType::Public,
        redirect_uris: vec![CLI_REDIRECT.into()],
        token_endpoint_auth_method: TokenEndpointAuthMethod::None,
        is_first_party: true,
        disabled_at: None,
    });

    let audit = Arc::new(AuditEventBus::new());
    let (handler, events) = ChannelAuditHandler::new();
    audit.subscribe(Arc::new(handler));

    let keys = Arc::new(SigningKeyStore::from_seed_or_generate(None).expect("signing key"));
    let propagated = Arc::new(RecordingPropagator::default());
    let service = AuthCoreService::new(
        config,
        AuthStores::shared(store.clone()),
        keys,
        Arc::new(MemoryRateLimitBackend::new()),
        audit,
    )
    .with_propagator(propagated.clone());

    Harness {
        store,
        service,
        events,
        propagated,
    }
}

pub fn scopes(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

pub async fn login(h: &Harness, user_id: &str) -> SessionTokens {
    h.service
        .start_session(StartSession {
            user_id: user_id.into(),
            client_type: ClientType::Web,
            client_id: None,
            mfa_level: 1,
            scopes: Vec::new(),
            workspace_id: None,
        })
        .await
        .expect("start session")
}

pub fn drain(events: &mut UnboundedReceiver<AuditRecord>) -> Vec<AuditRecord> {
    let mut out = Vec::new();
    while let Ok(record) = events.try_recv() {
        out.push(record);
    }
    out
}
