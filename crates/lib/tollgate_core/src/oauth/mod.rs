//! OAuth client identity and redirect URI checks.
//!
//! Redirect URIs are compared after trimming surrounding whitespace and
//! nothing else: no case folding, no trailing-slash or default-port rules.

pub mod pkce;

use std::sync::Arc;

use tracing::debug;

use crate::error::AuthError;
use crate::models::OAuthClientRecord;
use crate::store::{OAuthClientStore, bounded};

pub use pkce::{AuthorizationCodeStore, AuthorizationGrant};

pub struct OAuthClientRegistry {
    clients: Arc<dyn OAuthClientStore>,
    timeout: std::time::Duration,
}

impl OAuthClientRegistry {
    pub fn new(clients: Arc<dyn OAuthClientStore>, timeout: std::time::Duration) -> Self {
        Self { clients, timeout }
    }

    /// Load an enabled client and check `redirect_uri` against its list.
    pub async fn require_oauth_client(
        &self,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<OAuthClientRecord, AuthError> {
        let client = bounded(
            self.timeout,
            "find_client",
            self.clients.find_client(client_id.trim()),
        )
        .await?
        .ok_or_else(|| AuthError::Authorization(format!("unknown OAuth client: {client_id}")))?;
        if !client.is_enabled() {
            debug!(client_id, "OAuth client disabled");
            return Err(AuthError::Authorization(format!(
                "OAuth client disabled: {client_id}"
            )));
        }
        validate_redirect_uri(&client, redirect_uri)?;
        Ok(client)
    }
}

/// Exact match against the registered redirect URIs, whitespace-trimmed.
pub fn validate_redirect_uri(client: &OAuthClientRecord, redirect_uri: &str) -> Result<(), AuthError> {
    let wanted = redirect_uri.trim();
    if wanted.is_empty() {
        return Err(AuthError::Authorization("redirect_uri is required".into()));
    }
    if client.redirect_uris.iter().any(|uri| uri.trim() == wanted) {
        Ok(())
    } else {
        debug!(client_id = %client.client_id, redirect_uri = wanted, "redirect_uri not registered");
        Err(AuthError::Authorization(format!(
            "redirect_uri not registered for client {}",
            client.client_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::models::{OAuthClientType, TokenEndpointAuthMethod};
    use crate::store::MemoryAuthStore;

    fn client(id: &str) -> OAuthClientRecord {
        OAuthClientRecord {
            client_id: id.into(),
            name: "CLI".into(),
            client_type: OAuthClientType::Public,
            redirect_uris: vec!["http://127.0.0.1:8787/callback".into()],
            token_endpoint_auth_method: TokenEndpointAuthMethod::None,
            is_first_party: true,
            disabled_at: None,
        }
    }

    fn registry(store: Arc<MemoryAuthStore>) -> OAuthClientRegistry {
        OAuthClientRegistry::new(store, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn registered_uri_passes_after_trimming() {
        let store = Arc::new(MemoryAuthStore::new());
        store.add_client(client("cli"));
        let found = registry(store)
            .require_oauth_client("cli", "  http://127.0.0.1:8787/callback\n")
            .await
            .unwrap();
        assert_eq!(found.client_id, "cli");
    }

    #[tokio::test]
    async fn no_normalization_beyond_whitespace() {
        let store = Arc::new(MemoryAuthStore::new());
        store.add_client(client("cli"));
        let registry = registry(store);
        for uri in [
            "http://127.0.0.1:8787/callback/",
            "HTTP://127.0.0.1:8787/callback",
            "http://localhost:8787/callback",
            "",
            "   ",
        ] {
            let err = registry.require_oauth_client("cli", uri).await.unwrap_err();
            assert!(matches!(err, AuthError::Authorization(_)), "{uri:?}");
        }
    }

    #[tokio::test]
    async fn unknown_and_disabled_clients_are_refused() {
        let store = Arc::new(MemoryAuthStore::new());
        let mut disabled = client("old");
        disabled.disabled_at = Some(Utc::now());
        store.add_client(disabled);
        let registry = registry(store);

        let uri = "http://127.0.0.1:8787/callback";
        assert!(matches!(
            registry.require_oauth_client("nope", uri).await.unwrap_err(),
            AuthError::Authorization(_)
        ));
        assert!(matches!(
            registry.require_oauth_client("old", uri).await.unwrap_err(),
            AuthError::Authorization(_)
        ));
    }
}
