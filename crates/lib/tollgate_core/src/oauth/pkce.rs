//! Authorization codes and PKCE (RFC 7636) for the OAuth code flow.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::ids::random_urlsafe;

/// The only challenge method accepted.
pub const S256: &str = "S256";

const VERIFIER_MIN_LEN: usize = 43;
const VERIFIER_MAX_LEN: usize = 128;

// =============================================================================
// PKCE helpers
// =============================================================================

/// Generate a code verifier (43 chars, URL-safe).
pub fn generate_code_verifier() -> String {
    random_urlsafe(32)
}

/// Compute the S256 code challenge of a verifier.
pub fn compute_code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Verifier charset and length per RFC 7636 §4.1.
pub fn is_valid_verifier(verifier: &str) -> bool {
    (VERIFIER_MIN_LEN..=VERIFIER_MAX_LEN).contains(&verifier.len())
        && verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
}

/// Check a presented verifier against the stored S256 challenge.
pub fn verify_code_verifier(verifier: &str, challenge: &str) -> bool {
    if !is_valid_verifier(verifier) {
        return false;
    }
    let computed = compute_code_challenge(verifier);
    computed.as_bytes().ct_eq(challenge.as_bytes()).unwrap_u8() == 1
}

// =============================================================================
// Authorization code store
// =============================================================================

/// What the user approved at the authorize step.
#[derive(Debug, Clone)]
pub struct AuthorizationGrant {
    pub client_id: String,
    pub redirect_uri: String,
    pub user_id: String,
    pub scopes: Vec<String>,
    pub code_challenge: String,
    pub created_at: Instant,
}

/// Single-use authorization codes, held in memory until exchanged or expired.
pub struct AuthorizationCodeStore {
    codes: DashMap<String, AuthorizationGrant>,
    ttl: Duration,
}

impl AuthorizationCodeStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            codes: DashMap::new(),
            ttl,
        }
    }

    /// Store a grant under a fresh code and return the code.
    pub fn insert(&self, grant: AuthorizationGrant) -> String {
        let code = random_urlsafe(32);
        self.codes.insert(code.clone(), grant);
        code
    }

    /// Remove and return a grant. A code can be taken once; expired codes
    /// are removed and yield `None`.
    pub fn take(&self, code: &str) -> Option<AuthorizationGrant> {
        let (_, grant) = self.codes.remove(code)?;
        if grant.created_at.elapsed() > self.ttl {
            return None;
        }
        Some(grant)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Evict expired entries.
    pub fn cleanup(&self) {
        let ttl = self.ttl;
        self.codes.retain(|_, g| g.created_at.elapsed() <= ttl);
    }

    /// Spawn a periodic cleanup task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                store.cleanup();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(created_at: Instant) -> AuthorizationGrant {
        AuthorizationGrant {
            client_id: "cli".into(),
            redirect_uri: "http://localhost/callback".into(),
            user_id: "u1".into(),
            scopes: vec!["read:profile".into()],
            code_challenge: compute_code_challenge("v"),
            created_at,
        }
    }

    #[test]
    fn code_challenge_matches_rfc_vector() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            compute_code_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
        assert!(verify_code_verifier(
            verifier,
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        ));
    }

    #[test]
    fn verifier_shape_is_enforced() {
        let short = "a".repeat(42);
        assert!(!verify_code_verifier(&short, &compute_code_challenge(&short)));
        let long = "a".repeat(129);
        assert!(!verify_code_verifier(&long, &compute_code_challenge(&long)));
        let spaced = format!("{} ", "a".repeat(43));
        assert!(!is_valid_verifier(&spaced));

        let generated = generate_code_verifier();
        assert!(verify_code_verifier(&generated, &compute_code_challenge(&generated)));
    }

    #[test]
    fn wrong_verifier_fails() {
        let challenge = compute_code_challenge(&generate_code_verifier());
        assert!(!verify_code_verifier(&generate_code_verifier(), &challenge));
    }

    #[test]
    fn challenge_prefix_does_not_match() {
        let verifier = generate_code_verifier();
        let challenge = compute_code_challenge(&verifier);
        assert!(!verify_code_verifier(&verifier, &challenge[..challenge.len() - 1]));
        assert!(!verify_code_verifier(&verifier, ""));
    }

    #[test]
    fn codes_are_single_use() {
        let store = AuthorizationCodeStore::new(Duration::from_secs(600));
        let code = store.insert(grant(Instant::now()));
        assert_eq!(store.take(&code).unwrap().user_id, "u1");
        assert!(store.take(&code).is_none());
    }

    #[test]
    fn expired_codes_are_dropped() {
        let store = AuthorizationCodeStore::new(Duration::from_secs(600));
        let stale = store.insert(grant(Instant::now() - Duration::from_secs(700)));
        let fresh = store.insert(grant(Instant::now()));

        store.cleanup();
        assert_eq!(store.len(), 1);
        assert!(store.take(&stale).is_none());
        assert!(store.take(&fresh).is_some());
    }
}
