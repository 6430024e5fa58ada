//! Keyed hashing of opaque token secrets.
//!
//! Secrets are stored as HMAC-SHA256 envelopes tagged with the hashing key id.
//! Verification picks the key named in the envelope, so the hashing key can be
//! rotated while older envelopes keep verifying.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::models::HashEnvelope;

type HmacSha256 = Hmac<Sha256>;

/// Envelope algorithm label.
pub const HASH_ALG: &str = "hmac-sha256";

pub struct SecretHasher {
    active_kid: String,
    keys: HashMap<String, Vec<u8>>,
}

impl SecretHasher {
    pub fn new(kid: impl Into<String>, secret: impl AsRef<[u8]>) -> Self {
        let kid = kid.into();
        let mut keys = HashMap::new();
        keys.insert(kid.clone(), secret.as_ref().to_vec());
        Self {
            active_kid: kid,
            keys,
        }
    }

    /// Keep accepting envelopes produced under a retired key.
    pub fn with_previous(mut self, kid: impl Into<String>, secret: impl AsRef<[u8]>) -> Self {
        self.keys.entry(kid.into()).or_insert_with(|| secret.as_ref().to_vec());
        self
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        config.previous_token_hash_keys.iter().fold(
            Self::new(&config.token_hash_key_id, &config.token_hash_secret),
            |hasher, (kid, secret)| hasher.with_previous(kid, secret),
        )
    }

    pub fn active_kid(&self) -> &str {
        &self.active_kid
    }

    fn mac(&self, kid: &str) -> Option<HmacSha256> {
        let key = self.keys.get(kid)?;
        HmacSha256::new_from_slice(key).ok()
    }

    /// Hash `secret` under the active key.
    pub fn seal(&self, secret: &str, issued_at: DateTime<Utc>) -> Result<HashEnvelope, AuthError> {
        let mut mac = self
            .mac(&self.active_kid)
            .ok_or_else(|| AuthError::Internal("token hash key unavailable".into()))?;
        mac.update(secret.as_bytes());
        Ok(HashEnvelope {
            alg: HASH_ALG.into(),
            kid: self.active_kid.clone(),
            hash: URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()),
            issued_at,
        })
    }

    /// Constant-time check of `secret` against a stored envelope.
    pub fn verify(&self, secret: &str, envelope: &HashEnvelope) -> bool {
        if envelope.alg != HASH_ALG {
            return false;
        }
        let Some(mut mac) = self.mac(&envelope.kid) else {
            return false;
        };
        let Ok(expected) = URL_SAFE_NO_PAD.decode(&envelope.hash) else {
            return false;
        };
        mac.update(secret.as_bytes());
        let computed = mac.finalize().into_bytes();
        expected.ct_eq(computed.as_slice()).unwrap_u8() == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_never_contains_the_secret() {
        let hasher = SecretHasher::new("h1", "key");
        let envelope = hasher.seal("plain-secret", Utc::now()).unwrap();
        assert_eq!(envelope.alg, HASH_ALG);
        assert_eq!(envelope.kid, "h1");
        assert!(!envelope.hash.contains("plain-secret"));
        assert!(hasher.verify("plain-secret", &envelope));
        assert!(!hasher.verify("other-secret", &envelope));
    }

    #[test]
    fn rotated_hash_key_still_verifies_old_envelopes() {
        let old = SecretHasher::new("h1", "old-key");
        let envelope = old.seal("s", Utc::now()).unwrap();

        let rotated = SecretHasher::new("h2", "new-key").with_previous("h1", "old-key");
        assert!(rotated.verify("s", &envelope));
        assert_eq!(rotated.seal("s", Utc::now()).unwrap().kid, "h2");

        let forgotten = SecretHasher::new("h2", "new-key");
        assert!(!forgotten.verify("s", &envelope));
    }

    #[test]
    fn tampered_envelope_fails() {
        let hasher = SecretHasher::new("h1", "key");
        let mut envelope = hasher.seal("s", Utc::now()).unwrap();
        envelope.alg = "sha256".into();
        assert!(!hasher.verify("s", &envelope));

        let mut envelope = hasher.seal("s", Utc::now()).unwrap();
        envelope.hash = "%%%".into();
        assert!(!hasher.verify("s", &envelope));
    }

    #[test]
    fn truncated_hash_fails() {
        let hasher = SecretHasher::new("h1", "key");
        let mut envelope = hasher.seal("s", Utc::now()).unwrap();
        let raw = URL_SAFE_NO_PAD.decode(&envelope.hash).unwrap();
        envelope.hash = URL_SAFE_NO_PAD.encode(&raw[..16]);
        assert!(!hasher.verify("s", &envelope));

        envelope.hash = String::new();
        assert!(!hasher.verify("s", &envelope));
    }
}
