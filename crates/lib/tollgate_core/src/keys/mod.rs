//! Signing key management.
//!
//! The key set is an immutable snapshot behind an `Arc`. Rotation builds a new
//! snapshot and swaps the pointer, so verifiers holding the old snapshot keep
//! a consistent view. Exactly one key in a snapshot signs; retired keys stay
//! published until [`SigningKeyStore::prune_retired`] drops them, which only
//! happens once the last token a key signed has expired.

pub mod codec;
pub mod jwk;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use ed25519_dalek::pkcs8::EncodePrivateKey;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use rand::RngCore;
use tracing::info;

pub use codec::{AccessTokenClaims, AccessTokenCodec, AccessTokenSubject, SignedAccessToken};
pub use jwk::{Jwk, JwkSet};

use crate::error::AuthError;

/// Ed25519 seed length.
pub const SEED_BYTES: usize = 32;

/// One signing key. Retired keys keep only their public half.
#[derive(Clone)]
pub struct SigningKey {
    pub kid: String,
    pub algorithm: Algorithm,
    pub public_key: Vec<u8>,
    encoding: Option<EncodingKey>,
    decoding: DecodingKey,
    pub jwk: Jwk,
    pub created_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
    /// Latest `exp` (epoch seconds) of any token signed with this key.
    /// Shared with the retired copy so late signatures still count.
    latest_expiry: Arc<AtomicI64>,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("has_private_key", &self.encoding.is_some())
            .field("created_at", &self.created_at)
            .field("retired_at", &self.retired_at)
            .field("latest_expiry", &self.latest_expiry())
            .finish()
    }
}

impl SigningKey {
    /// Derive an Ed25519 key from a 32-byte seed.
    pub fn from_seed(seed: &[u8; SEED_BYTES], created_at: DateTime<Utc>) -> Result<Self, AuthError> {
        let signing = ed25519_dalek::SigningKey::from_bytes(seed);
        let der = signing
            .to_pkcs8_der()
            .map_err(|e| AuthError::Internal(format!("pkcs8 encode: {e}")))?;
        let public_key = signing.verifying_key().to_bytes().to_vec();
        let kid = jwk::thumbprint(&public_key);
        let jwk = Jwk::ed25519(&public_key, &kid);
        let decoding = DecodingKey::from_ed_components(&jwk.x)
            .map_err(|e| AuthError::Internal(format!("decoding key: {e}")))?;

        Ok(Self {
            kid,
            algorithm: Algorithm::EdDSA,
            public_key,
            encoding: Some(EncodingKey::from_ed_der(der.as_bytes())),
            decoding,
            jwk,
            created_at,
            retired_at: None,
            latest_expiry: Arc::new(AtomicI64::new(i64::MIN)),
        })
    }

    /// Parse a URL-safe base64 seed as produced by config resolution.
    pub fn from_encoded_seed(encoded: &str, created_at: DateTime<Utc>) -> Result<Self, AuthError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|e| AuthError::Validation(format!("signing key seed: {e}")))?;
        let seed: [u8; SEED_BYTES] = bytes.try_into().map_err(|_| {
            AuthError::Validation(format!("signing key seed must be {SEED_BYTES} bytes"))
        })?;
        Self::from_seed(&seed, created_at)
    }

    pub fn generate(created_at: DateTime<Utc>) -> Result<Self, AuthError> {
        let mut seed = [0u8; SEED_BYTES];
        rand::rng().fill_bytes(&mut seed);
        Self::from_seed(&seed, created_at)
    }

    pub fn is_active(&self) -> bool {
        self.retired_at.is_none()
    }

    pub fn encoding_key(&self) -> Option<&EncodingKey> {
        self.encoding.as_ref()
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }

    /// Record that a token expiring at `exp` was signed with this key.
    pub fn note_signed(&self, exp: i64) {
        self.latest_expiry.fetch_max(exp, Ordering::AcqRel);
    }

    /// Latest expiry signed so far, or `None` if the key never signed.
    pub fn latest_expiry(&self) -> Option<i64> {
        match self.latest_expiry.load(Ordering::Acquire) {
            i64::MIN => None,
            exp => Some(exp),
        }
    }

    /// True once every token this retired key signed is past `exp + leeway`.
    fn is_spent(&self, now: DateTime<Utc>, leeway_secs: i64) -> bool {
        self.retired_at.is_some()
            && self
                .latest_expiry()
                .is_none_or(|exp| exp.saturating_add(leeway_secs) < now.timestamp())
    }

    /// Copy without private material, stamped as retired.
    fn retired(&self, at: DateTime<Utc>) -> Self {
        Self {
            encoding: None,
            retired_at: Some(at),
            ..self.clone()
        }
    }
}

/// Immutable view of the published keys.
#[derive(Debug, Clone)]
pub struct KeySet {
    active_kid: String,
    keys: BTreeMap<String, Arc<SigningKey>>,
}

impl KeySet {
    pub fn active(&self) -> Option<&Arc<SigningKey>> {
        self.keys.get(&self.active_kid)
    }

    pub fn active_kid(&self) -> &str {
        &self.active_kid
    }

    /// Look up a published key (active or retired) by id.
    pub fn find(&self, kid: &str) -> Option<&Arc<SigningKey>> {
        self.keys.get(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Public key-set document, active key first.
    pub fn jwks(&self) -> JwkSet {
        let mut keys: Vec<&Arc<SigningKey>> = self.keys.values().collect();
        keys.sort_by(|a, b| {
            b.is_active()
                .cmp(&a.is_active())
                .then(b.created_at.cmp(&a.created_at))
        });
        JwkSet {
            keys: keys.into_iter().map(|k| k.jwk.clone()).collect(),
        }
    }
}

/// Holder of the current [`KeySet`] snapshot.
pub struct SigningKeyStore {
    current: RwLock<Arc<KeySet>>,
}

impl SigningKeyStore {
    pub fn new(initial: SigningKey) -> Self {
        let kid = initial.kid.clone();
        let mut keys = BTreeMap::new();
        keys.insert(kid.clone(), Arc::new(initial));
        Self {
            current: RwLock::new(Arc::new(KeySet {
                active_kid: kid,
                keys,
            })),
        }
    }

    /// Store seeded from config, or with a fresh random key.
    pub fn from_seed_or_generate(seed: Option<&str>) -> Result<Self, AuthError> {
        let now = Utc::now();
        let key = match seed {
            Some(encoded) => SigningKey::from_encoded_seed(encoded, now)?,
            None => SigningKey::generate(now)?,
        };
        Ok(Self::new(key))
    }

    /// Current snapshot. Cheap; clones an `Arc`.
    pub fn snapshot(&self) -> Arc<KeySet> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn jwks(&self) -> JwkSet {
        self.snapshot().jwks()
    }

    /// Make `next` the active key; the previous active key is retired but
    /// stays published. Returns the new key id.
    pub fn rotate_to(&self, next: SigningKey) -> String {
        let now = Utc::now();
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut keys = guard.keys.clone();
        if let Some(previous) = keys.get(&guard.active_kid).cloned() {
            keys.insert(previous.kid.clone(), Arc::new(previous.retired(now)));
        }
        let kid = next.kid.clone();
        keys.insert(kid.clone(), Arc::new(next));
        let retired = guard.active_kid.clone();
        *guard = Arc::new(KeySet {
            active_kid: kid.clone(),
            keys,
        });
        info!(active_kid = %kid, retired_kid = %retired, "rotated signing key");
        kid
    }

    /// Generate a fresh key and rotate to it.
    pub fn rotate(&self) -> Result<String, AuthError> {
        Ok(self.rotate_to(SigningKey::generate(Utc::now())?))
    }

    /// Drop retired keys whose signed tokens are all expired beyond
    /// `leeway_secs` at `now`. Returns the dropped ids.
    pub fn prune_retired(&self, now: DateTime<Utc>, leeway_secs: u64) -> Vec<String> {
        let leeway_secs = i64::try_from(leeway_secs).unwrap_or(i64::MAX);
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let dropped: Vec<String> = guard
            .keys
            .values()
            .filter(|k| k.is_spent(now, leeway_secs))
            .map(|k| k.kid.clone())
            .collect();
        if dropped.is_empty() {
            return dropped;
        }
        let mut keys = guard.keys.clone();
        for kid in &dropped {
            keys.remove(kid);
        }
        *guard = Arc::new(KeySet {
            active_kid: guard.active_kid.clone(),
            keys,
        });
        info!(dropped = ?dropped, "pruned retired signing keys");
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_derivation_is_deterministic() {
        let now = Utc::now();
        let a = SigningKey::from_seed(&[7u8; SEED_BYTES], now).unwrap();
        let b = SigningKey::from_seed(&[7u8; SEED_BYTES], now).unwrap();
        assert_eq!(a.kid, b.kid);
        assert_eq!(a.public_key.len(), 32);
    }

    #[test]
    fn encoded_seed_must_be_32_bytes() {
        assert!(SigningKey::from_encoded_seed("c2hvcnQ", Utc::now()).is_err());
        let encoded = URL_SAFE_NO_PAD.encode([1u8; SEED_BYTES]);
        assert!(SigningKey::from_encoded_seed(&encoded, Utc::now()).is_ok());
    }

    #[test]
    fn rotation_is_additive() {
        let store = SigningKeyStore::new(SigningKey::from_seed(&[1u8; 32], Utc::now()).unwrap());
        let before = store.snapshot();
        let old_kid = before.active_kid().to_string();

        let new_kid = store.rotate().unwrap();
        let after = store.snapshot();

        assert_ne!(old_kid, new_kid);
        assert_eq!(after.len(), 2);
        assert_eq!(after.active_kid(), new_kid);
        let retired = after.find(&old_kid).unwrap();
        assert!(!retired.is_active());
        assert!(retired.encoding_key().is_none());

        // The old snapshot is untouched.
        assert_eq!(before.len(), 1);
        assert_eq!(before.active_kid(), old_kid);
    }

    #[test]
    fn jwks_lists_active_key_first() {
        let store = SigningKeyStore::new(SigningKey::from_seed(&[2u8; 32], Utc::now()).unwrap());
        let new_kid = store.rotate().unwrap();
        let jwks = store.jwks();
        assert_eq!(jwks.keys.len(), 2);
        assert_eq!(jwks.keys[0].kid, new_kid);
    }

    #[test]
    fn prune_waits_for_the_last_signed_expiry() {
        let store = SigningKeyStore::new(SigningKey::from_seed(&[3u8; 32], Utc::now()).unwrap());
        let snapshot = store.snapshot();
        let old_kid = snapshot.active_kid().to_string();
        let now = Utc::now();
        let exp = (now + chrono::Duration::hours(6)).timestamp();
        snapshot.active().unwrap().note_signed(exp);
        store.rotate().unwrap();

        assert!(store.prune_retired(now, 30).is_empty());
        assert!(
            store
                .prune_retired(now + chrono::Duration::hours(6), 30)
                .is_empty()
        );
        assert_eq!(
            store.prune_retired(now + chrono::Duration::hours(7), 30),
            vec![old_kid]
        );
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn retired_key_that_never_signed_is_dropped_at_once() {
        let store = SigningKeyStore::new(SigningKey::from_seed(&[5u8; 32], Utc::now()).unwrap());
        let old_kid = store.snapshot().active_kid().to_string();
        store.rotate().unwrap();
        assert_eq!(store.prune_retired(Utc::now(), 30), vec![old_kid]);
    }

    #[test]
    fn active_key_is_never_pruned() {
        let store = SigningKeyStore::new(SigningKey::from_seed(&[6u8; 32], Utc::now()).unwrap());
        let future = Utc::now() + chrono::Duration::days(400);
        assert!(store.prune_retired(future, 0).is_empty());
        assert_eq!(store.snapshot().len(), 1);
    }
}
