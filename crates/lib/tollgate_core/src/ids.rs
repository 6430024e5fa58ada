// Identifier and secret generation.
//
// Token, session and family ids are UUIDv7 so rows sort by issuance time.
// Secrets are 32 random bytes, URL-safe base64 without padding, so they never
// contain the `.` separating id and secret on the wire.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use uuid::Uuid;

/// Number of random bytes in an opaque token secret.
pub const SECRET_BYTES: usize = 32;

/// Generate a new UUIDv7 (timestamp-sortable).
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}

/// Generate `n` random bytes, URL-safe base64 encoded.
pub fn random_urlsafe(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate an opaque token secret.
pub fn generate_secret() -> String {
    random_urlsafe(SECRET_BYTES)
}

/// True when every char is in the URL-safe base64 alphabet.
pub fn is_urlsafe(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
