//! `{id}.{secret}` wire format for opaque tokens.

use std::fmt;

use uuid::Uuid;

use crate::ids::{generate_secret, is_urlsafe, uuidv7};

/// Parsed opaque token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct OpaqueToken {
    pub id: Uuid,
    pub secret: String,
}

impl OpaqueToken {
    /// Fresh id and secret.
    pub fn generate() -> Self {
        Self {
            id: uuidv7(),
            secret: generate_secret(),
        }
    }

    /// Parse `{uuid}.{urlsafe-secret}`; anything else is `None`.
    pub fn parse(wire: &str) -> Option<Self> {
        let (id, secret) = wire.trim().split_once('.')?;
        if !is_urlsafe(secret) {
            return None;
        }
        let id = Uuid::try_parse(id).ok()?;
        Some(Self {
            id,
            secret: secret.to_string(),
        })
    }

    /// Plaintext wire value. Hand it to the client once and drop it.
    pub fn to_wire(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for OpaqueToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.id, self.secret)
    }
}

impl fmt::Debug for OpaqueToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpaqueToken")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_parse_back() {
        let token = OpaqueToken::generate();
        let parsed = OpaqueToken::parse(&token.to_wire()).unwrap();
        assert_eq!(parsed, token);
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(OpaqueToken::parse("no-separator").is_none());
        assert!(OpaqueToken::parse("not-a-uuid.secret").is_none());
        let id = Uuid::now_v7();
        assert!(OpaqueToken::parse(&format!("{id}.")).is_none());
        assert!(OpaqueToken::parse(&format!("{id}.a.b")).is_none());
        assert!(OpaqueToken::parse(&format!("{id}.s p a c e")).is_none());
    }

    #[test]
    fn debug_hides_secret() {
        let token = OpaqueToken::generate();
        assert!(!format!("{token:?}").contains(&token.secret));
    }
}
