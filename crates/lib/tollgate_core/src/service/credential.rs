//! Credential classification by shape.

use crate::error::{AuthError, UnauthorizedReason};
use crate::tokens::OpaqueToken;

/// Inbound bearer credential, classified once at the edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Compact JWS access token.
    Signed(String),
    /// `{id}.{secret}` personal access token.
    Opaque(OpaqueToken),
}

impl Credential {
    /// Classify an Authorization header value. A `Bearer` prefix is optional
    /// and matched case-insensitively.
    pub fn classify(header: Option<&str>) -> Result<Self, AuthError> {
        let raw = header.unwrap_or_default().trim_start();
        let value = strip_bearer(raw).trim();
        if value.is_empty() {
            return Err(AuthError::Unauthorized(UnauthorizedReason::MissingCredential));
        }
        if is_compact_jws(value) {
            return Ok(Credential::Signed(value.to_string()));
        }
        OpaqueToken::parse(value)
            .map(Credential::Opaque)
            .ok_or_else(|| AuthError::InvalidToken("unrecognized credential format".into()))
    }
}

/// Drops a leading `Bearer` scheme. A bare scheme leaves nothing.
fn strip_bearer(raw: &str) -> &str {
    const SCHEME: &str = "bearer";
    match raw.get(..SCHEME.len()) {
        Some(head) if head.eq_ignore_ascii_case(SCHEME) => {
            let rest = &raw[SCHEME.len()..];
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                rest
            } else {
                raw
            }
        }
        _ => raw,
    }
}

/// Three non-empty base64url segments.
fn is_compact_jws(value: &str) -> bool {
    let parts: Vec<&str> = value.split('.').collect();
    parts.len() == 3 && parts.iter().all(|p| crate::ids::is_urlsafe(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jws_and_opaque_shapes() {
        let jws = "eyJhbGciOiJFZERTQSJ9.eyJzdWIiOiJ1MSJ9.c2ln";
        assert_eq!(
            Credential::classify(Some(&format!("Bearer {jws}"))).unwrap(),
            Credential::Signed(jws.into())
        );

        let opaque = OpaqueToken::generate();
        let classified = Credential::classify(Some(&format!("bEaReR {opaque}"))).unwrap();
        assert_eq!(classified, Credential::Opaque(opaque.clone()));

        let bare = Credential::classify(Some(&opaque.to_wire())).unwrap();
        assert_eq!(bare, Credential::Opaque(opaque));
    }

    #[test]
    fn missing_and_malformed() {
        for header in [
            None,
            Some(""),
            Some("Bearer "),
            Some("bearer"),
            Some("BEARER \t "),
            Some("   "),
        ] {
            assert!(matches!(
                Credential::classify(header).unwrap_err(),
                AuthError::Unauthorized(UnauthorizedReason::MissingCredential)
            ));
        }
        for header in [
            "Bearer a.b",
            "Basic dXNlcjpwYXNz",
            "a..c",
            "x.y.z.w",
            "Bearerx.y",
        ] {
            assert!(matches!(
                Credential::classify(Some(header)).unwrap_err(),
                AuthError::InvalidToken(_)
            ));
        }
    }
}
