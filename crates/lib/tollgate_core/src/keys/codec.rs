//! Signed access tokens (EdDSA JWTs).
//!
//! Access tokens are never persisted; validity is signature + issuer +
//! audience + expiry only.

use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{Header, Validation, decode, decode_header, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SigningKeyStore;
use crate::error::AuthError;
use crate::ids::uuidv7;
use crate::models::{ClientType, PrincipalKind};

/// Claims embedded in access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject: user or service id.
    pub sub: String,
    pub kind: PrincipalKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<Uuid>,
    /// Workspace hint chosen at issuance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wid: Option<String>,
    /// Workspaces a service principal may act in.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_workspaces: Vec<String>,
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_type: Option<ClientType>,
    pub iss: String,
    pub aud: String,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Issued at (unix timestamp).
    pub iat: i64,
    pub jti: Uuid,
}

/// Who an access token is for, before issuer-side claims are stamped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessTokenSubject {
    pub principal_id: String,
    pub kind: PrincipalKind,
    pub session_id: Option<Uuid>,
    pub workspace_id: Option<String>,
    pub allowed_workspaces: Vec<String>,
    pub scopes: Vec<String>,
    pub client_id: Option<String>,
    pub client_type: Option<ClientType>,
}

impl AccessTokenSubject {
    pub fn user(user_id: impl Into<String>, session_id: Uuid, scopes: Vec<String>) -> Self {
        Self {
            principal_id: user_id.into(),
            kind: PrincipalKind::User,
            session_id: Some(session_id),
            workspace_id: None,
            allowed_workspaces: Vec::new(),
            scopes,
            client_id: None,
            client_type: None,
        }
    }

    pub fn service(
        service_id: impl Into<String>,
        allowed_workspaces: Vec<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            principal_id: service_id.into(),
            kind: PrincipalKind::Service,
            session_id: None,
            workspace_id: None,
            allowed_workspaces,
            scopes,
            client_id: None,
            client_type: None,
        }
    }
}

/// A freshly signed token and the claims inside it.
#[derive(Clone)]
pub struct SignedAccessToken {
    pub token: String,
    pub claims: AccessTokenClaims,
}

impl SignedAccessToken {
    /// Lifetime in seconds, for `expires_in` responses.
    pub fn expires_in(&self) -> i64 {
        self.claims.exp - self.claims.iat
    }
}

impl std::fmt::Debug for SignedAccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedAccessToken")
            .field("token", &"<redacted>")
            .field("claims", &self.claims)
            .finish()
    }
}

/// Signs with the active key; verifies against every published key.
#[derive(Clone)]
pub struct AccessTokenCodec {
    keys: Arc<SigningKeyStore>,
    issuer: String,
    audience: String,
    leeway_secs: u64,
}

impl AccessTokenCodec {
    pub fn new(
        keys: Arc<SigningKeyStore>,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        leeway_secs: u64,
    ) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            audience: audience.into(),
            leeway_secs,
        }
    }

    pub fn keys(&self) -> &Arc<SigningKeyStore> {
        &self.keys
    }

    /// Sign `subject` with the active key, valid for `ttl`.
    pub fn sign(
        &self,
        subject: AccessTokenSubject,
        ttl: Duration,
    ) -> Result<SignedAccessToken, AuthError> {
        let snapshot = self.keys.snapshot();
        let key = snapshot
            .active()
            .ok_or_else(|| AuthError::Internal("no active signing key".into()))?;
        let encoding = key
            .encoding_key()
            .ok_or_else(|| AuthError::Internal(format!("key {} cannot sign", key.kid)))?;

        let now = Utc::now();
        let claims = AccessTokenClaims {
            sub: subject.principal_id,
            kind: subject.kind,
            sid: subject.session_id,
            wid: subject.workspace_id,
            allowed_workspaces: subject.allowed_workspaces,
            scopes: subject.scopes,
            client_id: subject.client_id,
            client_type: subject.client_type,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            jti: uuidv7(),
        };

        key.note_signed(claims.exp);
        let mut header = Header::new(key.algorithm);
        header.kid = Some(key.kid.clone());
        let token = encode(&header, &claims, encoding)
            .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))?;
        Ok(SignedAccessToken { token, claims })
    }

    /// Verify signature, issuer, audience and expiry.
    pub fn verify(&self, token: &str) -> Result<AccessTokenClaims, AuthError> {
        let header =
            decode_header(token).map_err(|e| AuthError::InvalidToken(format!("header: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::InvalidToken("missing key id".into()))?;

        let snapshot = self.keys.snapshot();
        let key = snapshot
            .find(&kid)
            .ok_or_else(|| AuthError::InvalidToken(format!("unknown key id {kid}")))?;
        if header.alg != key.algorithm {
            return Err(AuthError::InvalidToken("algorithm mismatch".into()));
        }

        let mut validation = Validation::new(key.algorithm);
        validation.leeway = self.leeway_secs;
        validation.validate_exp = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        decode::<AccessTokenClaims>(token, key.decoding_key(), &validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}
