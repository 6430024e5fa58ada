//! Principals, sessions, memberships and opaque token rows.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::UnknownVariant;
use crate::scopes::WorkspaceRole;

/// Kind of principal an access token speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    User,
    Service,
}

/// Kind of client a session was opened from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    Web,
    Mobile,
    Desktop,
    Cli,
    ThirdParty,
}

impl ClientType {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientType::Web => "web",
            ClientType::Mobile => "mobile",
            ClientType::Desktop => "desktop",
            ClientType::Cli => "cli",
            ClientType::ThirdParty => "third_party",
        }
    }
}

impl FromStr for ClientType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web" => Ok(ClientType::Web),
            "mobile" => Ok(ClientType::Mobile),
            "desktop" => Ok(ClientType::Desktop),
            "cli" => Ok(ClientType::Cli),
            "third_party" => Ok(ClientType::ThirdParty),
            other => Err(UnknownVariant {
                kind: "client type",
                value: other.to_string(),
            }),
        }
    }
}

/// Domain user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub disabled_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.disabled_at.is_none()
    }
}

/// Login session. Refresh tokens hang off a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub client_type: ClientType,
    /// OAuth client that opened the session, if any.
    pub client_id: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub absolute_expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    /// Authenticator assurance level reached at login (1 = single factor).
    pub mfa_level: i16,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now && self.absolute_expires_at > now
    }
}

/// Membership of a profile in a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceMembership {
    pub workspace_id: String,
    pub profile_id: String,
    pub role: WorkspaceRole,
    pub created_at: DateTime<Utc>,
}

/// Opaque token flavours sharing the `tokens` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Refresh,
    PersonalAccess,
}

impl TokenType {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenType::Refresh => "refresh",
            TokenType::PersonalAccess => "personal_access",
        }
    }
}

impl FromStr for TokenType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "refresh" => Ok(TokenType::Refresh),
            "personal_access" => Ok(TokenType::PersonalAccess),
            other => Err(UnknownVariant {
                kind: "token type",
                value: other.to_string(),
            }),
        }
    }
}

/// Keyed hash of a token secret. The raw secret is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashEnvelope {
    pub alg: String,
    pub kid: String,
    pub hash: String,
    pub issued_at: DateTime<Utc>,
}

/// Refresh token or personal access token row.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRecord {
    pub id: Uuid,
    pub user_id: String,
    pub session_id: Option<Uuid>,
    pub workspace_id: Option<String>,
    pub token_type: TokenType,
    pub token_hash: HashEnvelope,
    pub scopes: Vec<String>,
    pub name: Option<String>,
    pub family_id: Option<Uuid>,
    pub metadata: Map<String, Value>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TokenRecord {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn summary(&self) -> TokenSummary {
        TokenSummary {
            id: self.id,
            name: self.name.clone(),
            workspace_id: self.workspace_id.clone(),
            scopes: self.scopes.clone(),
            expires_at: self.expires_at,
            revoked_at: self.revoked_at,
            last_used_at: self.last_used_at,
            created_at: self.created_at,
        }
    }
}

/// Token listing entry without hash material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSummary {
    pub id: Uuid,
    pub name: Option<String>,
    pub workspace_id: Option<String>,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Merge revocation metadata into a token's existing metadata.
///
/// Every key present before the merge is still present after it. Incoming
/// values replace existing values for the same key; incoming nulls are ignored.
pub fn merge_metadata(existing: &Map<String, Value>, incoming: Map<String, Value>) -> Map<String, Value> {
    let mut merged = existing.clone();
    for (key, value) in incoming {
        if value.is_null() {
            continue;
        }
        merged.insert(key, value);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn session(now: DateTime<Utc>) -> Session {
        Session {
            id: Uuid::now_v7(),
            user_id: "u1".into(),
            client_type: ClientType::Web,
            client_id: None,
            expires_at: now + Duration::hours(1),
            absolute_expires_at: now + Duration::days(1),
            revoked_at: None,
            mfa_level: 1,
            created_at: now,
        }
    }

    #[test]
    fn session_liveness() {
        let now = Utc::now();
        let mut s = session(now);
        assert!(s.is_live(now));

        s.absolute_expires_at = now - Duration::seconds(1);
        assert!(!s.is_live(now));

        let mut s = session(now);
        s.revoked_at = Some(now);
        assert!(!s.is_live(now));
    }

    #[test]
    fn merge_keeps_prior_keys() {
        let existing = json!({"createdVia": "cli", "note": "ci"});
        let incoming = json!({"revokedReason": "rotated", "note": "replaced", "revokedBy": null});
        let merged = merge_metadata(
            existing.as_object().unwrap(),
            incoming.as_object().unwrap().clone(),
        );
        assert_eq!(merged["createdVia"], "cli");
        assert_eq!(merged["note"], "replaced");
        assert_eq!(merged["revokedReason"], "rotated");
        assert!(!merged.contains_key("revokedBy"));
    }

    #[test]
    fn enum_labels_round_trip_through_strings() {
        for t in [TokenType::Refresh, TokenType::PersonalAccess] {
            assert_eq!(t.as_str().parse::<TokenType>().unwrap(), t);
        }
        assert!("bogus".parse::<ClientType>().is_err());
        assert_eq!("third_party".parse::<ClientType>().unwrap(), ClientType::ThirdParty);
    }
}
