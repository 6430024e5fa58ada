//! Scope vocabulary and workspace role → scope mapping.
//!
//! Roles only ever narrow a credential's scopes: the effective set is the
//! intersection of what the token carries and what the role implies.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::UnknownVariant;

pub const READ_PROFILE: &str = "read:profile";
pub const WRITE_PROFILE: &str = "write:profile";
pub const READ_ACCOUNTS: &str = "read:accounts";
pub const WRITE_ACCOUNTS: &str = "write:accounts";
pub const READ_TRANSACTIONS: &str = "read:transactions";
pub const WRITE_TRANSACTIONS: &str = "write:transactions";
pub const READ_TOKENS: &str = "read:tokens";
pub const WRITE_TOKENS: &str = "write:tokens";
pub const READ_WORKSPACE: &str = "read:workspace";
pub const MANAGE_WORKSPACE: &str = "manage:workspace";
pub const DELETE_WORKSPACE: &str = "delete:workspace";

/// Every scope a credential may carry.
pub const ALL_SCOPES: &[&str] = &[
    READ_PROFILE,
    WRITE_PROFILE,
    READ_ACCOUNTS,
    WRITE_ACCOUNTS,
    READ_TRANSACTIONS,
    WRITE_TRANSACTIONS,
    READ_TOKENS,
    WRITE_TOKENS,
    READ_WORKSPACE,
    MANAGE_WORKSPACE,
    DELETE_WORKSPACE,
];

/// Scopes usable without any workspace context.
pub const PROFILE_SCOPES: &[&str] = &[READ_PROFILE, WRITE_PROFILE, READ_TOKENS, WRITE_TOKENS];

const VIEWER: &[&str] = &[READ_PROFILE, READ_ACCOUNTS];

const MEMBER: &[&str] = &[
    READ_PROFILE,
    WRITE_PROFILE,
    READ_ACCOUNTS,
    WRITE_ACCOUNTS,
    READ_TRANSACTIONS,
    WRITE_TRANSACTIONS,
    READ_TOKENS,
    WRITE_TOKENS,
];

const ADMIN: &[&str] = &[
    READ_PROFILE,
    WRITE_PROFILE,
    READ_ACCOUNTS,
    WRITE_ACCOUNTS,
    READ_TRANSACTIONS,
    WRITE_TRANSACTIONS,
    READ_TOKENS,
    WRITE_TOKENS,
    READ_WORKSPACE,
    MANAGE_WORKSPACE,
];

/// Role of a profile inside one workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceRole {
    Owner,
    Admin,
    Member,
    Viewer,
}

impl WorkspaceRole {
    /// Fixed scope set implied by the role.
    pub fn scopes(self) -> &'static [&'static str] {
        match self {
            WorkspaceRole::Owner => ALL_SCOPES,
            WorkspaceRole::Admin => ADMIN,
            WorkspaceRole::Member => MEMBER,
            WorkspaceRole::Viewer => VIEWER,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkspaceRole::Owner => "owner",
            WorkspaceRole::Admin => "admin",
            WorkspaceRole::Member => "member",
            WorkspaceRole::Viewer => "viewer",
        }
    }
}

impl FromStr for WorkspaceRole {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(WorkspaceRole::Owner),
            "admin" => Ok(WorkspaceRole::Admin),
            "member" => Ok(WorkspaceRole::Member),
            "viewer" => Ok(WorkspaceRole::Viewer),
            other => Err(UnknownVariant {
                kind: "workspace role",
                value: other.to_string(),
            }),
        }
    }
}

/// Token scopes ∩ allowed, keeping the token's order and dropping duplicates.
pub fn intersect(token_scopes: &[String], allowed: &[&str]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(token_scopes.len());
    for scope in token_scopes {
        if allowed.contains(&scope.as_str()) && !out.contains(scope) {
            out.push(scope.clone());
        }
    }
    out
}

/// Trim, dedupe and check every requested scope against the vocabulary.
pub fn normalize_requested(scopes: &[String]) -> Result<Vec<String>, String> {
    let mut out: Vec<String> = Vec::with_capacity(scopes.len());
    for raw in scopes {
        let scope = raw.trim();
        if !ALL_SCOPES.contains(&scope) {
            return Err(format!("unknown scope '{scope}'"));
        }
        if !out.iter().any(|s| s == scope) {
            out.push(scope.to_string());
        }
    }
    if out.is_empty() {
        return Err("at least one scope is required".into());
    }
    Ok(out)
}
