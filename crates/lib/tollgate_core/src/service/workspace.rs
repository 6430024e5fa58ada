//! Active workspace resolution and scope narrowing.
//!
//! Precedence: path parameter, then header, then the hint carried by the
//! token, then the caller's oldest membership. Blank hints count as absent.
//! A hint naming a workspace the caller cannot act in is an error, never a
//! reason to fall back.

use super::context::WorkspaceSource;
use crate::error::AuthError;
use crate::models::WorkspaceMembership;
use crate::scopes::{PROFILE_SCOPES, WorkspaceRole, intersect};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedWorkspace {
    pub workspace_id: String,
    pub source: WorkspaceSource,
    /// `None` for service principals, which carry no membership.
    pub role: Option<WorkspaceRole>,
}

/// Highest-precedence non-blank hint.
pub fn pick_hint<'a>(
    path: Option<&'a str>,
    header: Option<&'a str>,
    token: Option<&'a str>,
) -> Option<(&'a str, WorkspaceSource)> {
    [
        (path, WorkspaceSource::Path),
        (header, WorkspaceSource::Header),
        (token, WorkspaceSource::Token),
    ]
    .into_iter()
    .find_map(|(value, source)| {
        value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| (v, source))
    })
}

/// Resolve for a user principal from its memberships.
pub fn resolve_for_user(
    memberships: &[WorkspaceMembership],
    hint: Option<(&str, WorkspaceSource)>,
) -> Result<Option<ResolvedWorkspace>, AuthError> {
    if let Some((workspace_id, source)) = hint {
        let membership = memberships
            .iter()
            .find(|m| m.workspace_id == workspace_id)
            .ok_or_else(|| {
                AuthError::Authorization(format!("not a member of workspace {workspace_id}"))
            })?;
        return Ok(Some(ResolvedWorkspace {
            workspace_id: membership.workspace_id.clone(),
            source,
            role: Some(membership.role),
        }));
    }

    Ok(memberships
        .iter()
        .min_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.workspace_id.cmp(&b.workspace_id))
        })
        .map(|m| ResolvedWorkspace {
            workspace_id: m.workspace_id.clone(),
            source: WorkspaceSource::DefaultMembership,
            role: Some(m.role),
        }))
}

/// Resolve for a service principal from the workspaces it was issued for.
pub fn resolve_for_service(
    allowed: &[String],
    hint: Option<(&str, WorkspaceSource)>,
) -> Result<Option<ResolvedWorkspace>, AuthError> {
    if let Some((workspace_id, source)) = hint {
        if !allowed.iter().any(|w| w == workspace_id) {
            return Err(AuthError::Authorization(format!(
                "service not allowed in workspace {workspace_id}"
            )));
        }
        return Ok(Some(ResolvedWorkspace {
            workspace_id: workspace_id.to_string(),
            source,
            role: None,
        }));
    }
    Ok(allowed.first().map(|w| ResolvedWorkspace {
        workspace_id: w.clone(),
        source: WorkspaceSource::DefaultMembership,
        role: None,
    }))
}

/// Token scopes narrowed by the role, or by the profile-only set when no
/// workspace is active. Never grants a scope the token lacks.
pub fn effective_user_scopes(
    token_scopes: &[String],
    resolved: Option<&ResolvedWorkspace>,
) -> Vec<String> {
    match resolved.and_then(|r| r.role) {
        Some(role) => intersect(token_scopes, role.scopes()),
        None => intersect(token_scopes, PROFILE_SCOPES),
    }
}
