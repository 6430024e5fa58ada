//! Resolved request identity and the hook that publishes it.

use serde::Serialize;
use tracing::Span;
use uuid::Uuid;

use crate::error::AuthError;
use crate::models::{ClientType, PrincipalKind};
use crate::scopes::WorkspaceRole;

/// Inputs the HTTP layer hands to `verify_request`.
#[derive(Debug, Clone, Default)]
pub struct VerifyRequest {
    /// Raw `Authorization` header value.
    pub authorization: Option<String>,
    /// `X-Workspace-Id` header.
    pub workspace_header: Option<String>,
    /// `{workspace_id}` path parameter.
    pub workspace_path: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    AccessToken,
    PersonalAccessToken,
}

/// Where the active workspace came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceSource {
    Path,
    Header,
    Token,
    DefaultMembership,
}

/// Identity and capabilities of an authenticated request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    pub principal_id: String,
    pub principal_kind: PrincipalKind,
    pub credential: CredentialKind,
    pub session_id: Option<Uuid>,
    /// Personal access token id.
    pub token_id: Option<Uuid>,
    pub workspace_id: Option<String>,
    pub workspace_source: Option<WorkspaceSource>,
    pub role: Option<WorkspaceRole>,
    /// Token scopes narrowed by the role in the active workspace.
    pub scopes: Vec<String>,
    pub client_id: Option<String>,
    pub client_type: Option<ClientType>,
}

impl AuthContext {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    pub fn require_scope(&self, scope: &str) -> Result<(), AuthError> {
        if self.has_scope(scope) {
            Ok(())
        } else {
            Err(AuthError::Authorization(format!("missing scope {scope}")))
        }
    }
}

/// Called once per successfully verified request, before the context is
/// returned. Never called on failure.
pub trait ContextPropagator: Send + Sync {
    fn propagate(&self, ctx: &AuthContext);
}

/// Records the principal on the current tracing span.
///
/// The span must declare `principal_id` and `workspace_id` (usually as
/// `tracing::field::Empty`); undeclared fields are ignored.
#[derive(Debug, Clone, Default)]
pub struct SpanContextPropagator;

impl ContextPropagator for SpanContextPropagator {
    fn propagate(&self, ctx: &AuthContext) {
        let span = Span::current();
        span.record("principal_id", ctx.principal_id.as_str());
        if let Some(workspace_id) = &ctx.workspace_id {
            span.record("workspace_id", workspace_id.as_str());
        }
    }
}
