//! Domain models.
//!
//! These are storage-agnostic; `store::postgres` maps them to rows.

pub mod auth;
pub mod oauth;

pub use auth::{
    ClientType, HashEnvelope, PrincipalKind, Session, TokenRecord, TokenSummary, TokenType, User,
    WorkspaceMembership, merge_metadata,
};
pub use oauth::{OAuthClientRecord, OAuthClientType, TokenEndpointAuthMethod};

/// Error returned when parsing a stored enum label fails.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}
