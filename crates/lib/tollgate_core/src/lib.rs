//! # tollgate_core
//!
//! Credential issuance and verification for Tollgate: signed access tokens,
//! rotating refresh tokens with theft detection, personal access tokens,
//! OAuth client checks, rate limiting and security audit events.

pub mod audit;
pub mod config;
pub mod error;
pub mod ids;
pub mod keys;
pub mod models;
pub mod oauth;
pub mod rate_limit;
pub mod scopes;
pub mod service;
pub mod store;
pub mod tokens;

pub use error::{AuthError, UnauthorizedReason};
pub use service::AuthCoreService;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
