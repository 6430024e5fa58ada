//! Route paths served by the router.

pub const GET_WELL_KNOWN_JWKS: &str = "/.well-known/jwks.json";
pub const POST_OAUTH_TOKEN: &str = "/oauth/token";
pub const POST_AUTH_LOGOUT: &str = "/auth/logout";
pub const GET_AUTH_ME: &str = "/auth/me";
pub const GET_WORKSPACES_ID_ME: &str = "/workspaces/{workspace_id}/me";
pub const POST_AUTH_TOKENS: &str = "/auth/tokens";
pub const GET_AUTH_TOKENS: &str = "/auth/tokens";
pub const DELETE_AUTH_TOKENS_ID: &str = "/auth/tokens/{id}";
