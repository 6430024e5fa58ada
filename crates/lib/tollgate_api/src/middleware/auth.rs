//! Bearer authentication middleware.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, RawPathParams, Request, State, rejection::RawPathParamsRejection},
    http::{
        HeaderMap,
        header::{AUTHORIZATION, USER_AGENT},
    },
    middleware::Next,
    response::Response,
};
use tollgate_core::models::PrincipalKind;
use tollgate_core::service::{AuthContext, VerifyRequest};
use tracing::{Instrument, field, info_span};

use crate::AppState;
use crate::error::AppError;

/// Explicit workspace hint header.
pub const WORKSPACE_HEADER: &str = "x-workspace-id";

/// Path parameter carrying a workspace hint.
const WORKSPACE_PATH_PARAM: &str = "workspace_id";

/// Resolved caller, stored in request extensions.
#[derive(Debug, Clone)]
pub struct Authenticated(pub AuthContext);

impl Authenticated {
    /// The caller's user id. Service principals are refused.
    pub fn user_id(&self) -> Result<&str, AppError> {
        match self.0.principal_kind {
            PrincipalKind::User => Ok(&self.0.principal_id),
            PrincipalKind::Service => Err(AppError::Forbidden(
                "endpoint requires a user principal".into(),
            )),
        }
    }
}

/// Axum middleware: verifies the bearer credential with the workspace hints
/// of the request and injects [`Authenticated`] into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    path: Result<RawPathParams, RawPathParamsRejection>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let headers = request.headers();
    let workspace_path = path.ok().and_then(|params| {
        params
            .iter()
            .find(|(name, _)| *name == WORKSPACE_PATH_PARAM)
            .map(|(_, value)| value.to_string())
    });
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let verify = VerifyRequest {
        authorization: header_str(headers, AUTHORIZATION.as_str()),
        workspace_header: header_str(headers, WORKSPACE_HEADER),
        workspace_path,
        ip: client_ip(headers, peer, state.config.trust_forwarded_for),
        user_agent: header_str(headers, USER_AGENT.as_str()),
    };

    let span = info_span!(
        "auth",
        principal_id = field::Empty,
        workspace_id = field::Empty
    );
    let ctx = state
        .service
        .verify_request(verify)
        .instrument(span.clone())
        .await?;

    request.extensions_mut().insert(Authenticated(ctx));
    Ok(next.run(request).instrument(span).await)
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// First `X-Forwarded-For` hop when the proxy is trusted, else the peer.
fn client_ip(headers: &HeaderMap, peer: Option<String>, trust_forwarded: bool) -> Option<String> {
    if trust_forwarded
        && let Some(forwarded) = header_str(headers, "x-forwarded-for")
        && let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty())
    {
        return Some(first.to_string());
    }
    peer
}
