//! # tollgate_api
//!
//! HTTP adapter for the Tollgate authentication core.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use tollgate_core::AuthCoreService;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ApiConfig;
use crate::handlers::{me, oauth, tokens, well_known};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AuthCoreService>,
    /// API configuration.
    pub config: ApiConfig,
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required)
    let public = Router::new()
        .route(routes::GET_WELL_KNOWN_JWKS, get(well_known::jwks_handler))
        .route(routes::POST_OAUTH_TOKEN, post(oauth::token_handler));

    // Protected routes (require auth)
    let protected = Router::new()
        .route(routes::GET_AUTH_ME, get(me::me_handler))
        .route(routes::GET_WORKSPACES_ID_ME, get(me::me_handler))
        .route(routes::POST_AUTH_LOGOUT, post(me::logout_handler))
        .route(routes::POST_AUTH_TOKENS, post(tokens::create_token_handler))
        .route(routes::GET_AUTH_TOKENS, get(tokens::list_tokens_handler))
        .route(
            routes::DELETE_AUTH_TOKENS_ID,
            delete(tokens::revoke_token_handler),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(cors)
        .with_state(state)
}
