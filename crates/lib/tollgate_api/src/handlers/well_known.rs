//! Published verification keys.

use axum::Json;
use axum::extract::State;
use tollgate_core::keys::JwkSet;

use crate::AppState;

/// `GET /.well-known/jwks.json`: active and recently retired public keys.
pub async fn jwks_handler(State(state): State<AppState>) -> Json<JwkSet> {
    Json(state.service.jwks())
}
