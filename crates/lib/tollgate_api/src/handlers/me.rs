//! Caller introspection and logout.

use axum::Json;
use axum::extract::State;
use tollgate_core::service::AuthContext;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::Authenticated;
use crate::models::LogoutResponse;

/// `GET /auth/me` and `GET /workspaces/{workspace_id}/me`: the resolved
/// auth context.
pub async fn me_handler(
    axum::Extension(caller): axum::Extension<Authenticated>,
) -> Json<AuthContext> {
    Json(caller.0)
}

/// `POST /auth/logout`: end the session behind the presented access token.
pub async fn logout_handler(
    State(state): State<AppState>,
    axum::Extension(caller): axum::Extension<Authenticated>,
) -> AppResult<Json<LogoutResponse>> {
    let user_id = caller.user_id()?;
    let session_id = caller
        .0
        .session_id
        .ok_or_else(|| AppError::Validation("credential is not bound to a session".into()))?;
    let ended = state.service.logout(session_id, Some(user_id)).await?;
    Ok(Json(LogoutResponse { ended }))
}
