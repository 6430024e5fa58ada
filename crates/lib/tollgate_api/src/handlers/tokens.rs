//! Personal access token management.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use tollgate_core::service::{IssuePersonalAccessToken, RevokeToken};
use uuid::Uuid;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::Authenticated;
use crate::models::{
    CreateTokenRequest, CreateTokenResponse, RevokeTokenResponse, TokenListResponse,
};

/// Lifetime used when the request names no expiry.
const DEFAULT_TOKEN_DAYS: i64 = 30;

/// `POST /auth/tokens`: create a personal access token.
pub async fn create_token_handler(
    State(state): State<AppState>,
    axum::Extension(caller): axum::Extension<Authenticated>,
    Json(body): Json<CreateTokenRequest>,
) -> AppResult<(StatusCode, Json<CreateTokenResponse>)> {
    let user_id = caller.user_id()?;
    let expires_at = match (body.expires_at, body.expires_in_days) {
        (Some(at), _) => at,
        (None, Some(days)) if days > 0 => Utc::now() + Duration::days(days),
        (None, Some(_)) => {
            return Err(AppError::Validation(
                "expiresInDays must be positive".into(),
            ));
        }
        (None, None) => Utc::now() + Duration::days(DEFAULT_TOKEN_DAYS),
    };
    let issued = state
        .service
        .issue_personal_access_token(IssuePersonalAccessToken {
            user_id: user_id.to_string(),
            workspace_id: body.workspace_id,
            scopes: body.scopes,
            name: body.name,
            expires_at,
        })
        .await?;
    let record = issued.record;
    Ok((
        StatusCode::CREATED,
        Json(CreateTokenResponse {
            id: record.id,
            token: issued.wire,
            name: record.name,
            scopes: record.scopes,
            workspace_id: record.workspace_id,
            expires_at: record.expires_at,
            created_at: record.created_at,
        }),
    ))
}

/// `GET /auth/tokens`: the caller's personal access tokens.
pub async fn list_tokens_handler(
    State(state): State<AppState>,
    axum::Extension(caller): axum::Extension<Authenticated>,
) -> AppResult<Json<TokenListResponse>> {
    let tokens = state
        .service
        .list_personal_access_tokens(caller.user_id()?)
        .await?;
    Ok(Json(TokenListResponse { tokens }))
}

/// `DELETE /auth/tokens/{id}`: revoke one of the caller's tokens.
pub async fn revoke_token_handler(
    State(state): State<AppState>,
    axum::Extension(caller): axum::Extension<Authenticated>,
    Path(token_id): Path<String>,
) -> AppResult<Json<RevokeTokenResponse>> {
    let user_id = caller.user_id()?;
    let token_id = Uuid::parse_str(&token_id)
        .map_err(|_| AppError::Validation("token id must be a UUID".into()))?;
    let revoked = state
        .service
        .revoke_token(RevokeToken {
            token_id,
            reason: Some("user_revoked".into()),
            revoked_by: Some(user_id.to_string()),
            owner: Some(user_id.to_string()),
        })
        .await?;
    Ok(Json(RevokeTokenResponse { revoked }))
}
