//! OAuth token endpoint.

use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, PRAGMA};
use axum::response::IntoResponse;
use axum::{Form, Json};
use tollgate_core::service::CodeExchange;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{TokenRequest, TokenResponse};

/// `POST /oauth/token`: refresh-token rotation and authorization-code
/// exchange.
pub async fn token_handler(
    State(state): State<AppState>,
    Form(body): Form<TokenRequest>,
) -> AppResult<impl IntoResponse> {
    let tokens = match body.grant_type.as_str() {
        "refresh_token" => {
            let refresh_token = required(body.refresh_token, "refresh_token")?;
            state.service.refresh_session(&refresh_token).await?
        }
        "authorization_code" => {
            let exchange = CodeExchange {
                code: required(body.code, "code")?,
                client_id: required(body.client_id, "client_id")?,
                redirect_uri: required(body.redirect_uri, "redirect_uri")?,
                code_verifier: required(body.code_verifier, "code_verifier")?,
            };
            state.service.exchange_authorization_code(exchange).await?
        }
        other => {
            return Err(AppError::Validation(format!(
                "unsupported grant_type: {other}"
            )));
        }
    };
    Ok((
        [(CACHE_CONTROL, "no-store"), (PRAGMA, "no-cache")],
        Json(TokenResponse::from(tokens)),
    ))
}

fn required(value: Option<String>, field: &str) -> AppResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::Validation(format!("{field} is required")))
}
