//! OAuth authorization code + PKCE exchange.

mod common;

use common::{CLI_REDIRECT, harness, scopes};
use tollgate_core::AuthError;
use tollgate_core::models::ClientType;
use tollgate_core::oauth::pkce::{compute_code_challenge, generate_code_verifier};
use tollgate_core::scopes::READ_PROFILE;
use tollgate_core::service::{AuthorizationRequest, CodeExchange, VerifyRequest};

fn authorize(verifier: &str) -> AuthorizationRequest {
    AuthorizationRequest {
        client_id: "cli".into(),
        redirect_uri: CLI_REDIRECT.into(),
        user_id: "u1".into(),
        scopes: scopes(&[READ_PROFILE]),
        code_challenge: compute_code_challenge(verifier),
        code_challenge_method: "S256".into(),
    }
}

fn exchange(code: &str, verifier: &str) -> CodeExchange {
    CodeExchange {
        code: code.into(),
        client_id: "cli".into(),
        redirect_uri: CLI_REDIRECT.into(),
        code_verifier: verifier.into(),
    }
}

#[tokio::test]
async fn code_exchange_starts_a_client_session() {
    let h = harness();
    let verifier = generate_code_verifier();
    let code = h
        .service
        .create_authorization_code(authorize(&verifier))
        .await
        .unwrap();

    let tokens = h
        .service
        .exchange_authorization_code(exchange(&code, &verifier))
        .await
        .unwrap();
    assert_eq!(tokens.access.claims.client_id.as_deref(), Some("cli"));
    assert_eq!(tokens.access.claims.client_type, Some(ClientType::Cli));

    let ctx = h
        .service
        .verify_request(VerifyRequest {
            authorization: Some(format!("Bearer {}", tokens.access.token)),
            ..VerifyRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(ctx.scopes, scopes(&[READ_PROFILE]));

    // Single use.
    let err = h
        .service
        .exchange_authorization_code(exchange(&code, &verifier))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidToken(_)));
}

#[tokio::test]
async fn wrong_verifier_burns_the_code() {
    let h = harness();
    let verifier = generate_code_verifier();
    let code = h
        .service
        .create_authorization_code(authorize(&verifier))
        .await
        .unwrap();

    let err = h
        .service
        .exchange_authorization_code(exchange(&code, &generate_code_verifier()))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Authorization(_)));
    assert!(
        h.service
            .exchange_authorization_code(exchange(&code, &verifier))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn redirect_uri_must_match_exactly() {
    let h = harness();
    let verifier = generate_code_verifier();

    let mut request = authorize(&verifier);
    request.redirect_uri = format!("{CLI_REDIRECT}/");
    assert!(matches!(
        h.service.create_authorization_code(request).await,
        Err(AuthError::Authorization(_))
    ));

    let code = h
        .service
        .create_authorization_code(authorize(&verifier))
        .await
        .unwrap();
    let mut swap = exchange(&code, &verifier);
    swap.redirect_uri = "http://127.0.0.1:9999/callback".into();
    assert!(matches!(
        h.service.exchange_authorization_code(swap).await,
        Err(AuthError::Authorization(_))
    ));
}

#[tokio::test]
async fn only_s256_is_accepted() {
    let h = harness();
    let verifier = generate_code_verifier();
    let mut request = authorize(&verifier);
    request.code_challenge_method = "plain".into();
    request.code_challenge = verifier.clone();
    assert!(matches!(
        h.service.create_authorization_code(request).await,
        Err(AuthError::Validation(_))
    ));
    assert!(h.service.authorization_codes().is_empty());
}
