//! End-to-end authentication flows over the in-memory stores.
//!
//! These exercise the orchestrator with real ed25519 signatures and real
//! JWTs; only the persistence layer is swapped for the memory fakes.

use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;

use keygate_backend::auth::{
    AuthConfig, AuthError, AuthService, Ed25519Verifier, TokenIssuer, TokenKind,
};
use keygate_backend::models::{
    ChallengeAction, ChallengeRequest, ChallengeResponse, RegisterRequest, VerifyRequest,
};
use keygate_backend::store::{
    ChallengeStore, MemoryChallengeStore, MemorySessionStore, MemoryUserStore,
};

struct Harness {
    service: AuthService,
    challenges: Arc<MemoryChallengeStore>,
}

fn harness_with_ttl(challenge_ttl_seconds: i64) -> Harness {
    let challenges = Arc::new(MemoryChallengeStore::new());
    let service = AuthService::new(
        AuthConfig {
            allowed_domains: vec!["example.com".to_string()],
            challenge_ttl_seconds,
            session_ttl_seconds: 3600,
        },
        Arc::new(MemoryUserStore::new()),
        challenges.clone(),
        Arc::new(MemorySessionStore::new()),
        Arc::new(Ed25519Verifier),
        TokenIssuer::new("integration-test-secret".to_string(), 3600, 86_400),
    );
    Harness {
        service,
        challenges,
    }
}

fn harness() -> Harness {
    harness_with_ttl(300)
}

fn keypair() -> (String, SigningKey) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let public_key = general_purpose::STANDARD.encode(signing_key.verifying_key().as_bytes());
    (public_key, signing_key)
}

fn sign_nonce(signing_key: &SigningKey, nonce: &str) -> String {
    general_purpose::STANDARD.encode(signing_key.sign(nonce.as_bytes()).to_bytes())
}

async fn issue_challenge(
    service: &AuthService,
    action: ChallengeAction,
    public_key: Option<&str>,
) -> ChallengeResponse {
    service
        .create_challenge(&ChallengeRequest {
            domain: "example.com".to_string(),
            action,
            public_key: public_key.map(|k| k.to_string()),
        })
        .await
        .expect("challenge issuance failed")
}

async fn register_user(
    harness: &Harness,
    public_key: &str,
    signing_key: &SigningKey,
) -> keygate_backend::models::AuthResponse {
    let challenge =
        issue_challenge(&harness.service, ChallengeAction::Registration, None).await;
    harness
        .service
        .register(&RegisterRequest {
            challenge_id: challenge.challenge_id.clone(),
            public_key: public_key.to_string(),
            signature: sign_nonce(signing_key, &challenge.nonce),
            device_name: Some("test-device".to_string()),
        })
        .await
        .expect("registration failed")
}

#[tokio::test]
async fn registration_issues_working_credentials() {
    let h = harness();
    let (public_key, signing_key) = keypair();

    let auth = register_user(&h, &public_key, &signing_key).await;

    assert!(auth.user.id.starts_with("user_"));
    assert!(auth.user.public_key.id.starts_with("key_"));
    assert_eq!(auth.user.public_key.public_key, public_key);
    assert_eq!(auth.key_info.device_name.as_deref(), Some("test-device"));

    // The minted access token passes the per-request gate
    let claims = h.service.authenticate(&auth.token.access_token).await.unwrap();
    assert_eq!(claims.sub, auth.user.id);
    assert_eq!(claims.public_key_id, auth.user.public_key.id);
}

#[tokio::test]
async fn login_after_registration() {
    let h = harness();
    let (public_key, signing_key) = keypair();
    let registered = register_user(&h, &public_key, &signing_key).await;

    let challenge =
        issue_challenge(&h.service, ChallengeAction::Login, Some(&public_key)).await;
    let auth = h
        .service
        .verify(&VerifyRequest {
            challenge_id: challenge.challenge_id,
            public_key: public_key.clone(),
            signature: sign_nonce(&signing_key, &challenge.nonce),
        })
        .await
        .unwrap();

    assert_eq!(auth.user.id, registered.user.id);
    assert!(auth.user.last_login.is_some());

    // Login opens a fresh session rather than reusing the registration one
    let first = h.service.authenticate(&registered.token.access_token).await.unwrap();
    let second = h.service.authenticate(&auth.token.access_token).await.unwrap();
    assert_ne!(first.session_id, second.session_id);
}

#[tokio::test]
async fn reauth_redeems_like_login() {
    let h = harness();
    let (public_key, signing_key) = keypair();
    let registered = register_user(&h, &public_key, &signing_key).await;

    let challenge =
        issue_challenge(&h.service, ChallengeAction::Reauth, Some(&public_key)).await;
    assert_eq!(challenge.action, ChallengeAction::Reauth);

    let auth = h
        .service
        .verify(&VerifyRequest {
            challenge_id: challenge.challenge_id,
            public_key: public_key.clone(),
            signature: sign_nonce(&signing_key, &challenge.nonce),
        })
        .await
        .unwrap();

    assert_eq!(auth.user.id, registered.user.id);

    // The re-auth session passes the per-request gate like any other
    let claims = h.service.authenticate(&auth.token.access_token).await.unwrap();
    assert_eq!(claims.sub, registered.user.id);
}

#[tokio::test]
async fn reauth_challenge_requires_known_key() {
    let h = harness();
    let (public_key, _) = keypair();

    let err = h
        .service
        .create_challenge(&ChallengeRequest {
            domain: "example.com".to_string(),
            action: ChallengeAction::Reauth,
            public_key: Some(public_key),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::UserNotFound));
}

#[tokio::test]
async fn challenge_cannot_be_redeemed_twice() {
    let h = harness();
    let (public_key, signing_key) = keypair();
    let (other_key, other_signing) = keypair();

    let challenge =
        issue_challenge(&h.service, ChallengeAction::Registration, None).await;

    h.service
        .register(&RegisterRequest {
            challenge_id: challenge.challenge_id.clone(),
            public_key: public_key.clone(),
            signature: sign_nonce(&signing_key, &challenge.nonce),
            device_name: None,
        })
        .await
        .unwrap();

    // A second redemption with a different key is replay
    let err = h
        .service
        .register(&RegisterRequest {
            challenge_id: challenge.challenge_id,
            public_key: other_key,
            signature: sign_nonce(&other_signing, &challenge.nonce),
            device_name: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::ChallengeAlreadyUsed));
}

#[tokio::test]
async fn registration_challenge_rejected_for_login() {
    let h = harness();
    let (public_key, signing_key) = keypair();
    register_user(&h, &public_key, &signing_key).await;

    let challenge =
        issue_challenge(&h.service, ChallengeAction::Registration, None).await;
    let err = h
        .service
        .verify(&VerifyRequest {
            challenge_id: challenge.challenge_id,
            public_key,
            signature: sign_nonce(&signing_key, &challenge.nonce),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::Validation(_)));
}

#[tokio::test]
async fn login_with_unknown_key_fails() {
    let h = harness();
    let (public_key, signing_key) = keypair();

    let challenge = issue_challenge(&h.service, ChallengeAction::Login, None).await;
    let err = h
        .service
        .verify(&VerifyRequest {
            challenge_id: challenge.challenge_id,
            public_key,
            signature: sign_nonce(&signing_key, &challenge.nonce),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::UserNotFound));
}

#[tokio::test]
async fn duplicate_key_cannot_register_twice() {
    let h = harness();
    let (public_key, signing_key) = keypair();
    register_user(&h, &public_key, &signing_key).await;

    // Challenge issuance already rejects a known key for registration
    let err = h
        .service
        .create_challenge(&ChallengeRequest {
            domain: "example.com".to_string(),
            action: ChallengeAction::Registration,
            public_key: Some(public_key.clone()),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::UserExists));

    // And redemption rejects it even when the challenge was unbound
    let challenge =
        issue_challenge(&h.service, ChallengeAction::Registration, None).await;
    let err = h
        .service
        .register(&RegisterRequest {
            challenge_id: challenge.challenge_id,
            public_key,
            signature: sign_nonce(&signing_key, &challenge.nonce),
            device_name: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::UserExists));
}

#[tokio::test]
async fn bad_signature_leaves_challenge_redeemable() {
    let h = harness();
    let (public_key, signing_key) = keypair();
    let (_, wrong_signing) = keypair();

    let challenge =
        issue_challenge(&h.service, ChallengeAction::Registration, None).await;

    let err = h
        .service
        .register(&RegisterRequest {
            challenge_id: challenge.challenge_id.clone(),
            public_key: public_key.clone(),
            signature: sign_nonce(&wrong_signing, &challenge.nonce),
            device_name: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidSignature));

    // The failed attempt did not consume the challenge
    h.service
        .register(&RegisterRequest {
            challenge_id: challenge.challenge_id,
            public_key,
            signature: sign_nonce(&signing_key, &challenge.nonce),
            device_name: None,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn expired_challenge_is_rejected() {
    let h = harness_with_ttl(-1);
    let (public_key, signing_key) = keypair();

    let challenge =
        issue_challenge(&h.service, ChallengeAction::Registration, None).await;
    let err = h
        .service
        .register(&RegisterRequest {
            challenge_id: challenge.challenge_id,
            public_key,
            signature: sign_nonce(&signing_key, &challenge.nonce),
            device_name: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::ChallengeExpired));
}

#[tokio::test]
async fn challenge_bound_to_other_key_is_rejected() {
    let h = harness();
    let (bound_key, bound_signing) = keypair();
    let (other_key, other_signing) = keypair();
    register_user(&h, &bound_key, &bound_signing).await;
    register_user(&h, &other_key, &other_signing).await;

    let challenge =
        issue_challenge(&h.service, ChallengeAction::Login, Some(&bound_key)).await;
    let err = h
        .service
        .verify(&VerifyRequest {
            challenge_id: challenge.challenge_id,
            public_key: other_key,
            signature: sign_nonce(&other_signing, &challenge.nonce),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::Validation(_)));
}

#[tokio::test]
async fn unknown_domain_is_rejected() {
    let h = harness();
    let err = h
        .service
        .create_challenge(&ChallengeRequest {
            domain: "evil.example.net".to_string(),
            action: ChallengeAction::Login,
            public_key: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::DomainNotAllowed(_)));
}

#[tokio::test]
async fn logout_revokes_both_token_kinds() {
    let h = harness();
    let (public_key, signing_key) = keypair();
    let auth = register_user(&h, &public_key, &signing_key).await;

    let claims = h.service.authenticate(&auth.token.access_token).await.unwrap();
    h.service.logout(&claims.session_id).await.unwrap();

    // Tokens still carry valid signatures but the session is gone
    assert!(matches!(
        h.service.authenticate(&auth.token.access_token).await,
        Err(AuthError::SessionInvalid)
    ));
    assert!(matches!(
        h.service.refresh(&auth.token.refresh_token).await,
        Err(AuthError::SessionInvalid)
    ));

    // Logging out again is not an error
    h.service.logout(&claims.session_id).await.unwrap();
}

#[tokio::test]
async fn logout_all_invalidates_every_session() {
    let h = harness();
    let (public_key, signing_key) = keypair();
    let first = register_user(&h, &public_key, &signing_key).await;

    let challenge =
        issue_challenge(&h.service, ChallengeAction::Login, Some(&public_key)).await;
    let second = h
        .service
        .verify(&VerifyRequest {
            challenge_id: challenge.challenge_id,
            public_key: public_key.clone(),
            signature: sign_nonce(&signing_key, &challenge.nonce),
        })
        .await
        .unwrap();

    let count = h.service.logout_all(&first.user.id).await.unwrap();
    assert_eq!(count, 2);

    assert!(h.service.authenticate(&first.token.access_token).await.is_err());
    assert!(h.service.authenticate(&second.token.access_token).await.is_err());
}

#[tokio::test]
async fn refresh_preserves_the_session() {
    let h = harness();
    let (public_key, signing_key) = keypair();
    let auth = register_user(&h, &public_key, &signing_key).await;

    let original = h.service.authenticate(&auth.token.access_token).await.unwrap();
    let refreshed = h.service.refresh(&auth.token.refresh_token).await.unwrap();
    let renewed = h.service.authenticate(&refreshed.access_token).await.unwrap();

    assert_eq!(renewed.session_id, original.session_id);
    assert_eq!(renewed.sub, original.sub);
}

#[tokio::test]
async fn access_token_cannot_refresh() {
    let h = harness();
    let (public_key, signing_key) = keypair();
    let auth = register_user(&h, &public_key, &signing_key).await;

    assert!(matches!(
        h.service.refresh(&auth.token.access_token).await,
        Err(AuthError::InvalidToken)
    ));
}

#[tokio::test]
async fn refresh_token_cannot_pass_the_gate() {
    let h = harness();
    let (public_key, signing_key) = keypair();
    let auth = register_user(&h, &public_key, &signing_key).await;

    assert!(matches!(
        h.service.authenticate(&auth.token.refresh_token).await,
        Err(AuthError::InvalidToken)
    ));
}

#[tokio::test]
async fn foreign_tokens_are_rejected() {
    let h = harness();
    let foreign = TokenIssuer::new("some-other-secret".to_string(), 3600, 86_400)
        .issue_pair("user_x", "key_x", "ses_x")
        .unwrap();

    assert!(h.service.authenticate(&foreign.access_token).await.is_err());
    assert!(h.service.refresh(&foreign.refresh_token).await.is_err());

    // Sanity check that kind verification itself accepts our own tokens
    let issuer = TokenIssuer::new("integration-test-secret".to_string(), 3600, 86_400);
    let pair = issuer.issue_pair("user_x", "key_x", "ses_x").unwrap();
    assert!(issuer.verify_kind(&pair.access_token, TokenKind::Access).is_ok());
}

#[tokio::test]
async fn concurrent_claims_have_one_winner() {
    let h = harness();
    let challenge =
        issue_challenge(&h.service, ChallengeAction::Registration, None).await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = h.challenges.clone();
        let id = challenge.challenge_id.clone();
        handles.push(tokio::spawn(async move { store.mark_as_used(&id).await }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}
