//! Authentication service
//!
//! Core business logic for challenge-response authentication. The service is
//! the only component that spans the three stores; it is handed its
//! dependencies at construction and holds no global state.
//!
//! Challenge redemption discipline (shared by register and verify): the
//! pre-checks on the loaded challenge only shape the client-facing error; the
//! atomic `mark_as_used` claim is the sole authorization to proceed, so two
//! racing redemptions can never both mint a session.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::RngCore;
use thiserror::Error;

use crate::auth::crypto::{CryptoError, SignatureVerifier};
use crate::auth::tokens::{Claims, TokenError, TokenIssuer, TokenKind};
use crate::config::Config;
use crate::error::ApiError;
use crate::models::{
    generate_id, AuthResponse, Challenge, ChallengeAction, ChallengeRequest, ChallengeResponse,
    KeyMetadata, RegisterRequest, TokenPair, User, VerifyRequest,
};
use crate::store::{ChallengeStore, SessionStore, StoreError, UserStore};

/// Auth service errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Domain not allowed: {0}")]
    DomainNotAllowed(String),

    #[error("Challenge not found")]
    ChallengeNotFound,

    #[error("Challenge expired")]
    ChallengeExpired,

    #[error("Challenge already used")]
    ChallengeAlreadyUsed,

    #[error("User already exists for this key")]
    UserExists,

    #[error("User not found")]
    UserNotFound,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Session is invalid or expired")]
    SessionInvalid,

    #[error("Storage failure: {0}")]
    Storage(String),
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            // The only unique constraints a flow can trip are key/nonce ones
            StoreError::Duplicate(_) => AuthError::UserExists,
            StoreError::Storage(detail) => AuthError::Storage(detail),
        }
    }
}

impl From<CryptoError> for AuthError {
    fn from(_: CryptoError) -> Self {
        AuthError::InvalidSignature
    }
}

impl From<TokenError> for AuthError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::EncodingFailed(detail) => AuthError::Storage(detail),
            _ => AuthError::InvalidToken,
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Validation(msg) | AuthError::DomainNotAllowed(msg) => {
                ApiError::ValidationError(msg)
            }
            AuthError::ChallengeNotFound => ApiError::NotFound("Challenge not found".to_string()),
            AuthError::UserNotFound => ApiError::NotFound("User not found".to_string()),
            AuthError::ChallengeAlreadyUsed => {
                ApiError::Conflict("Challenge already used".to_string())
            }
            AuthError::UserExists => {
                ApiError::Conflict("A user already exists for this key".to_string())
            }
            AuthError::ChallengeExpired
            | AuthError::InvalidSignature
            | AuthError::InvalidToken
            | AuthError::SessionInvalid => {
                // Generic message; the precise precondition is not leaked
                ApiError::Unauthorized("Authentication failed".to_string())
            }
            AuthError::Storage(detail) => ApiError::InternalError(detail),
        }
    }
}

/// The slice of [`Config`] the orchestrator needs.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub allowed_domains: Vec<String>,
    pub challenge_ttl_seconds: i64,
    pub session_ttl_seconds: i64,
}

impl From<&Config> for AuthConfig {
    fn from(config: &Config) -> Self {
        Self {
            allowed_domains: config.allowed_domains.clone(),
            challenge_ttl_seconds: config.challenge_ttl_seconds,
            session_ttl_seconds: config.session_ttl_seconds,
        }
    }
}

/// Authentication orchestrator
pub struct AuthService {
    config: AuthConfig,
    users: Arc<dyn UserStore>,
    challenges: Arc<dyn ChallengeStore>,
    sessions: Arc<dyn SessionStore>,
    verifier: Arc<dyn SignatureVerifier>,
    tokens: TokenIssuer,
}

impl AuthService {
    pub fn new(
        config: AuthConfig,
        users: Arc<dyn UserStore>,
        challenges: Arc<dyn ChallengeStore>,
        sessions: Arc<dyn SessionStore>,
        verifier: Arc<dyn SignatureVerifier>,
        tokens: TokenIssuer,
    ) -> Self {
        Self {
            config,
            users,
            challenges,
            sessions,
            verifier,
            tokens,
        }
    }

    /// Issue a fresh one-time challenge for the requested domain and action.
    pub async fn create_challenge(
        &self,
        request: &ChallengeRequest,
    ) -> Result<ChallengeResponse, AuthError> {
        if !self.config.allowed_domains.iter().any(|d| d == &request.domain) {
            return Err(AuthError::DomainNotAllowed(request.domain.clone()));
        }

        match request.action {
            ChallengeAction::Registration => {
                if let Some(public_key) = &request.public_key {
                    if self.users.public_key_exists(public_key).await? {
                        return Err(AuthError::UserExists);
                    }
                }
            }
            ChallengeAction::Login | ChallengeAction::Reauth => {
                if let Some(public_key) = &request.public_key {
                    if !self.users.public_key_exists(public_key).await? {
                        return Err(AuthError::UserNotFound);
                    }
                }
            }
        }

        let now = Utc::now();
        let challenge = Challenge {
            id: generate_id("chl"),
            nonce: generate_secure_nonce(),
            domain: request.domain.clone(),
            action: request.action,
            public_key: request.public_key.clone(),
            created_at: now,
            expires_at: now + Duration::seconds(self.config.challenge_ttl_seconds),
            used: false,
        };

        self.challenges.save(&challenge).await?;

        tracing::debug!(
            challenge_id = %challenge.id,
            domain = %challenge.domain,
            action = %challenge.action.as_str(),
            "Challenge created"
        );

        Ok(ChallengeResponse {
            challenge_id: challenge.id,
            nonce: challenge.nonce,
            domain: challenge.domain,
            action: challenge.action,
            expires_at: challenge.expires_at,
        })
    }

    /// Redeem a registration challenge: create the user and its key, open a
    /// session and mint tokens.
    pub async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, AuthError> {
        let challenge = self
            .load_redeemable_challenge(&request.challenge_id, &request.public_key)
            .await?;

        if challenge.action != ChallengeAction::Registration {
            return Err(AuthError::Validation(
                "Challenge was not issued for registration".to_string(),
            ));
        }

        if self.users.public_key_exists(&request.public_key).await? {
            return Err(AuthError::UserExists);
        }

        self.verifier
            .verify(&request.public_key, &challenge.nonce, &request.signature)?;

        self.claim(&challenge.id).await?;

        let metadata = KeyMetadata {
            device_name: request.device_name.clone(),
        };
        let user = self.users.create(&request.public_key, &metadata).await?;

        tracing::info!(user_id = %user.id, "User registered");

        self.open_session(user).await
    }

    /// Redeem a login or re-auth challenge for an existing key.
    pub async fn verify(&self, request: &VerifyRequest) -> Result<AuthResponse, AuthError> {
        let challenge = self
            .load_redeemable_challenge(&request.challenge_id, &request.public_key)
            .await?;

        if challenge.action == ChallengeAction::Registration {
            return Err(AuthError::Validation(
                "Challenge was not issued for login".to_string(),
            ));
        }

        let mut user = self
            .users
            .find_by_public_key(&request.public_key)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        self.verifier
            .verify(&request.public_key, &challenge.nonce, &request.signature)?;

        self.claim(&challenge.id).await?;

        self.users
            .update_last_login(&user.id, &request.public_key)
            .await?;
        let now = Utc::now();
        user.last_login = Some(now);
        user.public_key.last_used = now;

        tracing::info!(user_id = %user.id, "User logged in");

        self.open_session(user).await
    }

    /// Invalidate a session. Idempotent: logging out an already-invalid
    /// session is not an error.
    pub async fn logout(&self, session_id: &str) -> Result<(), AuthError> {
        self.sessions.invalidate(session_id).await?;
        tracing::debug!(session_id = %session_id, "Session invalidated");
        Ok(())
    }

    /// Invalidate every session of a user. Returns the number invalidated.
    pub async fn logout_all(&self, user_id: &str) -> Result<u64, AuthError> {
        let count = self.sessions.invalidate_all_for_user(user_id).await?;
        tracing::info!(user_id = %user_id, count, "All sessions invalidated");
        Ok(count)
    }

    /// Mint a new pair from a refresh token. The session id is preserved;
    /// refresh never rotates the session, and a logged-out session rejects
    /// its refresh tokens even while their signatures remain valid.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.tokens.verify_kind(refresh_token, TokenKind::Refresh)?;

        if !self.sessions.is_valid(&claims.session_id).await? {
            return Err(AuthError::SessionInvalid);
        }

        let user = self
            .users
            .find_by_id(&claims.sub)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        Ok(self
            .tokens
            .issue_pair(&user.id, &claims.public_key_id, &claims.session_id)?)
    }

    /// Look up a user by id.
    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>, AuthError> {
        Ok(self.users.find_by_id(user_id).await?)
    }

    /// Verify an inbound access token and re-check its session against the
    /// store. This is the per-request gate protected endpoints use.
    pub async fn authenticate(&self, access_token: &str) -> Result<Claims, AuthError> {
        let claims = self.tokens.verify_kind(access_token, TokenKind::Access)?;

        if !self.sessions.is_valid(&claims.session_id).await? {
            return Err(AuthError::SessionInvalid);
        }

        Ok(claims)
    }

    /// Load a challenge and run the client-facing pre-checks: presence,
    /// expiry, used flag, nonce usage and key binding. Authorization to
    /// redeem still comes only from [`claim`](Self::claim).
    async fn load_redeemable_challenge(
        &self,
        challenge_id: &str,
        public_key: &str,
    ) -> Result<Challenge, AuthError> {
        let challenge = self
            .challenges
            .find_by_id(challenge_id)
            .await?
            .ok_or(AuthError::ChallengeNotFound)?;

        if challenge.is_expired(Utc::now()) {
            return Err(AuthError::ChallengeExpired);
        }

        if challenge.used {
            return Err(AuthError::ChallengeAlreadyUsed);
        }

        // The nonce flag is checked independently of the challenge id:
        // a used nonce is replay even under a different id
        if self.challenges.is_nonce_used(&challenge.nonce).await? {
            return Err(AuthError::ChallengeAlreadyUsed);
        }

        if let Some(bound_key) = &challenge.public_key {
            if bound_key != public_key {
                return Err(AuthError::Validation(
                    "Challenge is bound to a different key".to_string(),
                ));
            }
        }

        Ok(challenge)
    }

    /// Atomically claim the challenge. A losing claimant is surfaced as
    /// replay, never retried.
    async fn claim(&self, challenge_id: &str) -> Result<(), AuthError> {
        if !self.challenges.mark_as_used(challenge_id).await? {
            tracing::warn!(challenge_id = %challenge_id, "Lost challenge claim race");
            return Err(AuthError::ChallengeAlreadyUsed);
        }
        Ok(())
    }

    async fn open_session(&self, user: User) -> Result<AuthResponse, AuthError> {
        let session = self
            .sessions
            .create(
                &user.id,
                &user.public_key.id,
                Some(self.config.session_ttl_seconds),
            )
            .await?;

        let token = self
            .tokens
            .issue_pair(&user.id, &user.public_key.id, &session.id)?;

        Ok(AuthResponse {
            key_info: user.public_key.clone(),
            user,
            token,
        })
    }
}

/// Generate a cryptographically secure nonce
fn generate_secure_nonce() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
