//! Core protocol models for KeyGate
//!
//! Entities persisted by the stores plus the request/response DTOs exposed
//! to the HTTP layer. Timestamps are `DateTime<Utc>` internally and epoch
//! milliseconds on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Generate an opaque, type-prefixed identifier (e.g. `user_3f2a…`).
///
/// The prefix distinguishes user/key/session/challenge ids for debuggability;
/// the payload is a random UUIDv4 without hyphens.
pub fn generate_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

/// What a challenge authorizes once redeemed.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeAction {
    Registration,
    Login,
    /// Domain-bound re-authentication of an already known key.
    Reauth,
}

impl ChallengeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeAction::Registration => "registration",
            ChallengeAction::Login => "login",
            ChallengeAction::Reauth => "reauth",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "registration" => Some(ChallengeAction::Registration),
            "login" => Some(ChallengeAction::Login),
            "reauth" => Some(ChallengeAction::Reauth),
            _ => None,
        }
    }
}

/// One-time authentication challenge.
///
/// The nonce is the authoritative anti-replay signal; `used` transitions
/// false to true exactly once and never back.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: String,
    pub nonce: String,
    pub domain: String,
    pub action: ChallengeAction,
    /// Binds a login/re-auth challenge to a known key, if one was supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

impl Challenge {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A user's single active public key.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyInfo {
    pub id: String,
    pub public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub added_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_used: DateTime<Utc>,
}

/// Identity anchor. Owns exactly one [`PublicKeyInfo`].
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub public_key: PublicKeyInfo,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_login: Option<DateTime<Utc>>,
}

/// Server-side login record, independently invalidatable from its tokens.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub public_key_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    pub invalidated: bool,
}

impl Session {
    /// Validity derived from the row, never from a token.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.invalidated && self.expires_at > now
    }
}

/// Optional metadata recorded alongside a new or replaced key.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct KeyMetadata {
    pub device_name: Option<String>,
}

// ============================================================================
// Request/Response DTOs
// ============================================================================

/// Request for an authentication challenge.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
    #[validate(length(min = 1, max = 255))]
    pub domain: String,
    pub action: ChallengeAction,
    /// Required to pre-exist for login/re-auth; must not exist for registration.
    pub public_key: Option<String>,
}

/// Client-facing challenge payload.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    pub challenge_id: String,
    pub nonce: String,
    pub domain: String,
    pub action: ChallengeAction,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

/// Request to redeem a registration challenge.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(length(min = 1))]
    pub challenge_id: String,
    #[validate(length(min = 1))]
    pub public_key: String,
    /// Base64 signature over the challenge nonce.
    #[validate(length(min = 1))]
    pub signature: String,
    pub device_name: Option<String>,
}

/// Request to redeem a login/re-auth challenge.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    #[validate(length(min = 1))]
    pub challenge_id: String,
    #[validate(length(min = 1))]
    pub public_key: String,
    #[validate(length(min = 1))]
    pub signature: String,
}

/// Request to mint a fresh token pair.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[validate(length(min = 1))]
    pub refresh_token: String,
}

/// Signed access/refresh pair.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

/// Successful register/verify payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: User,
    pub key_info: PublicKeyInfo,
    pub token: TokenPair,
}
