//! JWT token generation and validation
//!
//! Mints and verifies the signed access/refresh pairs. Both kinds are signed
//! with the same HS256 secret; the embedded kind keeps them from ever being
//! interchangeable.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::TokenPair;

/// Token-related errors
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Token encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Wrong token kind: expected {expected}")]
    WrongKind { expected: &'static str },
}

/// Claims carried by both token kinds
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Token kind (access or refresh)
    #[serde(rename = "type")]
    pub token_type: String,
    /// The key that proved possession for this session
    pub public_key_id: String,
    /// Session this credential is bound to
    pub session_id: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// Token kind enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// Mints and verifies signed token pairs.
///
/// Constructed once at startup from the configured secret and TTLs.
#[derive(Clone)]
pub struct TokenIssuer {
    secret: String,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl TokenIssuer {
    pub fn new(secret: String, access_ttl_seconds: i64, refresh_ttl_seconds: i64) -> Self {
        Self {
            secret,
            access_ttl_seconds,
            refresh_ttl_seconds,
        }
    }

    /// Mint an access/refresh pair bound to (user, key, session).
    pub fn issue_pair(
        &self,
        user_id: &str,
        public_key_id: &str,
        session_id: &str,
    ) -> Result<TokenPair, TokenError> {
        let access_token = self.sign(
            user_id,
            public_key_id,
            session_id,
            TokenKind::Access,
            self.access_ttl_seconds,
        )?;
        let refresh_token = self.sign(
            user_id,
            public_key_id,
            session_id,
            TokenKind::Refresh,
            self.refresh_ttl_seconds,
        )?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.access_ttl_seconds,
        })
    }

    fn sign(
        &self,
        user_id: &str,
        public_key_id: &str,
        session_id: &str,
        kind: TokenKind,
        ttl_seconds: i64,
    ) -> Result<String, TokenError> {
        let now = Utc::now();
        let exp = now + Duration::seconds(ttl_seconds);

        let claims = Claims {
            sub: user_id.to_string(),
            token_type: kind.as_str().to_string(),
            public_key_id: public_key_id.to_string(),
            session_id: session_id.to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| TokenError::EncodingFailed(e.to_string()))
    }

    /// Verify signature and expiry, returning the claims.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::TokenExpired,
            _ => TokenError::InvalidToken(e.to_string()),
        })?;

        Ok(token_data.claims)
    }

    /// Verify signature, expiry and kind. A refresh token presented where an
    /// access token is expected (or vice versa) is rejected regardless of
    /// signature validity.
    pub fn verify_kind(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        let claims = self.verify(token)?;
        if claims.token_type != kind.as_str() {
            return Err(TokenError::WrongKind {
                expected: kind.as_str(),
            });
        }
        Ok(claims)
    }
}
