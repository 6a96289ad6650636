//! Authentication module for KeyGate
//!
//! Single-public-key challenge-response authentication:
//! - One-time challenges bound to a domain and an action
//! - Proof-of-possession signature verification
//! - JWT access/refresh pairs and session management

mod crypto;
mod service;
mod tokens;

pub use crypto::{CryptoError, Ed25519Verifier, SignatureVerifier};
pub use service::{AuthConfig, AuthError, AuthService};
pub use tokens::{Claims, TokenError, TokenIssuer, TokenKind};
