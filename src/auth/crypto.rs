//! Proof-of-possession signature verification
//!
//! The core consumes this capability through the [`SignatureVerifier`] trait;
//! the production implementation verifies ed25519 signatures over the
//! challenge nonce, with keys and signatures carried as base64 strings.

use base64::{engine::general_purpose, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use thiserror::Error;

/// Errors that can occur during signature verification
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid signature format: {0}")]
    InvalidSignatureFormat(String),

    #[error("Signature verification failed")]
    VerificationFailed,
}

/// Proves possession of the private key matching a claimed public key.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, public_key: &str, message: &str, signature: &str) -> Result<(), CryptoError>;
}

/// ed25519 verifier over base64-encoded keys and signatures.
#[derive(Debug, Default, Clone)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(
        &self,
        public_key: &str,
        message: &str,
        signature_base64: &str,
    ) -> Result<(), CryptoError> {
        let key_bytes = base64_decode(public_key)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        let key_bytes: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey("Expected 32 key bytes".to_string()))?;

        let signature_bytes = base64_decode(signature_base64)
            .map_err(|e| CryptoError::InvalidSignatureFormat(e.to_string()))?;
        let signature = Signature::from_slice(&signature_bytes)
            .map_err(|e| CryptoError::InvalidSignatureFormat(e.to_string()))?;

        let verifying_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;

        verifying_key
            .verify(message.as_bytes(), &signature)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

/// Decode standard or URL-safe base64, with or without padding.
fn base64_decode(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let trimmed = encoded.trim().trim_end_matches('=');
    if trimmed.contains('-') || trimmed.contains('_') {
        general_purpose::URL_SAFE_NO_PAD.decode(trimmed)
    } else {
        general_purpose::STANDARD_NO_PAD.decode(trimmed)
    }
}
