//! KeyGate: challenge-response authentication backend.
//!
//! Users authenticate by proving possession of an Ed25519 private key:
//! the server issues a one-time challenge, the client signs its nonce,
//! and the server verifies the signature against the stored public key
//! before opening a session and issuing a JWT token pair.

pub mod auth;
pub mod cleanup;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;
