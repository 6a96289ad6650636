//! Storage capability traits for the core protocol entities
//!
//! Stores are specified as traits so the Postgres implementations can be
//! swapped for in-memory fakes in tests. All cross-request invariants
//! (challenge single-use, key uniqueness, session validity) are enforced by
//! the implementations with atomic conditional operations, never by separate
//! read-then-write calls in callers.

mod memory;
mod postgres;

pub use memory::{MemoryChallengeStore, MemorySessionStore, MemoryUserStore};
pub use postgres::{PgChallengeStore, PgSessionStore, PgUserStore};

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Challenge, KeyMetadata, PublicKeyInfo, Session, User};

/// Errors surfaced by store implementations
#[derive(Error, Debug)]
pub enum StoreError {
    /// A unique constraint rejected the write (e.g. public key already bound)
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Storage failure: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::Duplicate(db_err.constraint().unwrap_or("unknown").to_string())
            }
            _ => StoreError::Storage(err.to_string()),
        }
    }
}

/// Persists one-time challenges and enforces single redemption.
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Idempotent upsert keyed by id. State transitions go through
    /// [`mark_as_used`](ChallengeStore::mark_as_used), not this call.
    async fn save(&self, challenge: &Challenge) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Challenge>, StoreError>;

    /// Atomic claim: transitions `used` false to true and reports whether a
    /// row was affected. Returns false if already used or absent. The boolean
    /// is the sole source of truth for "did I win the race".
    async fn mark_as_used(&self, id: &str) -> Result<bool, StoreError>;

    /// True iff some challenge with this nonce has `used = TRUE`.
    async fn is_nonce_used(&self, nonce: &str) -> Result<bool, StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Remove rows past their expiry; safe to run alongside live traffic.
    async fn cleanup(&self) -> Result<u64, StoreError>;
}

/// Persists users and their single active public key.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_public_key(&self, public_key: &str) -> Result<Option<User>, StoreError>;

    /// Creates a user owning `public_key`. The store's unique constraint
    /// rejects a key already bound to any user with [`StoreError::Duplicate`].
    async fn create(&self, public_key: &str, metadata: &KeyMetadata) -> Result<User, StoreError>;

    /// Updates the user's last login and the matching key's last-used time.
    /// No-op when the key does not match.
    async fn update_last_login(&self, user_id: &str, public_key: &str) -> Result<(), StoreError>;

    async fn public_key_exists(&self, public_key: &str) -> Result<bool, StoreError>;

    /// Destructive rotation: deletes the prior key row and inserts a fresh
    /// one, atomically. Returns `None` for an unknown user.
    async fn replace_public_key(
        &self,
        user_id: &str,
        new_public_key: &str,
        metadata: &KeyMetadata,
    ) -> Result<Option<PublicKeyInfo>, StoreError>;
}

/// Persists sessions and derives their validity server-side.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates a session expiring after `ttl_seconds` (30 days when omitted).
    async fn create(
        &self,
        user_id: &str,
        public_key_id: &str,
        ttl_seconds: Option<i64>,
    ) -> Result<Session, StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Session>, StoreError>;

    /// Returns whether a live row was invalidated; false for absent rows.
    async fn invalidate(&self, id: &str) -> Result<bool, StoreError>;

    /// Bulk logout-everywhere. Returns the number of sessions invalidated.
    async fn invalidate_all_for_user(&self, user_id: &str) -> Result<u64, StoreError>;

    /// Re-derives `!invalidated && expires_at > now` from the row. Token
    /// possession alone is never trusted.
    async fn is_valid(&self, id: &str) -> Result<bool, StoreError>;

    /// Remove rows past their expiry; invalidated-but-unexpired rows stay.
    async fn cleanup(&self) -> Result<u64, StoreError>;
}

/// Default session lifetime when callers do not specify one.
pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
