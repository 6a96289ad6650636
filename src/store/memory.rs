//! In-memory store implementations
//!
//! Back the integration tests (and local experiments) without a Postgres
//! instance. Each store guards its map with a single mutex, so the claim
//! operations observe the same atomicity the SQL conditional updates provide.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use super::{ChallengeStore, SessionStore, StoreError, UserStore, DEFAULT_SESSION_TTL_SECONDS};
use crate::models::{generate_id, Challenge, KeyMetadata, PublicKeyInfo, Session, User};

/// In-memory challenge store.
#[derive(Default)]
pub struct MemoryChallengeStore {
    challenges: Mutex<HashMap<String, Challenge>>,
}

impl MemoryChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn save(&self, challenge: &Challenge) -> Result<(), StoreError> {
        let mut challenges = self.challenges.lock().unwrap();

        // Nonce uniqueness matches the database constraint
        if challenges
            .values()
            .any(|c| c.id != challenge.id && c.nonce == challenge.nonce)
        {
            return Err(StoreError::Duplicate("challenges_nonce_key".to_string()));
        }

        challenges.insert(challenge.id.clone(), challenge.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Challenge>, StoreError> {
        let challenges = self.challenges.lock().unwrap();
        Ok(challenges.get(id).cloned())
    }

    async fn mark_as_used(&self, id: &str) -> Result<bool, StoreError> {
        let mut challenges = self.challenges.lock().unwrap();
        match challenges.get_mut(id) {
            Some(challenge) if !challenge.used => {
                challenge.used = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_nonce_used(&self, nonce: &str) -> Result<bool, StoreError> {
        let challenges = self.challenges.lock().unwrap();
        Ok(challenges.values().any(|c| c.nonce == nonce && c.used))
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut challenges = self.challenges.lock().unwrap();
        challenges.remove(id);
        Ok(())
    }

    async fn cleanup(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut challenges = self.challenges.lock().unwrap();
        let before = challenges.len();
        challenges.retain(|_, c| c.expires_at >= now);
        Ok((before - challenges.len()) as u64)
    }
}

/// In-memory user store. One map entry per user; key uniqueness is checked
/// under the same lock that inserts.
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<String, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().unwrap();
        Ok(users.get(id).cloned())
    }

    async fn find_by_public_key(&self, public_key: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().unwrap();
        Ok(users
            .values()
            .find(|u| u.public_key.public_key == public_key)
            .cloned())
    }

    async fn create(&self, public_key: &str, metadata: &KeyMetadata) -> Result<User, StoreError> {
        let mut users = self.users.lock().unwrap();

        if users.values().any(|u| u.public_key.public_key == public_key) {
            return Err(StoreError::Duplicate("public_keys_public_key_key".to_string()));
        }

        let now = Utc::now();
        let user = User {
            id: generate_id("user"),
            public_key: PublicKeyInfo {
                id: generate_id("key"),
                public_key: public_key.to_string(),
                device_name: metadata.device_name.clone(),
                added_at: now,
                last_used: now,
            },
            created_at: now,
            last_login: Some(now),
        };

        users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn update_last_login(&self, user_id: &str, public_key: &str) -> Result<(), StoreError> {
        let mut users = self.users.lock().unwrap();
        if let Some(user) = users.get_mut(user_id) {
            let now = Utc::now();
            user.last_login = Some(now);
            if user.public_key.public_key == public_key {
                user.public_key.last_used = now;
            }
        }
        Ok(())
    }

    async fn public_key_exists(&self, public_key: &str) -> Result<bool, StoreError> {
        let users = self.users.lock().unwrap();
        Ok(users.values().any(|u| u.public_key.public_key == public_key))
    }

    async fn replace_public_key(
        &self,
        user_id: &str,
        new_public_key: &str,
        metadata: &KeyMetadata,
    ) -> Result<Option<PublicKeyInfo>, StoreError> {
        let mut users = self.users.lock().unwrap();

        if users
            .values()
            .any(|u| u.id != user_id && u.public_key.public_key == new_public_key)
        {
            return Err(StoreError::Duplicate(
                "public_keys_public_key_key".to_string(),
            ));
        }

        let Some(user) = users.get_mut(user_id) else {
            return Ok(None);
        };

        let now = Utc::now();
        let key_info = PublicKeyInfo {
            id: generate_id("key"),
            public_key: new_public_key.to_string(),
            device_name: metadata.device_name.clone(),
            added_at: now,
            last_used: now,
        };
        user.public_key = key_info.clone();

        Ok(Some(key_info))
    }
}

/// In-memory session store.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(
        &self,
        user_id: &str,
        public_key_id: &str,
        ttl_seconds: Option<i64>,
    ) -> Result<Session, StoreError> {
        let now = Utc::now();
        let session = Session {
            id: generate_id("ses"),
            user_id: user_id.to_string(),
            public_key_id: public_key_id.to_string(),
            created_at: now,
            expires_at: now
                + Duration::seconds(ttl_seconds.unwrap_or(DEFAULT_SESSION_TTL_SECONDS)),
            invalidated: false,
        };

        let mut sessions = self.sessions.lock().unwrap();
        sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions.get(id).cloned())
    }

    async fn invalidate(&self, id: &str) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get_mut(id) {
            Some(session) if !session.invalidated => {
                session.invalidated = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn invalidate_all_for_user(&self, user_id: &str) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        let mut count = 0;
        for session in sessions.values_mut() {
            if session.user_id == user_id && !session.invalidated {
                session.invalidated = true;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn is_valid(&self, id: &str) -> Result<bool, StoreError> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions
            .get(id)
            .map(|s| s.is_valid(Utc::now()))
            .unwrap_or(false))
    }

    async fn cleanup(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at >= now);
        Ok((before - sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChallengeAction;

    fn sample_challenge(ttl_seconds: i64) -> Challenge {
        let now = Utc::now();
        Challenge {
            id: generate_id("chl"),
            nonce: generate_id("nonce"),
            domain: "example.com".to_string(),
            action: ChallengeAction::Login,
            public_key: None,
            created_at: now,
            expires_at: now + Duration::seconds(ttl_seconds),
            used: false,
        }
    }

    #[tokio::test]
    async fn test_mark_as_used_claims_once() {
        let store = MemoryChallengeStore::new();
        let challenge = sample_challenge(300);
        store.save(&challenge).await.unwrap();

        assert!(store.mark_as_used(&challenge.id).await.unwrap());
        assert!(!store.mark_as_used(&challenge.id).await.unwrap());
        assert!(!store.mark_as_used("chl_missing").await.unwrap());

        assert!(store.is_nonce_used(&challenge.nonce).await.unwrap());
        assert!(!store.is_nonce_used("other-nonce").await.unwrap());
    }

    #[tokio::test]
    async fn test_save_rejects_reused_nonce() {
        let store = MemoryChallengeStore::new();
        let first = sample_challenge(300);
        store.save(&first).await.unwrap();

        // Same nonce under a different id is a duplicate
        let mut second = sample_challenge(300);
        second.nonce = first.nonce.clone();
        assert!(matches!(
            store.save(&second).await,
            Err(StoreError::Duplicate(_))
        ));

        // Re-saving the same row is still an upsert
        let mut updated = first.clone();
        updated.used = true;
        store.save(&updated).await.unwrap();
        assert!(store.find_by_id(&first.id).await.unwrap().unwrap().used);
    }

    #[tokio::test]
    async fn test_challenge_cleanup_keeps_live_rows() {
        let store = MemoryChallengeStore::new();
        let live = sample_challenge(300);
        let expired = sample_challenge(-1);
        store.save(&live).await.unwrap();
        store.save(&expired).await.unwrap();

        assert_eq!(store.cleanup().await.unwrap(), 1);
        assert!(store.find_by_id(&live.id).await.unwrap().is_some());
        assert!(store.find_by_id(&expired.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_user_key_uniqueness() {
        let store = MemoryUserStore::new();
        let metadata = KeyMetadata::default();
        store.create("key-a", &metadata).await.unwrap();

        assert!(matches!(
            store.create("key-a", &metadata).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_replace_public_key() {
        let store = MemoryUserStore::new();
        let metadata = KeyMetadata::default();
        let user = store.create("key-a", &metadata).await.unwrap();
        let other = store.create("key-b", &metadata).await.unwrap();

        // Unknown user
        assert!(store
            .replace_public_key("user_missing", "key-c", &metadata)
            .await
            .unwrap()
            .is_none());

        // A key bound to another user is rejected
        assert!(matches!(
            store.replace_public_key(&user.id, "key-b", &metadata).await,
            Err(StoreError::Duplicate(_))
        ));

        // Rotation discards the old row and mints a fresh key id
        let replaced = store
            .replace_public_key(&user.id, "key-c", &metadata)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(replaced.id, user.public_key.id);
        assert!(!store.public_key_exists("key-a").await.unwrap());
        assert!(store.public_key_exists("key-c").await.unwrap());

        // The other user is untouched
        let other = store.find_by_id(&other.id).await.unwrap().unwrap();
        assert_eq!(other.public_key.public_key, "key-b");
    }

    #[tokio::test]
    async fn test_session_invalidation() {
        let store = MemorySessionStore::new();
        let session = store.create("user_1", "key_1", Some(3600)).await.unwrap();

        assert!(store.is_valid(&session.id).await.unwrap());
        assert!(store.invalidate(&session.id).await.unwrap());
        assert!(!store.is_valid(&session.id).await.unwrap());

        // Second invalidation reports no live row
        assert!(!store.invalidate(&session.id).await.unwrap());
        assert!(!store.invalidate("ses_missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalidate_all_for_user() {
        let store = MemorySessionStore::new();
        let a = store.create("user_1", "key_1", None).await.unwrap();
        let b = store.create("user_1", "key_1", None).await.unwrap();
        let other = store.create("user_2", "key_2", None).await.unwrap();

        assert_eq!(store.invalidate_all_for_user("user_1").await.unwrap(), 2);
        assert!(!store.is_valid(&a.id).await.unwrap());
        assert!(!store.is_valid(&b.id).await.unwrap());
        assert!(store.is_valid(&other.id).await.unwrap());

        // Already-invalidated rows are not recounted
        assert_eq!(store.invalidate_all_for_user("user_1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_session_is_invalid_before_cleanup() {
        let store = MemorySessionStore::new();
        let session = store.create("user_1", "key_1", Some(-1)).await.unwrap();

        assert!(!store.is_valid(&session.id).await.unwrap());
        assert_eq!(store.cleanup().await.unwrap(), 1);
        assert!(store.find_by_id(&session.id).await.unwrap().is_none());
    }
}
