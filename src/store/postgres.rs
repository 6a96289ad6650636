//! PostgreSQL store implementations
//!
//! The database enforces the invariants the orchestrator depends on:
//! conditional updates claim challenges and invalidate sessions, unique
//! constraints keep public keys and nonces singular, and key replacement
//! runs inside one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use super::{ChallengeStore, SessionStore, StoreError, UserStore, DEFAULT_SESSION_TTL_SECONDS};
use crate::models::{
    generate_id, Challenge, ChallengeAction, KeyMetadata, PublicKeyInfo, Session, User,
};

/// Challenge row as stored; `action` is parsed on the way out.
#[derive(sqlx::FromRow)]
struct ChallengeRow {
    id: String,
    nonce: String,
    domain: String,
    action: String,
    public_key: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    used: bool,
}

impl TryFrom<ChallengeRow> for Challenge {
    type Error = StoreError;

    fn try_from(row: ChallengeRow) -> Result<Self, StoreError> {
        let action = ChallengeAction::parse(&row.action)
            .ok_or_else(|| StoreError::Storage(format!("Unknown challenge action: {}", row.action)))?;
        Ok(Challenge {
            id: row.id,
            nonce: row.nonce,
            domain: row.domain,
            action,
            public_key: row.public_key,
            created_at: row.created_at,
            expires_at: row.expires_at,
            used: row.used,
        })
    }
}

/// Challenge store backed by the `challenges` table.
#[derive(Clone)]
pub struct PgChallengeStore {
    pool: PgPool,
}

impl PgChallengeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChallengeStore for PgChallengeStore {
    async fn save(&self, challenge: &Challenge) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO challenges (id, nonce, domain, action, public_key, created_at, expires_at, used)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET used = EXCLUDED.used
            "#,
        )
        .bind(&challenge.id)
        .bind(&challenge.nonce)
        .bind(&challenge.domain)
        .bind(challenge.action.as_str())
        .bind(&challenge.public_key)
        .bind(challenge.created_at)
        .bind(challenge.expires_at)
        .bind(challenge.used)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Challenge>, StoreError> {
        let row: Option<ChallengeRow> = sqlx::query_as(
            r#"
            SELECT id, nonce, domain, action, public_key, created_at, expires_at, used
            FROM challenges
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Challenge::try_from).transpose()
    }

    async fn mark_as_used(&self, id: &str) -> Result<bool, StoreError> {
        // Conditional claim; the row count decides the race
        let rows_affected = sqlx::query(
            r#"
            UPDATE challenges
            SET used = TRUE
            WHERE id = $1 AND used = FALSE
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    async fn is_nonce_used(&self, nonce: &str) -> Result<bool, StoreError> {
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM challenges WHERE nonce = $1 AND used = TRUE")
                .bind(nonce)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.is_some())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM challenges WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn cleanup(&self) -> Result<u64, StoreError> {
        let rows_affected = sqlx::query("DELETE FROM challenges WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }
}

/// User store backed by the `users` and `public_keys` tables.
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn get_public_key(&self, user_id: &str) -> Result<Option<PublicKeyInfo>, StoreError> {
        let key: Option<PublicKeyInfo> = sqlx::query_as(
            r#"
            SELECT id, public_key, device_name, added_at, last_used
            FROM public_keys
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        let row: Option<(String, DateTime<Utc>, Option<DateTime<Utc>>)> =
            sqlx::query_as("SELECT id, created_at, last_login FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        let Some((user_id, created_at, last_login)) = row else {
            return Ok(None);
        };

        // A user without a key row is not addressable
        let Some(public_key) = self.get_public_key(&user_id).await? else {
            return Ok(None);
        };

        Ok(Some(User {
            id: user_id,
            public_key,
            created_at,
            last_login,
        }))
    }

    async fn find_by_public_key(&self, public_key: &str) -> Result<Option<User>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT user_id FROM public_keys WHERE public_key = $1")
                .bind(public_key)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((user_id,)) => self.find_by_id(&user_id).await,
            None => Ok(None),
        }
    }

    async fn create(&self, public_key: &str, metadata: &KeyMetadata) -> Result<User, StoreError> {
        let user_id = generate_id("user");
        let key_id = generate_id("key");
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

        sqlx::query("INSERT INTO users (id, created_at, last_login) VALUES ($1, $2, $2)")
            .bind(&user_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        // The unique constraint on public_key turns a concurrent duplicate
        // registration into StoreError::Duplicate here
        sqlx::query(
            r#"
            INSERT INTO public_keys (id, user_id, public_key, device_name, added_at, last_used)
            VALUES ($1, $2, $3, $4, $5, $5)
            "#,
        )
        .bind(&key_id)
        .bind(&user_id)
        .bind(public_key)
        .bind(&metadata.device_name)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await.map_err(StoreError::from)?;

        Ok(User {
            id: user_id,
            public_key: PublicKeyInfo {
                id: key_id,
                public_key: public_key.to_string(),
                device_name: metadata.device_name.clone(),
                added_at: now,
                last_used: now,
            },
            created_at: now,
            last_login: Some(now),
        })
    }

    async fn update_last_login(&self, user_id: &str, public_key: &str) -> Result<(), StoreError> {
        let now = Utc::now();

        sqlx::query("UPDATE users SET last_login = $1 WHERE id = $2")
            .bind(now)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "UPDATE public_keys SET last_used = $1 WHERE user_id = $2 AND public_key = $3",
        )
        .bind(now)
        .bind(user_id)
        .bind(public_key)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn public_key_exists(&self, public_key: &str) -> Result<bool, StoreError> {
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM public_keys WHERE public_key = $1")
                .bind(public_key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.is_some())
    }

    async fn replace_public_key(
        &self,
        user_id: &str,
        new_public_key: &str,
        metadata: &KeyMetadata,
    ) -> Result<Option<PublicKeyInfo>, StoreError> {
        let key_id = generate_id("key");
        let now = Utc::now();

        // Delete-then-insert must not be observable as a user with zero keys
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

        let user: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;

        if user.is_none() {
            return Ok(None);
        }

        sqlx::query("DELETE FROM public_keys WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO public_keys (id, user_id, public_key, device_name, added_at, last_used)
            VALUES ($1, $2, $3, $4, $5, $5)
            "#,
        )
        .bind(&key_id)
        .bind(user_id)
        .bind(new_public_key)
        .bind(&metadata.device_name)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await.map_err(StoreError::from)?;

        Ok(Some(PublicKeyInfo {
            id: key_id,
            public_key: new_public_key.to_string(),
            device_name: metadata.device_name.clone(),
            added_at: now,
            last_used: now,
        }))
    }
}

/// Session store backed by the `sessions` table.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(
        &self,
        user_id: &str,
        public_key_id: &str,
        ttl_seconds: Option<i64>,
    ) -> Result<Session, StoreError> {
        let session_id = generate_id("ses");
        let now = Utc::now();
        let expires_at = now + Duration::seconds(ttl_seconds.unwrap_or(DEFAULT_SESSION_TTL_SECONDS));

        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, public_key_id, created_at, expires_at, invalidated)
            VALUES ($1, $2, $3, $4, $5, FALSE)
            "#,
        )
        .bind(&session_id)
        .bind(user_id)
        .bind(public_key_id)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(Session {
            id: session_id,
            user_id: user_id.to_string(),
            public_key_id: public_key_id.to_string(),
            created_at: now,
            expires_at,
            invalidated: false,
        })
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let session: Option<Session> = sqlx::query_as(
            r#"
            SELECT id, user_id, public_key_id, created_at, expires_at, invalidated
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn invalidate(&self, id: &str) -> Result<bool, StoreError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE sessions
            SET invalidated = TRUE
            WHERE id = $1 AND invalidated = FALSE
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    async fn invalidate_all_for_user(&self, user_id: &str) -> Result<u64, StoreError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE sessions
            SET invalidated = TRUE
            WHERE user_id = $1 AND invalidated = FALSE
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected)
    }

    async fn is_valid(&self, id: &str) -> Result<bool, StoreError> {
        // Derived in the database so the check and the row agree
        let row: Option<(bool,)> = sqlx::query_as(
            r#"
            SELECT invalidated = FALSE AND expires_at > NOW() AS is_valid
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(valid,)| valid).unwrap_or(false))
    }

    async fn cleanup(&self) -> Result<u64, StoreError> {
        let rows_affected = sqlx::query("DELETE FROM sessions WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }
}
