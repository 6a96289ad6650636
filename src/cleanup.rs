//! Background sweep of expired challenge and session rows.
//!
//! Expired rows carry no authority (expiry is re-checked on every read), so
//! this loop is purely housekeeping: idempotent and safe to run alongside
//! live traffic.

use std::sync::Arc;
use std::time::Duration;

use crate::store::{ChallengeStore, SessionStore};

/// Run the cleanup loop, sweeping once per `interval`.
pub async fn run_cleanup_loop(
    challenges: Arc<dyn ChallengeStore>,
    sessions: Arc<dyn SessionStore>,
    interval: Duration,
) {
    loop {
        tokio::time::sleep(interval).await;

        match challenges.cleanup().await {
            Ok(count) if count > 0 => {
                tracing::info!(count, "Removed expired challenges");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Challenge cleanup failed"),
        }

        match sessions.cleanup().await {
            Ok(count) if count > 0 => {
                tracing::info!(count, "Removed expired sessions");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Session cleanup failed"),
        }
    }
}
