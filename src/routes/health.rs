//! Health probe routes

use axum::{routing::get, Router};

use crate::handlers::health;
use crate::state::AppState;

/// Create health probe routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
}
