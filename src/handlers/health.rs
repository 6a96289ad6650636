//! Health probe handlers

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;

use crate::db;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    pub timestamp: String,
    pub version: String,
}

/// GET /health/live - Liveness probe
pub async fn live() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        database: None,
        timestamp: Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /health/ready - Readiness probe (checks the database)
pub async fn ready(State(pool): State<PgPool>) -> (StatusCode, Json<HealthResponse>) {
    let (status_code, status, database) = match db::check_health(&pool).await {
        Ok(()) => (StatusCode::OK, "ok", "connected".to_string()),
        Err(e) => {
            tracing::error!(error = %e, "Readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "not_ready", "error".to_string())
        }
    };

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            database: Some(database),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}
