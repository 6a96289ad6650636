//! KeyGate server binary.
//!
//! Wires configuration, the Postgres-backed stores, the Ed25519 verifier
//! and the token issuer into an [`AuthService`], then serves the HTTP API
//! with graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use axum::Router;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};

use keygate_backend::auth::{AuthService, Ed25519Verifier, TokenIssuer};
use keygate_backend::cleanup;
use keygate_backend::config::Config;
use keygate_backend::db;
use keygate_backend::routes::{auth_routes, health_routes};
use keygate_backend::state::AppState;
use keygate_backend::store::{PgChallengeStore, PgSessionStore, PgUserStore};

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .init();

    tracing::info!(
        environment = config.environment.as_str(),
        "Starting KeyGate server"
    );

    let pool = match db::create_pool(&config).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            std::process::exit(1);
        }
    };

    if let Err(e) = db::run_migrations(&pool).await {
        tracing::error!(error = %e, "Failed to run migrations");
        std::process::exit(1);
    }

    let challenges = Arc::new(PgChallengeStore::new(pool.clone()));
    let sessions = Arc::new(PgSessionStore::new(pool.clone()));
    let users = Arc::new(PgUserStore::new(pool.clone()));

    let tokens = TokenIssuer::new(
        config.jwt_secret.clone(),
        config.access_token_ttl_seconds,
        config.refresh_token_ttl_seconds,
    );

    let auth_service = Arc::new(AuthService::new(
        (&config).into(),
        users,
        challenges.clone(),
        sessions.clone(),
        Arc::new(Ed25519Verifier),
        tokens,
    ));

    // Periodic sweep of expired challenges and sessions
    tokio::spawn(cleanup::run_cleanup_loop(
        challenges,
        sessions,
        Duration::from_secs(config.cleanup_interval_seconds),
    ));

    let app_state = AppState::new(auth_service, pool);

    let app = Router::new()
        .merge(auth_routes())
        .merge(health_routes())
        .with_state(app_state)
        .layer(configure_cors(config.cors_allowed_origins.as_deref()));

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, "Failed to bind {}", addr);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }

    tracing::info!("Server shutdown complete");
}

fn configure_cors(allowed_origins: Option<&str>) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .unwrap_or_default()
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    if origins.is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    }

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
