//! Authentication HTTP handlers
//!
//! Endpoints for challenge-response authentication. Handlers validate the
//! request shape, delegate to the orchestrator and map its errors onto the
//! API error taxonomy.

use axum::{extract::State, http::StatusCode, Json};
use validator::Validate;

use crate::error::ApiError;
use crate::middleware::AuthenticatedUser;
use crate::models::{
    AuthResponse, ChallengeRequest, ChallengeResponse, RefreshRequest, RegisterRequest, TokenPair,
    User, VerifyRequest,
};
use crate::state::AppState;

/// POST /api/v1/auth/challenge - Request a one-time challenge
pub async fn create_challenge(
    State(state): State<AppState>,
    Json(req): Json<ChallengeRequest>,
) -> Result<Json<ChallengeResponse>, ApiError> {
    req.validate()?;

    let challenge = state.auth_service.create_challenge(&req).await?;
    Ok(Json(challenge))
}

/// POST /api/v1/auth/register - Redeem a registration challenge
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    req.validate()?;

    let response = state.auth_service.register(&req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/v1/auth/verify - Redeem a login challenge
pub async fn verify(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    req.validate()?;

    let response = state.auth_service.verify(&req).await?;
    Ok(Json(response))
}

/// POST /api/v1/auth/refresh - Mint a fresh token pair
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    req.validate()?;

    let pair = state.auth_service.refresh(&req.refresh_token).await?;
    Ok(Json(pair))
}

/// POST /api/v1/auth/logout - Invalidate the current session
pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<StatusCode, ApiError> {
    state.auth_service.logout(&user.session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, serde::Serialize)]
pub struct LogoutAllResponse {
    pub invalidated_sessions: u64,
}

/// POST /api/v1/auth/logout-all - Invalidate every session of the caller
pub async fn logout_all(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<LogoutAllResponse>, ApiError> {
    let invalidated_sessions = state.auth_service.logout_all(&user.user_id).await?;
    Ok(Json(LogoutAllResponse {
        invalidated_sessions,
    }))
}

/// GET /api/v1/auth/user - Current authenticated user
pub async fn get_current_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<User>, ApiError> {
    let user = state
        .auth_service
        .get_user(&user.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(Json(user))
}
