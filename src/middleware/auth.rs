//! Authentication middleware
//!
//! Extractor gating protected endpoints: verifies the bearer access token
//! and re-checks session validity against the store, so a token outstanding
//! after logout is rejected before its signature expires.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::Serialize;
use std::sync::Arc;

use crate::auth::AuthService;

/// Authenticated caller extracted from a verified access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub public_key_id: String,
    pub session_id: String,
}

/// Error response for authentication failures.
///
/// All failure modes share one shape and message; which precondition failed
/// (missing header, bad signature, expiry, invalidated session) is not
/// distinguishable from outside.
#[derive(Debug, Serialize)]
struct AuthRejection {
    error: AuthRejectionDetails,
}

#[derive(Debug, Serialize)]
struct AuthRejectionDetails {
    code: String,
    message: String,
}

impl AuthRejection {
    fn unauthorized() -> Response {
        let body = AuthRejection {
            error: AuthRejectionDetails {
                code: "UNAUTHORIZED".to_string(),
                message: "Authentication required".to_string(),
            },
        };
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<AuthService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AuthRejection::unauthorized())?;

        let auth_service = Arc::<AuthService>::from_ref(state);

        let claims = auth_service
            .authenticate(bearer.token())
            .await
            .map_err(|e| {
                tracing::debug!(error = %e, "Request authentication failed");
                AuthRejection::unauthorized()
            })?;

        Ok(AuthenticatedUser {
            user_id: claims.sub,
            public_key_id: claims.public_key_id,
            session_id: claims.session_id,
        })
    }
}
