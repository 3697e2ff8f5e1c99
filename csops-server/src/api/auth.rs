//! Session authentication
//!
//! `AuthUser` extracts the caller from `Authorization: Bearer <token>`. The
//! user row is reloaded on every request so deactivation and role changes
//! apply immediately. Browsers' EventSource cannot set headers, so an
//! `access_token` query parameter is accepted as a fallback.

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use csops_common::access::Principal;
use csops_common::auth;

use crate::db::users::{self, User};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// The authenticated caller
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub principal: Principal,
    pub user: User,
}

fn bearer_token(parts: &Parts) -> Option<String> {
    if let Some(value) = parts.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        return value
            .strip_prefix("Bearer ")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
    }

    parts.uri.query().and_then(|q| {
        q.split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == "access_token")
            .map(|(_, v)| v.to_string())
            .filter(|v| !v.is_empty())
    })
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;

        let claims = state.tokens.verify(&token).map_err(|e| {
            debug!("Rejected session token: {}", e);
            ApiError::Unauthorized("Invalid or expired token".to_string())
        })?;

        let user = users::get(&state.db, &claims.sub)
            .await?
            .filter(|u| u.active)
            .ok_or_else(|| ApiError::Unauthorized("Account is not active".to_string()))?;
        let principal = users::principal_for(&state.db, &user).await?;

        Ok(AuthUser { principal, user })
    }
}

/// Token plus the account it belongs to
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    /// Seconds until the token expires
    pub expires_in: i64,
    pub user: User,
}

/// Issue a session token for an active user
pub(crate) async fn start_session(state: &AppState, user: User) -> ApiResult<SessionResponse> {
    let principal = users::principal_for(&state.db, &user).await?;
    let token = state.tokens.issue(&principal)?;
    Ok(SessionResponse {
        token,
        expires_in: state.tokens.ttl().num_seconds(),
        user,
    })
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<SessionResponse>> {
    let invalid = || ApiError::Unauthorized("Invalid email or password".to_string());

    let user = users::find_by_email(&state.db, &req.email)
        .await?
        .ok_or_else(invalid)?;
    if !auth::verify_password(&req.password, &user.password_hash) {
        return Err(invalid());
    }
    if !user.active {
        return Err(ApiError::Unauthorized("Account is not active".to_string()));
    }

    info!(user_id = %user.id, role = %user.role, "User logged in");
    Ok(Json(start_session(&state, user).await?))
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: User,
    pub principal: Principal,
}

/// GET /api/auth/me
pub async fn me(auth: AuthUser) -> Json<MeResponse> {
    Json(MeResponse {
        user: auth.user,
        principal: auth.principal,
    })
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
}
