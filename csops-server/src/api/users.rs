//! Users and invitations

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::info;

use csops_common::{auth, time, Role};

use crate::db::invites::{self, Invite, NewInvite};
use crate::db::users::{self, normalize_email, User};
use crate::db::Visibility;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

use super::auth::{start_session, SessionResponse};
use super::{load_company, optional_text, require_admin, required_text, AuthUser};

// ============================================================================
// Users
// ============================================================================

/// GET /api/users
pub async fn list_users(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<Vec<User>>> {
    let visibility = Visibility::for_principal(&auth.principal);
    let users = users::list(&state.db, &visibility, &auth.principal.user_id).await?;
    Ok(Json(users))
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub role: Option<Role>,
    pub active: Option<bool>,
}

/// PATCH /api/users/:id
pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> ApiResult<Json<User>> {
    require_admin(&auth.principal)?;
    let mut user = users::get(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {}", id)))?;

    if let Some(name) = &req.name {
        user.name = required_text(name, "name")?;
    }
    if let Some(role) = req.role {
        if role.is_client() && user.company_id.is_none() {
            return Err(ApiError::BadRequest(
                "Client roles require the user to belong to a company".to_string(),
            ));
        }
        user.role = role.as_str().to_string();
    }
    if let Some(active) = req.active {
        if !active && user.id == auth.principal.user_id {
            return Err(ApiError::Conflict("You cannot deactivate your own account".to_string()));
        }
        user.active = active;
    }

    users::update(&state.db, &user).await?;
    info!(user_id = %user.id, role = %user.role, active = user.active, "Updated user");
    Ok(Json(user))
}

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/api/users", get(list_users))
        .route("/api/users/:id", patch(update_user))
}

// ============================================================================
// Invites
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateInviteRequest {
    pub email: String,
    pub role: Role,
    pub company_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateInviteResponse {
    #[serde(flatten)]
    pub invite: Invite,
    /// Shared with the invitee out of band
    pub token: String,
}

/// POST /api/invites
pub async fn create_invite(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateInviteRequest>,
) -> ApiResult<(StatusCode, Json<CreateInviteResponse>)> {
    let email = normalize_email(&req.email);
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::BadRequest("A valid email is required".to_string()));
    }

    let company = if req.role.is_client() {
        let company_id = optional_text(req.company_id.as_deref()).ok_or_else(|| {
            ApiError::BadRequest("company_id is required for client roles".to_string())
        })?;
        Some(load_company(&state, &company_id).await?)
    } else {
        None
    };

    let principal = &auth.principal;
    principal.require(
        principal.can_invite(req.role, company.as_ref().map(|c| c.scope())),
        &format!("invite a {} user", req.role),
    )?;

    if users::find_by_email(&state.db, &email).await?.is_some() {
        return Err(ApiError::Conflict(format!("A user with email {} already exists", email)));
    }

    let token = auth::generate_invite_token();
    let expires_at = time::to_db(time::now() + Duration::days(state.config.invite_ttl_days));
    let invite = invites::insert(
        &state.db,
        &NewInvite {
            email: &email,
            role: req.role,
            company_id: company.as_ref().map(|c| c.id.as_str()),
            token: &token,
            invited_by: &principal.user_id,
            expires_at: &expires_at,
        },
    )
    .await?;

    info!(
        invite_id = %invite.id,
        role = %invite.role,
        invited_by = %principal.user_id,
        "Created invite"
    );
    Ok((StatusCode::CREATED, Json(CreateInviteResponse { invite, token })))
}

#[derive(Debug, Serialize)]
pub struct InvitePreview {
    pub email: String,
    pub role: String,
    pub company_name: Option<String>,
    pub expires_at: String,
    pub expired: bool,
    pub accepted: bool,
}

async fn invite_by_token(state: &AppState, token: &str) -> ApiResult<Invite> {
    invites::find_by_token(&state.db, token)
        .await?
        .ok_or_else(|| ApiError::NotFound("Invite not found".to_string()))
}

/// GET /api/invites/:token (public)
pub async fn preview_invite(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<InvitePreview>> {
    let invite = invite_by_token(&state, &token).await?;
    let company_name = match &invite.company_id {
        Some(id) => Some(load_company(&state, id).await?.name),
        None => None,
    };

    Ok(Json(InvitePreview {
        expired: invite.is_expired(&time::now_db()),
        accepted: invite.accepted_at.is_some(),
        email: invite.email,
        role: invite.role,
        company_name,
        expires_at: invite.expires_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AcceptInviteRequest {
    pub name: String,
    pub password: String,
}

/// POST /api/invites/:token/accept (public)
pub async fn accept_invite(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(req): Json<AcceptInviteRequest>,
) -> ApiResult<(StatusCode, Json<SessionResponse>)> {
    let invite = invite_by_token(&state, &token).await?;
    if invite.accepted_at.is_some() {
        return Err(ApiError::Conflict("Invite has already been accepted".to_string()));
    }
    if invite.is_expired(&time::now_db()) {
        return Err(ApiError::Gone("Invite has expired".to_string()));
    }

    let name = required_text(&req.name, "name")?;
    auth::validate_password(&req.password)?;
    if users::find_by_email(&state.db, &invite.email).await?.is_some() {
        return Err(ApiError::Conflict(format!(
            "A user with email {} already exists",
            invite.email
        )));
    }

    let password_hash = auth::hash_password(&req.password)?;
    let user_id = invites::accept(&state.db, &invite, &name, &password_hash).await?;
    let user = users::get(&state.db, &user_id)
        .await?
        .ok_or_else(|| ApiError::Internal("Accepted user not found".to_string()))?;

    info!(user_id = %user.id, role = %user.role, "Invite accepted");
    Ok((StatusCode::CREATED, Json(start_session(&state, user).await?)))
}

pub fn invite_routes() -> Router<AppState> {
    Router::new()
        .route("/api/invites", post(create_invite))
        .route("/api/invites/:token", get(preview_invite))
        .route("/api/invites/:token/accept", post(accept_invite))
}
