//! CS owner profiles

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use csops_common::Role;

use crate::db::cs_owners::{self, CsOwner};
use crate::db::users;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

use super::{optional_text, require_admin, require_internal, AuthUser};

/// GET /api/cs-owners
pub async fn list_owners(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<Vec<CsOwner>>> {
    require_internal(&auth.principal)?;
    Ok(Json(cs_owners::list(&state.db).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateOwnerRequest {
    pub user_id: String,
    pub title: Option<String>,
}

/// POST /api/cs-owners
///
/// Binds an existing CS_OWNER user to an owner profile.
pub async fn create_owner(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateOwnerRequest>,
) -> ApiResult<(StatusCode, Json<CsOwner>)> {
    require_admin(&auth.principal)?;
    let user = users::get(&state.db, &req.user_id)
        .await?
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown user {}", req.user_id)))?;
    if user.role()? != Role::CsOwner {
        return Err(ApiError::BadRequest(format!(
            "User {} has role {}, expected CS_OWNER",
            user.id, user.role
        )));
    }

    let owner = cs_owners::insert(&state.db, &user.id, optional_text(req.title.as_deref()).as_deref())
        .await
        .map_err(|e| match ApiError::from(e) {
            ApiError::Conflict(_) => ApiError::Conflict("User already has an owner profile".to_string()),
            other => other,
        })?;

    info!(cs_owner_id = %owner.id, user_id = %user.id, "Created CS owner profile");
    Ok((StatusCode::CREATED, Json(owner)))
}

/// DELETE /api/cs-owners/:id
pub async fn delete_owner(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    require_admin(&auth.principal)?;
    if !cs_owners::delete(&state.db, &id).await? {
        return Err(ApiError::NotFound(format!("CS owner {}", id)));
    }
    info!(cs_owner_id = %id, "Deleted CS owner profile");
    Ok(StatusCode::NO_CONTENT)
}

pub fn cs_owner_routes() -> Router<AppState> {
    Router::new()
        .route("/api/cs-owners", get(list_owners).post(create_owner))
        .route("/api/cs-owners/:id", delete(delete_owner))
}
