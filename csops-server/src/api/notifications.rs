//! The caller's notifications

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::notifications::{self, Notification};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

use super::AuthUser;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct NotificationList {
    pub notifications: Vec<Notification>,
    pub unread_count: i64,
}

/// GET /api/notifications
pub async fn list_notifications(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<NotificationList>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let user_id = &auth.principal.user_id;
    Ok(Json(NotificationList {
        notifications: notifications::list_for_user(&state.db, user_id, query.unread_only, limit).await?,
        unread_count: notifications::unread_count(&state.db, user_id).await?,
    }))
}

#[derive(Debug, Serialize)]
pub struct ReadResult {
    pub marked: u64,
    pub unread_count: i64,
}

/// POST /api/notifications/:id/read
pub async fn mark_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<ReadResult>> {
    let user_id = &auth.principal.user_id;
    // Someone else's notification looks the same as a missing one
    if !notifications::mark_read(&state.db, &id, user_id).await? {
        return Err(ApiError::NotFound(format!("Notification {}", id)));
    }
    Ok(Json(ReadResult {
        marked: 1,
        unread_count: notifications::unread_count(&state.db, user_id).await?,
    }))
}

/// POST /api/notifications/read-all
pub async fn mark_all_read(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<ReadResult>> {
    let marked = notifications::mark_all_read(&state.db, &auth.principal.user_id).await?;
    Ok(Json(ReadResult {
        marked,
        unread_count: 0,
    }))
}

pub fn notification_routes() -> Router<AppState> {
    Router::new()
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/read-all", post(mark_all_read))
        .route("/api/notifications/:id/read", post(mark_read))
}
