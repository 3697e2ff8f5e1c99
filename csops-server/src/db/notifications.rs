//! Per-user notifications

use csops_common::{time, Result};
use serde::Serialize;
use sqlx::{QueryBuilder, SqlitePool};

use super::new_id;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
    pub read_at: Option<String>,
    pub created_at: String,
}

pub async fn insert(
    pool: &SqlitePool,
    user_id: &str,
    kind: &str,
    title: &str,
    body: &str,
    link: Option<&str>,
) -> Result<Notification> {
    let notification = Notification {
        id: new_id(),
        user_id: user_id.to_string(),
        kind: kind.to_string(),
        title: title.to_string(),
        body: body.to_string(),
        link: link.map(str::to_string),
        read_at: None,
        created_at: time::now_db(),
    };

    sqlx::query(
        "INSERT INTO notifications (id, user_id, kind, title, body, link, read_at, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&notification.id)
    .bind(&notification.user_id)
    .bind(&notification.kind)
    .bind(&notification.title)
    .bind(&notification.body)
    .bind(&notification.link)
    .bind(&notification.read_at)
    .bind(&notification.created_at)
    .execute(pool)
    .await?;

    Ok(notification)
}

/// Newest first
pub async fn list_for_user(
    pool: &SqlitePool,
    user_id: &str,
    unread_only: bool,
    limit: i64,
) -> Result<Vec<Notification>> {
    let mut qb = QueryBuilder::new(
        "SELECT id, user_id, kind, title, body, link, read_at, created_at \
         FROM notifications WHERE user_id = ",
    );
    qb.push_bind(user_id.to_string());
    if unread_only {
        qb.push(" AND read_at IS NULL");
    }
    qb.push(" ORDER BY created_at DESC, id LIMIT ").push_bind(limit);
    let rows = qb.build_query_as::<Notification>().fetch_all(pool).await?;
    Ok(rows)
}

pub async fn unread_count(pool: &SqlitePool, user_id: &str) -> Result<i64> {
    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND read_at IS NULL",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Mark one of the user's notifications read; false if it is not theirs
pub async fn mark_read(pool: &SqlitePool, id: &str, user_id: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE notifications SET read_at = COALESCE(read_at, ?) WHERE id = ? AND user_id = ?",
    )
    .bind(time::now_db())
    .bind(id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn mark_all_read(pool: &SqlitePool, user_id: &str) -> Result<u64> {
    let result =
        sqlx::query("UPDATE notifications SET read_at = ? WHERE user_id = ? AND read_at IS NULL")
            .bind(time::now_db())
            .bind(user_id)
            .execute(pool)
            .await?;
    Ok(result.rows_affected())
}
