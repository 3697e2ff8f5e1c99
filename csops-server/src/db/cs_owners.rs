//! CS owner profiles

use csops_common::{time, Result};
use serde::Serialize;
use sqlx::SqlitePool;

use super::new_id;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CsOwner {
    pub id: String,
    pub user_id: String,
    pub title: Option<String>,
    pub name: String,
    pub email: String,
    pub company_count: i64,
    pub created_at: String,
}

const SELECT: &str = r#"
    SELECT o.id, o.user_id, o.title, u.name, u.email, o.created_at,
           (SELECT COUNT(*) FROM companies c WHERE c.cs_owner_id = o.id) AS company_count
    FROM cs_owners o
    JOIN users u ON u.id = o.user_id
"#;

pub async fn list(pool: &SqlitePool) -> Result<Vec<CsOwner>> {
    let owners = sqlx::query_as::<_, CsOwner>(&format!("{} ORDER BY u.name COLLATE NOCASE", SELECT))
        .fetch_all(pool)
        .await?;
    Ok(owners)
}

pub async fn get(pool: &SqlitePool, id: &str) -> Result<Option<CsOwner>> {
    let owner = sqlx::query_as::<_, CsOwner>(&format!("{} WHERE o.id = ?", SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(owner)
}

/// Create the profile; a second profile for the same user violates the
/// unique constraint and surfaces as a conflict
pub async fn insert(pool: &SqlitePool, user_id: &str, title: Option<&str>) -> Result<CsOwner> {
    let id = new_id();
    sqlx::query("INSERT INTO cs_owners (id, user_id, title, created_at) VALUES (?, ?, ?, ?)")
        .bind(&id)
        .bind(user_id)
        .bind(title)
        .bind(time::now_db())
        .execute(pool)
        .await?;

    get(pool, &id)
        .await?
        .ok_or_else(|| csops_common::Error::Internal("Inserted owner not found".to_string()))
}

/// Remove a profile; owned companies keep existing with no owner
pub async fn delete(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM cs_owners WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
