//! Database initialization tests
//!
//! Exercise schema creation against file-backed and in-memory databases.

use csops_common::db::{self, init_database, init_memory_database};
use sqlx::Row;
use tempfile::TempDir;

async fn table_names(pool: &sqlx::SqlitePool) -> Vec<String> {
    sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .fetch_all(pool)
        .await
        .unwrap()
        .iter()
        .map(|row| row.get::<String, _>("name"))
        .collect()
}

#[tokio::test]
async fn test_creates_database_file_and_parent_dirs() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("csops.db");

    let pool = init_database(&db_path).await.unwrap();
    assert!(db_path.exists());

    let tables = table_names(&pool).await;
    for expected in [
        "companies",
        "users",
        "cs_owners",
        "deliveries",
        "delivery_dependencies",
        "surveys",
        "survey_responses",
        "notifications",
        "calcom_bookings",
        "calendly_bookings",
        "invites",
        "settings",
    ] {
        assert!(tables.iter().any(|t| t == expected), "missing table {}", expected);
    }
}

#[tokio::test]
async fn test_reopen_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("csops.db");

    let pool = init_database(&db_path).await.unwrap();
    sqlx::query(
        "INSERT INTO companies (id, name, created_at, updated_at) VALUES ('c1', 'Acme', 'x', 'x')",
    )
    .execute(&pool)
    .await
    .unwrap();
    pool.close().await;

    let pool = init_database(&db_path).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM companies")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_schema_version_recorded() {
    let pool = init_memory_database().await.unwrap();
    let version = db::get_setting(&pool, "schema_version").await.unwrap();
    assert_eq!(version, Some(db::SCHEMA_VERSION.to_string()));

    db::set_setting(&pool, "schema_version", "99").await.unwrap();
    assert_eq!(
        db::get_setting(&pool, "schema_version").await.unwrap().as_deref(),
        Some("99")
    );
}

#[tokio::test]
async fn test_company_defaults() {
    let pool = init_memory_database().await.unwrap();
    sqlx::query(
        "INSERT INTO companies (id, name, created_at, updated_at) VALUES ('c1', 'Acme', 'x', 'x')",
    )
    .execute(&pool)
    .await
    .unwrap();

    let row = sqlx::query(
        "SELECT health_score, health_status, onboarding_step FROM companies WHERE id = 'c1'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(row.get::<i64, _>("health_score"), 60);
    assert_eq!(row.get::<String, _>("health_status"), "ATTENTION");
    assert_eq!(row.get::<String, _>("onboarding_step"), "WELCOME");
}

#[tokio::test]
async fn test_company_delete_cascades() {
    let pool = init_memory_database().await.unwrap();
    sqlx::query(
        "INSERT INTO companies (id, name, created_at, updated_at) VALUES ('c1', 'Acme', 'x', 'x')",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO deliveries (id, company_id, title, created_at, updated_at)
         VALUES ('d1', 'c1', 'Kickoff deck', 'x', 'x')",
    )
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query("DELETE FROM companies WHERE id = 'c1'")
        .execute(&pool)
        .await
        .unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deliveries")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_foreign_keys_enforced() {
    let pool = init_memory_database().await.unwrap();
    let result = sqlx::query(
        "INSERT INTO deliveries (id, company_id, title, created_at, updated_at)
         VALUES ('d1', 'missing', 'Orphan', 'x', 'x')",
    )
    .execute(&pool)
    .await;
    assert!(result.is_err());
}
