//! Database initialization
//!
//! Creates the database file on first run and brings the schema up to date.
//! Every statement is idempotent (`CREATE ... IF NOT EXISTS`), so this runs
//! unconditionally at startup.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::Result;

/// Schema version recorded in the settings table
pub const SCHEMA_VERSION: i64 = 1;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database (tests and local tooling)
///
/// The pool never recycles its connection: dropping it would drop the data.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables and indexes
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES ('schema_version', ?)")
        .bind(SCHEMA_VERSION.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Read a value from the settings table
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

/// Insert or replace a value in the settings table
pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS companies (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        domain TEXT,
        cs_owner_id TEXT REFERENCES cs_owners(id) ON DELETE SET NULL,
        health_score INTEGER NOT NULL DEFAULT 60,
        health_status TEXT NOT NULL DEFAULT 'ATTENTION',
        health_updated_at TEXT,
        onboarding_step TEXT NOT NULL DEFAULT 'WELCOME',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_companies_owner ON companies(cs_owner_id)",
    "CREATE INDEX IF NOT EXISTS idx_companies_domain ON companies(domain)",
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        password_hash TEXT NOT NULL,
        role TEXT NOT NULL,
        company_id TEXT REFERENCES companies(id) ON DELETE CASCADE,
        active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_users_company ON users(company_id)",
    r#"
    CREATE TABLE IF NOT EXISTS cs_owners (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
        title TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS invites (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL,
        role TEXT NOT NULL,
        company_id TEXT REFERENCES companies(id) ON DELETE CASCADE,
        token TEXT NOT NULL UNIQUE,
        invited_by TEXT REFERENCES users(id) ON DELETE SET NULL,
        expires_at TEXT NOT NULL,
        accepted_at TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS deliveries (
        id TEXT PRIMARY KEY,
        company_id TEXT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        description TEXT,
        status TEXT NOT NULL DEFAULT 'PENDING',
        admin_approval TEXT NOT NULL DEFAULT 'NOT_REQUESTED',
        client_approval TEXT NOT NULL DEFAULT 'NOT_REQUESTED',
        progress INTEGER NOT NULL DEFAULT 0,
        due_date TEXT,
        blocked_reason TEXT,
        completed_at TEXT,
        created_by TEXT REFERENCES users(id) ON DELETE SET NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_deliveries_company ON deliveries(company_id, status)",
    r#"
    CREATE TABLE IF NOT EXISTS delivery_dependencies (
        delivery_id TEXT NOT NULL REFERENCES deliveries(id) ON DELETE CASCADE,
        depends_on_id TEXT NOT NULL REFERENCES deliveries(id) ON DELETE CASCADE,
        created_at TEXT NOT NULL,
        PRIMARY KEY (delivery_id, depends_on_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS delivery_comments (
        id TEXT PRIMARY KEY,
        delivery_id TEXT NOT NULL REFERENCES deliveries(id) ON DELETE CASCADE,
        author_id TEXT REFERENCES users(id) ON DELETE SET NULL,
        body TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_comments_delivery ON delivery_comments(delivery_id, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS delivery_documents (
        id TEXT PRIMARY KEY,
        delivery_id TEXT NOT NULL REFERENCES deliveries(id) ON DELETE CASCADE,
        file_name TEXT NOT NULL,
        storage_key TEXT NOT NULL UNIQUE,
        content_type TEXT,
        size_bytes INTEGER,
        status TEXT NOT NULL DEFAULT 'PENDING',
        uploaded_by TEXT REFERENCES users(id) ON DELETE SET NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS delivery_meetings (
        id TEXT PRIMARY KEY,
        delivery_id TEXT NOT NULL REFERENCES deliveries(id) ON DELETE CASCADE,
        provider TEXT NOT NULL,
        booking_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (delivery_id, provider, booking_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS surveys (
        id TEXT PRIMARY KEY,
        company_id TEXT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
        kind TEXT NOT NULL,
        title TEXT NOT NULL,
        status TEXT NOT NULL,
        delivery_id TEXT REFERENCES deliveries(id) ON DELETE CASCADE,
        send_at TEXT,
        opened_at TEXT,
        closed_at TEXT,
        created_by TEXT REFERENCES users(id) ON DELETE SET NULL,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_surveys_company ON surveys(company_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_surveys_due ON surveys(status, send_at)",
    r#"
    CREATE TABLE IF NOT EXISTS survey_responses (
        id TEXT PRIMARY KEY,
        survey_id TEXT NOT NULL REFERENCES surveys(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        score INTEGER NOT NULL,
        comment TEXT,
        created_at TEXT NOT NULL,
        UNIQUE (survey_id, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS diagnostic_forms (
        id TEXT PRIMARY KEY,
        company_id TEXT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        questions TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'DRAFT',
        created_by TEXT REFERENCES users(id) ON DELETE SET NULL,
        sent_at TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS diagnostic_responses (
        id TEXT PRIMARY KEY,
        form_id TEXT NOT NULL REFERENCES diagnostic_forms(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        answers TEXT NOT NULL,
        submitted_at TEXT NOT NULL,
        UNIQUE (form_id, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS notifications (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        kind TEXT NOT NULL,
        title TEXT NOT NULL,
        body TEXT NOT NULL,
        link TEXT,
        read_at TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, read_at)",
    r#"
    CREATE TABLE IF NOT EXISTS ai_insights (
        id TEXT PRIMARY KEY,
        company_id TEXT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
        source TEXT NOT NULL,
        source_id TEXT,
        model TEXT NOT NULL,
        content TEXT NOT NULL,
        created_by TEXT REFERENCES users(id) ON DELETE SET NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS calcom_bookings (
        id TEXT PRIMARY KEY,
        uid TEXT NOT NULL UNIQUE,
        company_id TEXT REFERENCES companies(id) ON DELETE SET NULL,
        title TEXT NOT NULL,
        start_time TEXT NOT NULL,
        end_time TEXT NOT NULL,
        status TEXT NOT NULL,
        attendee_email TEXT,
        attendee_name TEXT,
        meeting_url TEXT,
        recording_url TEXT,
        summary TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_calcom_company ON calcom_bookings(company_id, start_time)",
    r#"
    CREATE TABLE IF NOT EXISTS calendly_bookings (
        id TEXT PRIMARY KEY,
        invitee_uri TEXT NOT NULL UNIQUE,
        event_uri TEXT NOT NULL,
        company_id TEXT REFERENCES companies(id) ON DELETE SET NULL,
        title TEXT NOT NULL,
        start_time TEXT NOT NULL,
        end_time TEXT NOT NULL,
        status TEXT NOT NULL,
        attendee_email TEXT,
        attendee_name TEXT,
        meeting_url TEXT,
        recording_url TEXT,
        summary TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_calendly_company ON calendly_bookings(company_id, start_time)",
];
