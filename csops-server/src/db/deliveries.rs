//! Deliveries and everything hanging off them: dependencies, comments,
//! documents and linked meetings

use chrono::NaiveDate;
use csops_common::delivery::{DeliveryStatus, WorkflowState};
use csops_common::health::DeliveryCounts;
use csops_common::{time, Result};
use serde::Serialize;
use sqlx::{QueryBuilder, SqlitePool};

use super::{new_id, Visibility};

const COLUMNS: &str = "id, company_id, title, description, status, admin_approval, \
                       client_approval, progress, due_date, blocked_reason, completed_at, \
                       created_by, created_at, updated_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Delivery {
    pub id: String,
    pub company_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub admin_approval: String,
    pub client_approval: String,
    pub progress: i64,
    pub due_date: Option<String>,
    pub blocked_reason: Option<String>,
    pub completed_at: Option<String>,
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Delivery {
    pub fn status(&self) -> Result<DeliveryStatus> {
        self.status.parse()
    }

    /// Workflow fields as domain types
    pub fn workflow(&self) -> Result<WorkflowState> {
        Ok(WorkflowState {
            status: self.status.parse()?,
            admin_approval: self.admin_approval.parse()?,
            client_approval: self.client_approval.parse()?,
            progress: self.progress,
            blocked_reason: self.blocked_reason.clone(),
            completed_at: self.completed_at.clone(),
        })
    }

    /// Copy a workflow state back into the row
    pub fn apply(&mut self, state: &WorkflowState) {
        self.status = state.status.as_str().to_string();
        self.admin_approval = state.admin_approval.as_str().to_string();
        self.client_approval = state.client_approval.as_str().to_string();
        self.progress = state.progress;
        self.blocked_reason = state.blocked_reason.clone();
        self.completed_at = state.completed_at.clone();
    }

    /// Not completed and past its due date
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status != DeliveryStatus::Completed.as_str()
            && self
                .due_date
                .as_deref()
                .and_then(time::parse_date)
                .map(|due| due < today)
                .unwrap_or(false)
    }
}

pub struct NewDelivery<'a> {
    pub company_id: &'a str,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub due_date: Option<&'a str>,
    pub created_by: Option<&'a str>,
}

pub async fn insert(pool: &SqlitePool, new: &NewDelivery<'_>) -> Result<Delivery> {
    let state = WorkflowState::new();
    let now = time::now_db();
    let delivery = Delivery {
        id: new_id(),
        company_id: new.company_id.to_string(),
        title: new.title.trim().to_string(),
        description: new.description.map(str::to_string),
        status: state.status.as_str().to_string(),
        admin_approval: state.admin_approval.as_str().to_string(),
        client_approval: state.client_approval.as_str().to_string(),
        progress: state.progress,
        due_date: new.due_date.map(str::to_string),
        blocked_reason: None,
        completed_at: None,
        created_by: new.created_by.map(str::to_string),
        created_at: now.clone(),
        updated_at: now,
    };

    sqlx::query(&format!(
        "INSERT INTO deliveries ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        COLUMNS
    ))
    .bind(&delivery.id)
    .bind(&delivery.company_id)
    .bind(&delivery.title)
    .bind(&delivery.description)
    .bind(&delivery.status)
    .bind(&delivery.admin_approval)
    .bind(&delivery.client_approval)
    .bind(delivery.progress)
    .bind(&delivery.due_date)
    .bind(&delivery.blocked_reason)
    .bind(&delivery.completed_at)
    .bind(&delivery.created_by)
    .bind(&delivery.created_at)
    .bind(&delivery.updated_at)
    .execute(pool)
    .await?;

    Ok(delivery)
}

pub async fn get(pool: &SqlitePool, id: &str) -> Result<Option<Delivery>> {
    let delivery = sqlx::query_as::<_, Delivery>(&format!(
        "SELECT {} FROM deliveries WHERE id = ?",
        COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(delivery)
}

pub async fn list_for_company(
    pool: &SqlitePool,
    company_id: &str,
    status: Option<DeliveryStatus>,
) -> Result<Vec<Delivery>> {
    let mut qb = QueryBuilder::new(format!(
        "SELECT {} FROM deliveries WHERE company_id = ",
        COLUMNS
    ));
    qb.push_bind(company_id.to_string());
    if let Some(status) = status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    qb.push(" ORDER BY due_date IS NULL, due_date, created_at");
    let rows = qb.build_query_as::<Delivery>().fetch_all(pool).await?;
    Ok(rows)
}

/// Persist every mutable column
pub async fn save(pool: &SqlitePool, delivery: &Delivery) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE deliveries SET
            title = ?, description = ?, status = ?, admin_approval = ?, client_approval = ?,
            progress = ?, due_date = ?, blocked_reason = ?, completed_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&delivery.title)
    .bind(&delivery.description)
    .bind(&delivery.status)
    .bind(&delivery.admin_approval)
    .bind(&delivery.client_approval)
    .bind(delivery.progress)
    .bind(&delivery.due_date)
    .bind(&delivery.blocked_reason)
    .bind(&delivery.completed_at)
    .bind(time::now_db())
    .bind(&delivery.id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM deliveries WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Delivery counts feeding the health score
pub async fn counts_for_company(
    pool: &SqlitePool,
    company_id: &str,
    today: NaiveDate,
) -> Result<DeliveryCounts> {
    let (total, completed, in_progress, blocked, overdue): (i64, i64, i64, i64, i64) =
        sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(status = 'COMPLETED'), 0),
                   COALESCE(SUM(status = 'IN_PROGRESS'), 0),
                   COALESCE(SUM(status = 'BLOCKED'), 0),
                   COALESCE(SUM(status != 'COMPLETED' AND due_date IS NOT NULL AND due_date < ?), 0)
            FROM deliveries WHERE company_id = ?
            "#,
        )
        .bind(today.format("%Y-%m-%d").to_string())
        .bind(company_id)
        .fetch_one(pool)
        .await?;

    Ok(DeliveryCounts {
        total,
        completed,
        in_progress,
        blocked,
        overdue,
    })
}

pub async fn has_completed(pool: &SqlitePool, company_id: &str) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM deliveries WHERE company_id = ? AND status = 'COMPLETED' LIMIT 1",
    )
    .bind(company_id)
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

/// Deliveries per status across the visible companies
pub async fn count_by_status(pool: &SqlitePool, visibility: &Visibility) -> Result<Vec<(String, i64)>> {
    let mut qb = QueryBuilder::new("SELECT status, COUNT(*) FROM deliveries WHERE 1 = 1");
    visibility.push_filter(&mut qb, "company_id");
    qb.push(" GROUP BY status");
    let rows: Vec<(String, i64)> = qb.build_query_as().fetch_all(pool).await?;
    Ok(rows)
}

/// Overdue deliveries across the visible companies
pub async fn overdue(pool: &SqlitePool, visibility: &Visibility, today: NaiveDate) -> Result<Vec<Delivery>> {
    let mut qb = QueryBuilder::new(format!(
        "SELECT {} FROM deliveries WHERE status != 'COMPLETED' AND due_date IS NOT NULL AND due_date < ",
        COLUMNS
    ));
    qb.push_bind(today.format("%Y-%m-%d").to_string());
    visibility.push_filter(&mut qb, "company_id");
    qb.push(" ORDER BY due_date");
    let rows = qb.build_query_as::<Delivery>().fetch_all(pool).await?;
    Ok(rows)
}

/// Deliveries waiting on the given approval side
pub async fn awaiting_approval(
    pool: &SqlitePool,
    visibility: &Visibility,
    client_side: bool,
) -> Result<Vec<Delivery>> {
    let condition = if client_side {
        "admin_approval = 'APPROVED' AND client_approval = 'PENDING'"
    } else {
        "admin_approval = 'PENDING'"
    };
    let mut qb = QueryBuilder::new(format!(
        "SELECT {} FROM deliveries WHERE status = 'IN_PROGRESS' AND {}",
        COLUMNS, condition
    ));
    visibility.push_filter(&mut qb, "company_id");
    qb.push(" ORDER BY updated_at");
    let rows = qb.build_query_as::<Delivery>().fetch_all(pool).await?;
    Ok(rows)
}

/// Open (not completed) deliveries of a company
pub async fn open_for_company(pool: &SqlitePool, company_id: &str) -> Result<Vec<Delivery>> {
    let rows = sqlx::query_as::<_, Delivery>(&format!(
        "SELECT {} FROM deliveries WHERE company_id = ? AND status != 'COMPLETED' ORDER BY created_at",
        COLUMNS
    ))
    .bind(company_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ========================================
// Dependencies
// ========================================

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Dependency {
    pub depends_on_id: String,
    pub title: String,
    pub status: String,
    pub satisfied: bool,
}

/// All dependency edges among a company's deliveries
pub async fn dependency_edges(pool: &SqlitePool, company_id: &str) -> Result<Vec<(String, String)>> {
    let edges = sqlx::query_as(
        r#"
        SELECT dd.delivery_id, dd.depends_on_id
        FROM delivery_dependencies dd
        JOIN deliveries d ON d.id = dd.delivery_id
        WHERE d.company_id = ?
        "#,
    )
    .bind(company_id)
    .fetch_all(pool)
    .await?;
    Ok(edges)
}

pub async fn dependencies_of(pool: &SqlitePool, delivery_id: &str) -> Result<Vec<Dependency>> {
    let deps = sqlx::query_as::<_, Dependency>(
        r#"
        SELECT dd.depends_on_id, d.title, d.status, d.status = 'COMPLETED' AS satisfied
        FROM delivery_dependencies dd
        JOIN deliveries d ON d.id = dd.depends_on_id
        WHERE dd.delivery_id = ?
        ORDER BY dd.created_at
        "#,
    )
    .bind(delivery_id)
    .fetch_all(pool)
    .await?;
    Ok(deps)
}

pub async fn dependencies_satisfied(pool: &SqlitePool, delivery_id: &str) -> Result<bool> {
    let unfinished: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM delivery_dependencies dd
        JOIN deliveries d ON d.id = dd.depends_on_id
        WHERE dd.delivery_id = ? AND d.status != 'COMPLETED'
        "#,
    )
    .bind(delivery_id)
    .fetch_one(pool)
    .await?;
    Ok(unfinished == 0)
}

pub async fn add_dependency(pool: &SqlitePool, delivery_id: &str, depends_on_id: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO delivery_dependencies (delivery_id, depends_on_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(delivery_id)
    .bind(depends_on_id)
    .bind(time::now_db())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn remove_dependency(pool: &SqlitePool, delivery_id: &str, depends_on_id: &str) -> Result<bool> {
    let result =
        sqlx::query("DELETE FROM delivery_dependencies WHERE delivery_id = ? AND depends_on_id = ?")
            .bind(delivery_id)
            .bind(depends_on_id)
            .execute(pool)
            .await?;
    Ok(result.rows_affected() > 0)
}

// ========================================
// Comments
// ========================================

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Comment {
    pub id: String,
    pub delivery_id: String,
    pub author_id: Option<String>,
    pub author_name: Option<String>,
    pub author_role: Option<String>,
    pub body: String,
    pub created_at: String,
}

pub async fn insert_comment(
    pool: &SqlitePool,
    delivery_id: &str,
    author_id: &str,
    body: &str,
) -> Result<Comment> {
    let id = new_id();
    sqlx::query(
        "INSERT INTO delivery_comments (id, delivery_id, author_id, body, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(delivery_id)
    .bind(author_id)
    .bind(body.trim())
    .bind(time::now_db())
    .execute(pool)
    .await?;

    let comment = sqlx::query_as::<_, Comment>(
        r#"
        SELECT c.id, c.delivery_id, c.author_id, u.name AS author_name, u.role AS author_role,
               c.body, c.created_at
        FROM delivery_comments c LEFT JOIN users u ON u.id = c.author_id
        WHERE c.id = ?
        "#,
    )
    .bind(&id)
    .fetch_one(pool)
    .await?;
    Ok(comment)
}

pub async fn list_comments(pool: &SqlitePool, delivery_id: &str) -> Result<Vec<Comment>> {
    let comments = sqlx::query_as::<_, Comment>(
        r#"
        SELECT c.id, c.delivery_id, c.author_id, u.name AS author_name, u.role AS author_role,
               c.body, c.created_at
        FROM delivery_comments c LEFT JOIN users u ON u.id = c.author_id
        WHERE c.delivery_id = ?
        ORDER BY c.created_at, c.id
        "#,
    )
    .bind(delivery_id)
    .fetch_all(pool)
    .await?;
    Ok(comments)
}

// ========================================
// Documents
// ========================================

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Document {
    pub id: String,
    pub delivery_id: String,
    pub file_name: String,
    pub storage_key: String,
    pub content_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub status: String,
    pub uploaded_by: Option<String>,
    pub created_at: String,
}

const DOCUMENT_COLUMNS: &str =
    "id, delivery_id, file_name, storage_key, content_type, size_bytes, status, uploaded_by, created_at";

pub struct NewDocument<'a> {
    pub id: &'a str,
    pub delivery_id: &'a str,
    pub file_name: &'a str,
    pub storage_key: &'a str,
    pub content_type: Option<&'a str>,
    pub size_bytes: Option<i64>,
    /// PENDING until the bytes are known to be stored
    pub status: &'a str,
    pub uploaded_by: &'a str,
}

pub async fn insert_document(pool: &SqlitePool, new: &NewDocument<'_>) -> Result<Document> {
    sqlx::query(&format!(
        "INSERT INTO delivery_documents ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        DOCUMENT_COLUMNS
    ))
    .bind(new.id)
    .bind(new.delivery_id)
    .bind(new.file_name)
    .bind(new.storage_key)
    .bind(new.content_type)
    .bind(new.size_bytes)
    .bind(new.status)
    .bind(new.uploaded_by)
    .bind(time::now_db())
    .execute(pool)
    .await?;

    get_document(pool, new.id)
        .await?
        .ok_or_else(|| csops_common::Error::Internal("Inserted document not found".to_string()))
}

pub async fn get_document(pool: &SqlitePool, id: &str) -> Result<Option<Document>> {
    let doc = sqlx::query_as::<_, Document>(&format!(
        "SELECT {} FROM delivery_documents WHERE id = ?",
        DOCUMENT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(doc)
}

pub async fn list_documents(pool: &SqlitePool, delivery_id: &str) -> Result<Vec<Document>> {
    let docs = sqlx::query_as::<_, Document>(&format!(
        "SELECT {} FROM delivery_documents WHERE delivery_id = ? ORDER BY created_at",
        DOCUMENT_COLUMNS
    ))
    .bind(delivery_id)
    .fetch_all(pool)
    .await?;
    Ok(docs)
}

pub async fn mark_document_uploaded(pool: &SqlitePool, id: &str) -> Result<()> {
    sqlx::query("UPDATE delivery_documents SET status = 'UPLOADED' WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_document(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM delivery_documents WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ========================================
// Meetings
// ========================================

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MeetingLink {
    pub id: String,
    pub delivery_id: String,
    pub provider: String,
    pub booking_id: String,
    pub created_at: String,
}

pub async fn link_meeting(
    pool: &SqlitePool,
    delivery_id: &str,
    provider: &str,
    booking_id: &str,
) -> Result<MeetingLink> {
    let link = MeetingLink {
        id: new_id(),
        delivery_id: delivery_id.to_string(),
        provider: provider.to_string(),
        booking_id: booking_id.to_string(),
        created_at: time::now_db(),
    };
    sqlx::query(
        "INSERT INTO delivery_meetings (id, delivery_id, provider, booking_id, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&link.id)
    .bind(&link.delivery_id)
    .bind(&link.provider)
    .bind(&link.booking_id)
    .bind(&link.created_at)
    .execute(pool)
    .await?;
    Ok(link)
}

pub async fn list_meetings(pool: &SqlitePool, delivery_id: &str) -> Result<Vec<MeetingLink>> {
    let links = sqlx::query_as::<_, MeetingLink>(
        "SELECT id, delivery_id, provider, booking_id, created_at FROM delivery_meetings \
         WHERE delivery_id = ? ORDER BY created_at",
    )
    .bind(delivery_id)
    .fetch_all(pool)
    .await?;
    Ok(links)
}
