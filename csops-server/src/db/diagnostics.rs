//! Diagnostic forms and responses
//!
//! Questions and answers are stored as JSON text.

use csops_common::diagnostic::{FormStatus, Question};
use csops_common::{time, Error, Result};
use serde::Serialize;
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use super::new_id;

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticForm {
    pub id: String,
    pub company_id: String,
    pub title: String,
    pub questions: Vec<Question>,
    pub status: FormStatus,
    pub created_by: Option<String>,
    pub sent_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticResponse {
    pub id: String,
    pub form_id: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub answers: HashMap<String, Value>,
    pub submitted_at: String,
}

const FORM_COLUMNS: &str =
    "id, company_id, title, questions, status, created_by, sent_at, created_at";

fn form_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<DiagnosticForm> {
    let questions: String = row.try_get("questions")?;
    let status: String = row.try_get("status")?;
    Ok(DiagnosticForm {
        id: row.try_get("id")?,
        company_id: row.try_get("company_id")?,
        title: row.try_get("title")?,
        questions: serde_json::from_str(&questions)
            .map_err(|e| Error::Internal(format!("Corrupt questions JSON: {}", e)))?,
        status: status.parse()?,
        created_by: row.try_get("created_by")?,
        sent_at: row.try_get("sent_at")?,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn insert(
    pool: &SqlitePool,
    company_id: &str,
    title: &str,
    questions: &[Question],
    created_by: &str,
) -> Result<DiagnosticForm> {
    let form = DiagnosticForm {
        id: new_id(),
        company_id: company_id.to_string(),
        title: title.trim().to_string(),
        questions: questions.to_vec(),
        status: FormStatus::Draft,
        created_by: Some(created_by.to_string()),
        sent_at: None,
        created_at: time::now_db(),
    };
    let questions_json = serde_json::to_string(&form.questions)
        .map_err(|e| Error::Internal(format!("Failed to serialize questions: {}", e)))?;

    sqlx::query(&format!(
        "INSERT INTO diagnostic_forms ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        FORM_COLUMNS
    ))
    .bind(&form.id)
    .bind(&form.company_id)
    .bind(&form.title)
    .bind(questions_json)
    .bind(form.status.as_str())
    .bind(&form.created_by)
    .bind(&form.sent_at)
    .bind(&form.created_at)
    .execute(pool)
    .await?;

    Ok(form)
}

pub async fn get(pool: &SqlitePool, id: &str) -> Result<Option<DiagnosticForm>> {
    let row = sqlx::query(&format!("SELECT {} FROM diagnostic_forms WHERE id = ?", FORM_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(form_from_row).transpose()
}

pub async fn list_for_company(pool: &SqlitePool, company_id: &str) -> Result<Vec<DiagnosticForm>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM diagnostic_forms WHERE company_id = ? ORDER BY created_at DESC",
        FORM_COLUMNS
    ))
    .bind(company_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(form_from_row).collect()
}

/// DRAFT -> SENT. Returns false if the form was not a draft.
pub async fn mark_sent(pool: &SqlitePool, id: &str, at: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE diagnostic_forms SET status = 'SENT', sent_at = ? WHERE id = ? AND status = 'DRAFT'",
    )
    .bind(at)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn close(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result =
        sqlx::query("UPDATE diagnostic_forms SET status = 'CLOSED' WHERE id = ? AND status = 'SENT'")
            .bind(id)
            .execute(pool)
            .await?;
    Ok(result.rows_affected() > 0)
}

/// Sent forms of a company the user has not answered yet
pub async fn sent_unanswered(
    pool: &SqlitePool,
    company_id: &str,
    user_id: &str,
) -> Result<Vec<DiagnosticForm>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {} FROM diagnostic_forms f
        WHERE f.company_id = ? AND f.status = 'SENT'
          AND NOT EXISTS (SELECT 1 FROM diagnostic_responses r WHERE r.form_id = f.id AND r.user_id = ?)
        ORDER BY f.sent_at
        "#,
        FORM_COLUMNS
    ))
    .bind(company_id)
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(form_from_row).collect()
}

// ========================================
// Responses
// ========================================

fn response_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<DiagnosticResponse> {
    let answers: String = row.try_get("answers")?;
    Ok(DiagnosticResponse {
        id: row.try_get("id")?,
        form_id: row.try_get("form_id")?,
        user_id: row.try_get("user_id")?,
        user_name: row.try_get("user_name")?,
        answers: serde_json::from_str(&answers)
            .map_err(|e| Error::Internal(format!("Corrupt answers JSON: {}", e)))?,
        submitted_at: row.try_get("submitted_at")?,
    })
}

/// Store a response; one per user and form
pub async fn insert_response(
    pool: &SqlitePool,
    form_id: &str,
    user_id: &str,
    answers: &HashMap<String, Value>,
) -> Result<String> {
    let id = new_id();
    let answers_json = serde_json::to_string(answers)
        .map_err(|e| Error::Internal(format!("Failed to serialize answers: {}", e)))?;

    let result = sqlx::query(
        "INSERT INTO diagnostic_responses (id, form_id, user_id, answers, submitted_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(form_id)
    .bind(user_id)
    .bind(answers_json)
    .bind(time::now_db())
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(id),
        Err(e)
            if e.as_database_error()
                .map(|d| d.is_unique_violation())
                .unwrap_or(false) =>
        {
            Err(Error::Conflict("You have already answered this diagnostic".to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn list_responses(pool: &SqlitePool, form_id: &str) -> Result<Vec<DiagnosticResponse>> {
    let rows = sqlx::query(
        r#"
        SELECT r.id, r.form_id, r.user_id, u.name AS user_name, r.answers, r.submitted_at
        FROM diagnostic_responses r LEFT JOIN users u ON u.id = r.user_id
        WHERE r.form_id = ?
        ORDER BY r.submitted_at
        "#,
    )
    .bind(form_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(response_from_row).collect()
}

/// Whether anyone at the company has answered a diagnostic
pub async fn company_has_response(pool: &SqlitePool, company_id: &str) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT 1 FROM diagnostic_responses r
        JOIN diagnostic_forms f ON f.id = r.form_id
        WHERE f.company_id = ? LIMIT 1
        "#,
    )
    .bind(company_id)
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}
