//! Surveys and survey responses

use csops_common::survey::{SurveyKind, SurveyStatus};
use csops_common::{time, Result};
use serde::Serialize;
use sqlx::SqlitePool;

use super::new_id;

const COLUMNS: &str = "id, company_id, kind, title, status, delivery_id, send_at, opened_at, \
                       closed_at, created_by, created_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Survey {
    pub id: String,
    pub company_id: String,
    pub kind: String,
    pub title: String,
    pub status: String,
    pub delivery_id: Option<String>,
    pub send_at: Option<String>,
    pub opened_at: Option<String>,
    pub closed_at: Option<String>,
    pub created_by: Option<String>,
    pub created_at: String,
}

impl Survey {
    pub fn kind(&self) -> Result<SurveyKind> {
        self.kind.parse()
    }

    pub fn status(&self) -> Result<SurveyStatus> {
        self.status.parse()
    }
}

pub struct NewSurvey<'a> {
    pub company_id: &'a str,
    pub kind: SurveyKind,
    pub title: &'a str,
    pub status: SurveyStatus,
    pub delivery_id: Option<&'a str>,
    pub send_at: Option<&'a str>,
    pub created_by: Option<&'a str>,
}

pub async fn insert(pool: &SqlitePool, new: &NewSurvey<'_>) -> Result<Survey> {
    let now = time::now_db();
    let survey = Survey {
        id: new_id(),
        company_id: new.company_id.to_string(),
        kind: new.kind.as_str().to_string(),
        title: new.title.trim().to_string(),
        status: new.status.as_str().to_string(),
        delivery_id: new.delivery_id.map(str::to_string),
        send_at: new.send_at.map(str::to_string),
        opened_at: (new.status == SurveyStatus::Open).then(|| now.clone()),
        closed_at: None,
        created_by: new.created_by.map(str::to_string),
        created_at: now,
    };

    sqlx::query(&format!(
        "INSERT INTO surveys ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        COLUMNS
    ))
    .bind(&survey.id)
    .bind(&survey.company_id)
    .bind(&survey.kind)
    .bind(&survey.title)
    .bind(&survey.status)
    .bind(&survey.delivery_id)
    .bind(&survey.send_at)
    .bind(&survey.opened_at)
    .bind(&survey.closed_at)
    .bind(&survey.created_by)
    .bind(&survey.created_at)
    .execute(pool)
    .await?;

    Ok(survey)
}

pub async fn get(pool: &SqlitePool, id: &str) -> Result<Option<Survey>> {
    let survey = sqlx::query_as::<_, Survey>(&format!("SELECT {} FROM surveys WHERE id = ?", COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(survey)
}

pub async fn list_for_company(pool: &SqlitePool, company_id: &str) -> Result<Vec<Survey>> {
    let surveys = sqlx::query_as::<_, Survey>(&format!(
        "SELECT {} FROM surveys WHERE company_id = ? ORDER BY created_at DESC",
        COLUMNS
    ))
    .bind(company_id)
    .fetch_all(pool)
    .await?;
    Ok(surveys)
}

/// SCHEDULED -> OPEN. Returns false when the survey was no longer scheduled.
pub async fn open(pool: &SqlitePool, id: &str, at: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE surveys SET status = 'OPEN', opened_at = ? WHERE id = ? AND status = 'SCHEDULED'",
    )
    .bind(at)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Close a survey that is not already closed
pub async fn close(pool: &SqlitePool, id: &str, at: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE surveys SET status = 'CLOSED', closed_at = ? WHERE id = ? AND status != 'CLOSED'",
    )
    .bind(at)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Scheduled surveys whose send time has passed
pub async fn due_scheduled(pool: &SqlitePool, now: &str) -> Result<Vec<Survey>> {
    let surveys = sqlx::query_as::<_, Survey>(&format!(
        "SELECT {} FROM surveys WHERE status = 'SCHEDULED' AND send_at IS NOT NULL AND send_at <= ? \
         ORDER BY send_at",
        COLUMNS
    ))
    .bind(now)
    .fetch_all(pool)
    .await?;
    Ok(surveys)
}

/// Drop a delivery's adoption check that has not been sent yet
pub async fn delete_scheduled_for_delivery(pool: &SqlitePool, delivery_id: &str) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM surveys WHERE delivery_id = ? AND kind = 'ADOPTION' AND status = 'SCHEDULED'",
    )
    .bind(delivery_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Open surveys of a company the user has not answered yet
pub async fn open_unanswered(pool: &SqlitePool, company_id: &str, user_id: &str) -> Result<Vec<Survey>> {
    let surveys = sqlx::query_as::<_, Survey>(&format!(
        r#"
        SELECT {} FROM surveys s
        WHERE s.company_id = ? AND s.status = 'OPEN'
          AND NOT EXISTS (SELECT 1 FROM survey_responses r WHERE r.survey_id = s.id AND r.user_id = ?)
        ORDER BY s.opened_at
        "#,
        COLUMNS
    ))
    .bind(company_id)
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(surveys)
}

// ========================================
// Responses
// ========================================

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SurveyResponse {
    pub id: String,
    pub survey_id: String,
    pub user_id: String,
    pub score: i64,
    pub comment: Option<String>,
    pub created_at: String,
}

/// Store a response; a second one from the same user is a conflict
pub async fn insert_response(
    pool: &SqlitePool,
    survey_id: &str,
    user_id: &str,
    score: i64,
    comment: Option<&str>,
) -> Result<SurveyResponse> {
    let response = SurveyResponse {
        id: new_id(),
        survey_id: survey_id.to_string(),
        user_id: user_id.to_string(),
        score,
        comment: comment
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string),
        created_at: time::now_db(),
    };

    let result = sqlx::query(
        "INSERT INTO survey_responses (id, survey_id, user_id, score, comment, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&response.id)
    .bind(&response.survey_id)
    .bind(&response.user_id)
    .bind(response.score)
    .bind(&response.comment)
    .bind(&response.created_at)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(response),
        Err(e)
            if e.as_database_error()
                .map(|d| d.is_unique_violation())
                .unwrap_or(false) =>
        {
            Err(csops_common::Error::Conflict(
                "You have already answered this survey".to_string(),
            ))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn scores(pool: &SqlitePool, survey_id: &str) -> Result<Vec<i64>> {
    let scores = sqlx::query_scalar("SELECT score FROM survey_responses WHERE survey_id = ?")
        .bind(survey_id)
        .fetch_all(pool)
        .await?;
    Ok(scores)
}

/// Scores of a company's responses of `kind` given at or after `since`
pub async fn company_scores_since(
    pool: &SqlitePool,
    company_id: &str,
    kind: SurveyKind,
    since: Option<&str>,
) -> Result<Vec<i64>> {
    let scores = sqlx::query_scalar(
        r#"
        SELECT r.score FROM survey_responses r
        JOIN surveys s ON s.id = r.survey_id
        WHERE s.company_id = ? AND s.kind = ? AND (? IS NULL OR r.created_at >= ?)
        "#,
    )
    .bind(company_id)
    .bind(kind.as_str())
    .bind(since)
    .bind(since)
    .fetch_all(pool)
    .await?;
    Ok(scores)
}

/// Most recent free-text comments left on a company's surveys
pub async fn recent_comments(pool: &SqlitePool, company_id: &str, limit: i64) -> Result<Vec<(String, i64, String)>> {
    let rows = sqlx::query_as(
        r#"
        SELECT s.kind, r.score, r.comment FROM survey_responses r
        JOIN surveys s ON s.id = r.survey_id
        WHERE s.company_id = ? AND r.comment IS NOT NULL
        ORDER BY r.created_at DESC LIMIT ?
        "#,
    )
    .bind(company_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
