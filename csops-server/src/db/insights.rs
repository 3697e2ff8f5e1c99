//! Stored AI insights

use csops_common::{time, Error, Result};
use serde::Serialize;
use serde_json::Value;
use sqlx::{Row, SqlitePool};

use super::new_id;

#[derive(Debug, Clone, Serialize)]
pub struct Insight {
    pub id: String,
    pub company_id: String,
    /// DIAGNOSTIC or COMPANY
    pub source: String,
    pub source_id: Option<String>,
    pub model: String,
    pub content: Value,
    pub created_by: Option<String>,
    pub created_at: String,
}

pub async fn insert(
    pool: &SqlitePool,
    company_id: &str,
    source: &str,
    source_id: Option<&str>,
    model: &str,
    content: &Value,
    created_by: &str,
) -> Result<Insight> {
    let insight = Insight {
        id: new_id(),
        company_id: company_id.to_string(),
        source: source.to_string(),
        source_id: source_id.map(str::to_string),
        model: model.to_string(),
        content: content.clone(),
        created_by: Some(created_by.to_string()),
        created_at: time::now_db(),
    };

    sqlx::query(
        "INSERT INTO ai_insights (id, company_id, source, source_id, model, content, created_by, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&insight.id)
    .bind(&insight.company_id)
    .bind(&insight.source)
    .bind(&insight.source_id)
    .bind(&insight.model)
    .bind(content.to_string())
    .bind(&insight.created_by)
    .bind(&insight.created_at)
    .execute(pool)
    .await?;

    Ok(insight)
}

pub async fn list_for_company(pool: &SqlitePool, company_id: &str) -> Result<Vec<Insight>> {
    let rows = sqlx::query(
        "SELECT id, company_id, source, source_id, model, content, created_by, created_at \
         FROM ai_insights WHERE company_id = ? ORDER BY created_at DESC",
    )
    .bind(company_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let content: String = row.try_get("content")?;
            Ok(Insight {
                id: row.try_get("id")?,
                company_id: row.try_get("company_id")?,
                source: row.try_get("source")?,
                source_id: row.try_get("source_id")?,
                model: row.try_get("model")?,
                content: serde_json::from_str(&content)
                    .map_err(|e| Error::Internal(format!("Corrupt insight JSON: {}", e)))?,
                created_by: row.try_get("created_by")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect()
}
