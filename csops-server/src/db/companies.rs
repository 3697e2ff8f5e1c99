//! Company records

use csops_common::access::CompanyScope;
use csops_common::health::HealthStatus;
use csops_common::onboarding::OnboardingStep;
use csops_common::{time, Result};
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::{new_id, Visibility};

const COLUMNS: &str = "id, name, domain, cs_owner_id, health_score, health_status, \
                       health_updated_at, onboarding_step, created_at, updated_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Company {
    pub id: String,
    pub name: String,
    pub domain: Option<String>,
    pub cs_owner_id: Option<String>,
    pub health_score: i64,
    pub health_status: String,
    pub health_updated_at: Option<String>,
    pub onboarding_step: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Company {
    pub fn scope(&self) -> CompanyScope<'_> {
        CompanyScope {
            company_id: &self.id,
            cs_owner_id: self.cs_owner_id.as_deref(),
        }
    }

    pub fn onboarding(&self) -> Result<OnboardingStep> {
        self.onboarding_step.parse()
    }
}

/// List filters beyond visibility
#[derive(Debug, Clone, Default)]
pub struct CompanyFilter {
    pub health_status: Option<HealthStatus>,
    /// Case-insensitive substring of the name
    pub q: Option<String>,
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, visibility: &Visibility, filter: &CompanyFilter) {
    visibility.push_filter(qb, "id");
    if let Some(status) = filter.health_status {
        qb.push(" AND health_status = ").push_bind(status.as_str());
    }
    if let Some(q) = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        qb.push(" AND name LIKE ")
            .push_bind(format!("%{}%", q.replace('%', "\\%").replace('_', "\\_")))
            .push(" ESCAPE '\\'");
    }
}

/// Count visible companies matching the filter
pub async fn count(pool: &SqlitePool, visibility: &Visibility, filter: &CompanyFilter) -> Result<i64> {
    let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM companies WHERE 1 = 1");
    push_filters(&mut qb, visibility, filter);
    let total: i64 = qb.build_query_scalar().fetch_one(pool).await?;
    Ok(total)
}

/// One page of visible companies, ordered by name
pub async fn list(
    pool: &SqlitePool,
    visibility: &Visibility,
    filter: &CompanyFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<Company>> {
    let mut qb = QueryBuilder::new(format!("SELECT {} FROM companies WHERE 1 = 1", COLUMNS));
    push_filters(&mut qb, visibility, filter);
    qb.push(" ORDER BY name COLLATE NOCASE, id LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);
    let rows = qb.build_query_as::<Company>().fetch_all(pool).await?;
    Ok(rows)
}

/// Every visible company (dashboards)
pub async fn list_all(pool: &SqlitePool, visibility: &Visibility) -> Result<Vec<Company>> {
    list(pool, visibility, &CompanyFilter::default(), i64::MAX, 0).await
}

pub async fn get(pool: &SqlitePool, id: &str) -> Result<Option<Company>> {
    let company = sqlx::query_as::<_, Company>(&format!(
        "SELECT {} FROM companies WHERE id = ?",
        COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(company)
}

/// Company whose domain matches (case-insensitive)
pub async fn find_by_domain(pool: &SqlitePool, domain: &str) -> Result<Option<Company>> {
    let company = sqlx::query_as::<_, Company>(&format!(
        "SELECT {} FROM companies WHERE lower(domain) = lower(?) ORDER BY created_at LIMIT 1",
        COLUMNS
    ))
    .bind(domain)
    .fetch_optional(pool)
    .await?;
    Ok(company)
}

pub async fn insert(
    pool: &SqlitePool,
    name: &str,
    domain: Option<&str>,
    cs_owner_id: Option<&str>,
) -> Result<Company> {
    let now = time::now_db();
    let company = Company {
        id: new_id(),
        name: name.to_string(),
        domain: domain.map(str::to_string),
        cs_owner_id: cs_owner_id.map(str::to_string),
        health_score: csops_common::health::NEUTRAL_SCORE,
        health_status: HealthStatus::from_score(csops_common::health::NEUTRAL_SCORE)
            .as_str()
            .to_string(),
        health_updated_at: None,
        onboarding_step: OnboardingStep::Welcome.as_str().to_string(),
        created_at: now.clone(),
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO companies (id, name, domain, cs_owner_id, health_score, health_status,
                               onboarding_step, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&company.id)
    .bind(&company.name)
    .bind(&company.domain)
    .bind(&company.cs_owner_id)
    .bind(company.health_score)
    .bind(&company.health_status)
    .bind(&company.onboarding_step)
    .bind(&company.created_at)
    .bind(&company.updated_at)
    .execute(pool)
    .await?;

    Ok(company)
}

/// Persist the editable fields (name, domain, owner)
pub async fn update(pool: &SqlitePool, company: &Company) -> Result<()> {
    sqlx::query(
        "UPDATE companies SET name = ?, domain = ?, cs_owner_id = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&company.name)
    .bind(&company.domain)
    .bind(&company.cs_owner_id)
    .bind(time::now_db())
    .bind(&company.id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_health(
    pool: &SqlitePool,
    id: &str,
    score: i64,
    status: HealthStatus,
    at: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE companies SET health_score = ?, health_status = ?, health_updated_at = ? WHERE id = ?",
    )
    .bind(score)
    .bind(status.as_str())
    .bind(at)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_onboarding_step(pool: &SqlitePool, id: &str, step: OnboardingStep) -> Result<()> {
    sqlx::query("UPDATE companies SET onboarding_step = ?, updated_at = ? WHERE id = ?")
        .bind(step.as_str())
        .bind(time::now_db())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete a company; dependent rows cascade. Returns false if absent.
pub async fn delete(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM companies WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Companies per health status among the visible ones
pub async fn count_by_health(pool: &SqlitePool, visibility: &Visibility) -> Result<Vec<(String, i64)>> {
    let mut qb = QueryBuilder::new("SELECT health_status, COUNT(*) FROM companies WHERE 1 = 1");
    visibility.push_filter(&mut qb, "id");
    qb.push(" GROUP BY health_status");
    let rows: Vec<(String, i64)> = qb.build_query_as().fetch_all(pool).await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use csops_common::db::init_memory_database;

    #[tokio::test]
    async fn test_insert_defaults_and_get() {
        let pool = init_memory_database().await.unwrap();
        let company = insert(&pool, "Acme", Some("acme.com"), None).await.unwrap();
        assert_eq!(company.health_score, 60);
        assert_eq!(company.health_status, "ATTENTION");
        assert_eq!(company.onboarding().unwrap(), OnboardingStep::Welcome);

        let loaded = get(&pool, &company.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Acme");
        let by_domain = find_by_domain(&pool, "ACME.com").await.unwrap().unwrap();
        assert_eq!(by_domain.id, company.id);
    }

    #[tokio::test]
    async fn test_list_filters_and_visibility() {
        let pool = init_memory_database().await.unwrap();
        let acme = insert(&pool, "Acme", None, None).await.unwrap();
        insert(&pool, "Globex", None, None).await.unwrap();
        insert(&pool, "Initech", None, None).await.unwrap();
        set_health(&pool, &acme.id, 90, HealthStatus::Healthy, "t").await.unwrap();

        let filter = CompanyFilter {
            q: Some("ex".to_string()),
            ..Default::default()
        };
        let rows = list(&pool, &Visibility::All, &filter, 25, 0).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Globex");

        let healthy = CompanyFilter {
            health_status: Some(HealthStatus::Healthy),
            ..Default::default()
        };
        assert_eq!(count(&pool, &Visibility::All, &healthy).await.unwrap(), 1);

        let own = Visibility::Company(acme.id.clone());
        assert_eq!(count(&pool, &own, &CompanyFilter::default()).await.unwrap(), 1);
        assert_eq!(
            count(&pool, &Visibility::Nothing, &CompanyFilter::default())
                .await
                .unwrap(),
            0
        );

        let page = list(&pool, &Visibility::All, &CompanyFilter::default(), 2, 2)
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "Initech");
    }
}
