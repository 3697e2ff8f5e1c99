//! Company endpoints, including health recalculation and onboarding

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use csops_common::health::{HealthBreakdown, HealthStatus};
use csops_common::onboarding::{self, OnboardingStep, StepView};

use crate::db::companies::{self, Company, CompanyFilter};
use crate::db::{cs_owners, Visibility};
use crate::error::{ApiError, ApiResult};
use crate::pagination::{calculate_pagination, PageParams, Pagination};
use crate::services;
use crate::AppState;

use super::{
    double_option, load_company, managed_company, optional_text, parse_opt, require_admin,
    required_text, visible_company, AuthUser,
};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub health_status: Option<String>,
    pub q: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CompanyPage {
    pub companies: Vec<Company>,
    pub pagination: Pagination,
}

/// GET /api/companies
pub async fn list_companies(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<CompanyPage>> {
    let visibility = Visibility::for_principal(&auth.principal);
    let filter = CompanyFilter {
        health_status: parse_opt::<HealthStatus>(query.health_status.as_deref())?,
        q: optional_text(query.q.as_deref()),
    };

    let total = companies::count(&state.db, &visibility, &filter).await?;
    let pagination = calculate_pagination(
        total,
        PageParams {
            page: query.page,
            page_size: query.page_size,
        },
    );
    let companies = companies::list(
        &state.db,
        &visibility,
        &filter,
        pagination.page_size,
        pagination.offset,
    )
    .await?;

    Ok(Json(CompanyPage {
        companies,
        pagination,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateCompanyRequest {
    pub name: String,
    pub domain: Option<String>,
    pub cs_owner_id: Option<String>,
}

async fn ensure_owner_exists(state: &AppState, cs_owner_id: &str) -> ApiResult<()> {
    if cs_owners::get(&state.db, cs_owner_id).await?.is_none() {
        return Err(ApiError::BadRequest(format!("Unknown CS owner {}", cs_owner_id)));
    }
    Ok(())
}

fn normalize_domain(domain: Option<&str>) -> Option<String> {
    optional_text(domain).map(|d| d.trim_start_matches('@').to_lowercase())
}

/// POST /api/companies
pub async fn create_company(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateCompanyRequest>,
) -> ApiResult<(StatusCode, Json<Company>)> {
    require_admin(&auth.principal)?;
    let name = required_text(&req.name, "name")?;
    let domain = normalize_domain(req.domain.as_deref());
    let cs_owner_id = optional_text(req.cs_owner_id.as_deref());
    if let Some(owner) = &cs_owner_id {
        ensure_owner_exists(&state, owner).await?;
    }

    let company = companies::insert(&state.db, &name, domain.as_deref(), cs_owner_id.as_deref()).await?;
    info!(company_id = %company.id, name = %company.name, "Created company");
    Ok((StatusCode::CREATED, Json(company)))
}

/// GET /api/companies/:id
pub async fn get_company(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Company>> {
    Ok(Json(visible_company(&state, &auth.principal, &id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateCompanyRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub domain: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub cs_owner_id: Option<Option<String>>,
}

/// PATCH /api/companies/:id
pub async fn update_company(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateCompanyRequest>,
) -> ApiResult<Json<Company>> {
    let mut company = managed_company(&state, &auth.principal, &id).await?;

    if let Some(name) = &req.name {
        company.name = required_text(name, "name")?;
    }
    if let Some(domain) = &req.domain {
        company.domain = normalize_domain(domain.as_deref());
    }
    if let Some(owner) = &req.cs_owner_id {
        let owner = optional_text(owner.as_deref());
        if owner != company.cs_owner_id {
            auth.principal
                .require(auth.principal.is_admin(), "reassign the CS owner")?;
            if let Some(owner) = &owner {
                ensure_owner_exists(&state, owner).await?;
            }
            company.cs_owner_id = owner;
        }
    }

    companies::update(&state.db, &company).await?;
    Ok(Json(load_company(&state, &id).await?))
}

/// DELETE /api/companies/:id
pub async fn delete_company(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    require_admin(&auth.principal)?;
    if !companies::delete(&state.db, &id).await? {
        return Err(ApiError::NotFound(format!("Company {}", id)));
    }
    info!(company_id = %id, "Deleted company");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/companies/:id/health/recalculate
pub async fn recalculate_health(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<HealthBreakdown>> {
    let company = managed_company(&state, &auth.principal, &id).await?;
    let breakdown = services::health::recalculate(&state.db, &state.event_bus, &company.id).await?;
    Ok(Json(breakdown))
}

#[derive(Debug, Serialize)]
pub struct OnboardingResponse {
    pub company_id: String,
    pub step: OnboardingStep,
    pub steps: Vec<StepView>,
}

impl OnboardingResponse {
    fn new(company_id: String, step: OnboardingStep) -> Self {
        Self {
            company_id,
            step,
            steps: onboarding::checklist(step),
        }
    }
}

/// GET /api/companies/:id/onboarding
pub async fn get_onboarding(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<OnboardingResponse>> {
    let company = visible_company(&state, &auth.principal, &id).await?;
    let step = company.onboarding()?;
    Ok(Json(OnboardingResponse::new(company.id, step)))
}

/// POST /api/companies/:id/onboarding/advance
pub async fn advance_onboarding(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<OnboardingResponse>> {
    let company = managed_company(&state, &auth.principal, &id).await?;
    let step = services::onboarding::advance(&state.db, &company.id, company.onboarding()?).await?;
    Ok(Json(OnboardingResponse::new(company.id, step)))
}

pub fn company_routes() -> Router<AppState> {
    Router::new()
        .route("/api/companies", get(list_companies).post(create_company))
        .route(
            "/api/companies/:id",
            get(get_company).patch(update_company).delete(delete_company),
        )
        .route("/api/companies/:id/health/recalculate", post(recalculate_health))
        .route("/api/companies/:id/onboarding", get(get_onboarding))
        .route("/api/companies/:id/onboarding/advance", post(advance_onboarding))
}
