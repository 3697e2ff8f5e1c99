//! Internal dashboard and client overview

use axum::{extract::State, routing::get, Json, Router};
use chrono::Duration;
use serde::Serialize;
use std::collections::BTreeMap;

use csops_common::delivery::DeliveryStatus;
use csops_common::health::HealthStatus;
use csops_common::onboarding::{self, StepView};
use csops_common::time;

use crate::db::bookings::{self, Booking};
use crate::db::companies::{self, Company};
use crate::db::deliveries::{self, Delivery};
use crate::db::diagnostics::{self, DiagnosticForm};
use crate::db::surveys::{self, Survey};
use crate::db::Visibility;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

use super::{require_internal, AuthUser};

/// Window for "upcoming" bookings
const UPCOMING_DAYS: i64 = 7;

/// Group counts with every known key present
fn counts<'a>(keys: impl Iterator<Item = &'a str>, rows: Vec<(String, i64)>) -> BTreeMap<String, i64> {
    let mut map: BTreeMap<String, i64> = keys.map(|k| (k.to_string(), 0)).collect();
    for (key, count) in rows {
        *map.entry(key).or_insert(0) += count;
    }
    map
}

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub companies_by_health: BTreeMap<String, i64>,
    pub deliveries_by_status: BTreeMap<String, i64>,
    pub overdue_deliveries: Vec<Delivery>,
    pub pending_approvals: Vec<Delivery>,
    pub upcoming_bookings: Vec<Booking>,
}

/// GET /api/dashboard
pub async fn dashboard(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<Dashboard>> {
    require_internal(&auth.principal)?;
    let visibility = Visibility::for_principal(&auth.principal);
    let now = time::now();

    let companies_by_health = counts(
        HealthStatus::ALL.iter().map(|s| s.as_str()),
        companies::count_by_health(&state.db, &visibility).await?,
    );
    let deliveries_by_status = counts(
        DeliveryStatus::ALL.iter().map(|s| s.as_str()),
        deliveries::count_by_status(&state.db, &visibility).await?,
    );

    Ok(Json(Dashboard {
        companies_by_health,
        deliveries_by_status,
        overdue_deliveries: deliveries::overdue(&state.db, &visibility, now.date_naive()).await?,
        pending_approvals: deliveries::awaiting_approval(&state.db, &visibility, false).await?,
        upcoming_bookings: bookings::upcoming(
            &state.db,
            &visibility,
            &time::to_db(now),
            &time::to_db(now + Duration::days(UPCOMING_DAYS)),
        )
        .await?,
    }))
}

#[derive(Debug, Serialize)]
pub struct ClientOverview {
    pub company: Company,
    pub onboarding: Vec<StepView>,
    pub awaiting_approval: Vec<Delivery>,
    pub open_surveys: Vec<Survey>,
    pub pending_diagnostics: Vec<DiagnosticForm>,
}

/// GET /api/client/overview
pub async fn client_overview(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<ClientOverview>> {
    let principal = &auth.principal;
    principal.require(principal.role.is_client(), "view the client overview")?;
    let company_id = principal
        .company_id
        .as_deref()
        .ok_or_else(|| ApiError::Forbidden("User is not attached to a company".to_string()))?;

    let company = companies::get(&state.db, company_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Company {}", company_id)))?;
    let visibility = Visibility::Company(company.id.clone());

    Ok(Json(ClientOverview {
        onboarding: onboarding::checklist(company.onboarding()?),
        awaiting_approval: deliveries::awaiting_approval(&state.db, &visibility, true).await?,
        open_surveys: surveys::open_unanswered(&state.db, &company.id, &principal.user_id).await?,
        pending_diagnostics: diagnostics::sent_unanswered(&state.db, &company.id, &principal.user_id).await?,
        company,
    }))
}

pub fn dashboard_routes() -> Router<AppState> {
    Router::new()
        .route("/api/dashboard", get(dashboard))
        .route("/api/client/overview", get(client_overview))
}
