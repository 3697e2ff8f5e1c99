//! HTTP API handlers for csops-server

pub mod auth;
pub mod bookings;
pub mod companies;
pub mod cs_owners;
pub mod dashboard;
pub mod deliveries;
pub mod diagnostics;
pub mod documents;
pub mod health;
pub mod insights;
pub mod notifications;
pub mod sse;
pub mod surveys;
pub mod users;
pub mod webhooks;

pub use auth::{auth_routes, AuthUser};
pub use bookings::booking_routes;
pub use companies::company_routes;
pub use cs_owners::cs_owner_routes;
pub use dashboard::dashboard_routes;
pub use deliveries::delivery_routes;
pub use diagnostics::diagnostic_routes;
pub use documents::document_routes;
pub use health::health_routes;
pub use insights::insight_routes;
pub use notifications::notification_routes;
pub use sse::sse_routes;
pub use surveys::survey_routes;
pub use users::{invite_routes, user_routes};
pub use webhooks::webhook_routes;

use serde::{Deserialize, Deserializer};
use std::str::FromStr;

use csops_common::access::Principal;

use crate::db::companies::{self as company_db, Company};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Load a company or 404
pub(crate) async fn load_company(state: &AppState, id: &str) -> ApiResult<Company> {
    company_db::get(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Company {}", id)))
}

/// Load a company the caller can see; invisible companies are reported as 404
pub(crate) async fn visible_company(state: &AppState, principal: &Principal, id: &str) -> ApiResult<Company> {
    let company = load_company(state, id).await?;
    if !principal.can_view_company(company.scope()) {
        return Err(ApiError::NotFound(format!("Company {}", id)));
    }
    Ok(company)
}

/// Load a company the caller can manage (internal write access)
pub(crate) async fn managed_company(state: &AppState, principal: &Principal, id: &str) -> ApiResult<Company> {
    let company = visible_company(state, principal, id).await?;
    principal.require(principal.can_manage_company(company.scope()), "manage this company")?;
    Ok(company)
}

/// Internal roles only
pub(crate) fn require_internal(principal: &Principal) -> ApiResult<()> {
    principal.require(principal.is_internal(), "access internal data")?;
    Ok(())
}

pub(crate) fn require_admin(principal: &Principal) -> ApiResult<()> {
    principal.require(principal.is_admin(), "perform admin operations")?;
    Ok(())
}

/// Parse an optional enum field from a request
pub(crate) fn parse_opt<T>(value: Option<&str>) -> ApiResult<Option<T>>
where
    T: FromStr<Err = csops_common::Error>,
{
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| v.parse::<T>())
        .transpose()
        .map_err(ApiError::from)
}

/// Trimmed, non-blank required text
pub(crate) fn required_text(value: &str, field: &str) -> ApiResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::BadRequest(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

/// Trimmed optional text; blank becomes None
pub(crate) fn optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Distinguish an absent field (None) from an explicit null (Some(None))
pub(crate) fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
