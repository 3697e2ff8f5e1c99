//! AI insights over diagnostics and company state

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use csops_common::{health, time};

use crate::db::insights::{self, Insight};
use crate::db::{deliveries, diagnostics, surveys};
use crate::error::{ApiError, ApiResult};
use crate::services::insights::{company_prompt, diagnostic_prompt, generate, Source};
use crate::services::openai_client::OpenAiClient;
use crate::AppState;

use super::diagnostics::visible_form;
use super::{managed_company, require_internal, visible_company, AuthUser};

/// Survey comments included in a company prompt
const PROMPT_COMMENTS: i64 = 10;

fn openai(state: &AppState) -> ApiResult<&OpenAiClient> {
    state
        .openai
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("OpenAI is not configured".to_string()))
}

/// POST /api/diagnostics/:id/insights
pub async fn diagnostic_insight(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Insight>)> {
    let (form, company) = visible_form(&state, &auth.principal, &id).await?;
    managed_company(&state, &auth.principal, &company.id).await?;

    let responses = diagnostics::list_responses(&state.db, &form.id).await?;
    if responses.is_empty() {
        return Err(ApiError::Conflict("Diagnostic has no responses yet".to_string()));
    }
    let client = openai(&state)?;

    let prompt = diagnostic_prompt(&company, &form, &responses);
    let insight = generate(
        &state.db,
        client,
        &company.id,
        Source::Diagnostic,
        Some(&form.id),
        &prompt,
        &auth.principal.user_id,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(insight)))
}

/// POST /api/companies/:id/insights
pub async fn company_insight(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(company_id): Path<String>,
) -> ApiResult<(StatusCode, Json<Insight>)> {
    let company = managed_company(&state, &auth.principal, &company_id).await?;
    let client = openai(&state)?;

    let signals = crate::services::health::gather_signals(&state.db, &company.id, time::now()).await?;
    let breakdown = health::compute(&signals);
    let open = deliveries::open_for_company(&state.db, &company.id).await?;
    let comments = surveys::recent_comments(&state.db, &company.id, PROMPT_COMMENTS).await?;

    let prompt = company_prompt(&company, &breakdown, &open, &comments);
    let insight = generate(
        &state.db,
        client,
        &company.id,
        Source::Company,
        None,
        &prompt,
        &auth.principal.user_id,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(insight)))
}

/// GET /api/companies/:id/insights
pub async fn list_insights(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(company_id): Path<String>,
) -> ApiResult<Json<Vec<Insight>>> {
    require_internal(&auth.principal)?;
    let company = visible_company(&state, &auth.principal, &company_id).await?;
    Ok(Json(insights::list_for_company(&state.db, &company.id).await?))
}

pub fn insight_routes() -> Router<AppState> {
    Router::new()
        .route("/api/diagnostics/:id/insights", post(diagnostic_insight))
        .route(
            "/api/companies/:id/insights",
            get(list_insights).post(company_insight),
        )
}
