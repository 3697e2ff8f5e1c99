//! Diagnostic forms and client responses

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;

use csops_common::access::Principal;
use csops_common::diagnostic::{self, FormStatus, Question};
use csops_common::time;

use crate::db::companies::Company;
use crate::db::diagnostics::{self, DiagnosticForm, DiagnosticResponse};
use crate::error::{ApiError, ApiResult};
use crate::services::notifier::{self, Kind, Message};
use crate::services;
use crate::AppState;

use super::{managed_company, require_internal, required_text, visible_company, AuthUser};

/// Load a form visible to the caller; clients never see drafts
pub(crate) async fn visible_form(
    state: &AppState,
    principal: &Principal,
    id: &str,
) -> ApiResult<(DiagnosticForm, Company)> {
    let not_found = || ApiError::NotFound(format!("Diagnostic {}", id));
    let form = diagnostics::get(&state.db, id).await?.ok_or_else(not_found)?;
    let company = visible_company(state, principal, &form.company_id)
        .await
        .map_err(|_| not_found())?;
    if principal.role.is_client() && form.status == FormStatus::Draft {
        return Err(not_found());
    }
    Ok((form, company))
}

/// GET /api/companies/:id/diagnostics
pub async fn list_forms(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(company_id): Path<String>,
) -> ApiResult<Json<Vec<DiagnosticForm>>> {
    let company = visible_company(&state, &auth.principal, &company_id).await?;
    let mut forms = diagnostics::list_for_company(&state.db, &company.id).await?;
    if auth.principal.role.is_client() {
        forms.retain(|f| f.status != FormStatus::Draft);
    }
    Ok(Json(forms))
}

#[derive(Debug, Deserialize)]
pub struct CreateFormRequest {
    pub title: String,
    pub questions: Vec<Question>,
}

/// POST /api/companies/:id/diagnostics
pub async fn create_form(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(company_id): Path<String>,
    Json(req): Json<CreateFormRequest>,
) -> ApiResult<(StatusCode, Json<DiagnosticForm>)> {
    let company = managed_company(&state, &auth.principal, &company_id).await?;
    let title = required_text(&req.title, "title")?;
    diagnostic::validate_questions(&req.questions)?;

    let form = diagnostics::insert(
        &state.db,
        &company.id,
        &title,
        &req.questions,
        &auth.principal.user_id,
    )
    .await?;
    info!(form_id = %form.id, company_id = %company.id, questions = form.questions.len(), "Created diagnostic");
    Ok((StatusCode::CREATED, Json(form)))
}

/// GET /api/diagnostics/:id
pub async fn get_form(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<DiagnosticForm>> {
    let (form, _) = visible_form(&state, &auth.principal, &id).await?;
    Ok(Json(form))
}

async fn reload(state: &AppState, id: &str) -> ApiResult<DiagnosticForm> {
    diagnostics::get(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Diagnostic {}", id)))
}

/// POST /api/diagnostics/:id/send
pub async fn send_form(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<DiagnosticForm>> {
    let (form, company) = visible_form(&state, &auth.principal, &id).await?;
    managed_company(&state, &auth.principal, &company.id).await?;

    if !diagnostics::mark_sent(&state.db, &form.id, &time::now_db()).await? {
        return Err(ApiError::Conflict(format!(
            "Only DRAFT diagnostics can be sent (currently {})",
            form.status
        )));
    }
    info!(form_id = %form.id, "Sent diagnostic");

    let message = Message::new(
        Kind::DiagnosticSent,
        "New diagnostic",
        format!("Please fill in \"{}\"", form.title),
    )
    .link(format!("/diagnostics/{}", form.id));
    notifier::notify_clients(&state.db, &state.event_bus, &company.id, false, &message).await;

    Ok(Json(reload(&state, &form.id).await?))
}

/// POST /api/diagnostics/:id/close
pub async fn close_form(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<DiagnosticForm>> {
    let (form, company) = visible_form(&state, &auth.principal, &id).await?;
    managed_company(&state, &auth.principal, &company.id).await?;

    if !diagnostics::close(&state.db, &form.id).await? {
        return Err(ApiError::Conflict(format!(
            "Only SENT diagnostics can be closed (currently {})",
            form.status
        )));
    }
    Ok(Json(reload(&state, &form.id).await?))
}

/// GET /api/diagnostics/:id/responses
pub async fn list_responses(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<DiagnosticResponse>>> {
    require_internal(&auth.principal)?;
    let (form, _) = visible_form(&state, &auth.principal, &id).await?;
    Ok(Json(diagnostics::list_responses(&state.db, &form.id).await?))
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub answers: HashMap<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub id: String,
    pub form_id: String,
}

/// POST /api/diagnostics/:id/responses
pub async fn submit_response(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<SubmitRequest>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let (form, company) = visible_form(&state, &auth.principal, &id).await?;
    auth.principal
        .require(auth.principal.role.is_client(), "answer diagnostics")?;
    if form.status != FormStatus::Sent {
        return Err(ApiError::Conflict(format!(
            "Diagnostic is {}, not SENT",
            form.status
        )));
    }
    diagnostic::validate_answers(&form.questions, &req.answers)?;

    let response_id =
        diagnostics::insert_response(&state.db, &form.id, &auth.principal.user_id, &req.answers).await?;
    info!(form_id = %form.id, user_id = %auth.principal.user_id, "Diagnostic answered");

    services::onboarding::refresh(&state.db, &company.id).await;
    let message = Message::new(
        Kind::DiagnosticAnswered,
        "Diagnostic answered",
        format!("{} answered \"{}\"", auth.user.name, form.title),
    )
    .link(format!("/diagnostics/{}", form.id));
    notifier::notify_internal(&state.db, &state.event_bus, &company.id, &message).await;

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            id: response_id,
            form_id: form.id,
        }),
    ))
}

pub fn diagnostic_routes() -> Router<AppState> {
    Router::new()
        .route("/api/companies/:id/diagnostics", get(list_forms).post(create_form))
        .route("/api/diagnostics/:id", get(get_form))
        .route("/api/diagnostics/:id/send", post(send_form))
        .route("/api/diagnostics/:id/close", post(close_form))
        .route(
            "/api/diagnostics/:id/responses",
            get(list_responses).post(submit_response),
        )
}
