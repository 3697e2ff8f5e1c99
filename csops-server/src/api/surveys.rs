//! NPS / CSAT surveys and adoption checks

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use csops_common::access::Principal;
use csops_common::survey::{self, AdoptionAnswer, SurveyAnswer, SurveyKind, SurveyResults, SurveyStatus};
use csops_common::time;

use crate::db::companies::Company;
use crate::db::deliveries;
use crate::db::surveys::{self, NewSurvey, Survey, SurveyResponse};
use crate::error::{ApiError, ApiResult};
use crate::services::{self, notifier};
use crate::AppState;

use super::{managed_company, optional_text, visible_company, AuthUser};

async fn visible_survey(state: &AppState, principal: &Principal, id: &str) -> ApiResult<(Survey, Company)> {
    let survey = surveys::get(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Survey {}", id)))?;
    let company = visible_company(state, principal, &survey.company_id)
        .await
        .map_err(|_| ApiError::NotFound(format!("Survey {}", id)))?;
    // Clients never see a survey before it opens
    if principal.role.is_client() && survey.status()? == SurveyStatus::Scheduled {
        return Err(ApiError::NotFound(format!("Survey {}", id)));
    }
    Ok((survey, company))
}

fn default_title(kind: SurveyKind) -> &'static str {
    match kind {
        SurveyKind::Nps => "How likely are you to recommend us?",
        SurveyKind::Csat => "How satisfied are you with our service?",
        SurveyKind::Adoption => "Are you using what we delivered?",
    }
}

/// GET /api/companies/:id/surveys
pub async fn list_surveys(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(company_id): Path<String>,
) -> ApiResult<Json<Vec<Survey>>> {
    let company = visible_company(&state, &auth.principal, &company_id).await?;
    let mut list = surveys::list_for_company(&state.db, &company.id).await?;
    // Clients never see surveys that have not gone out yet
    if auth.principal.role.is_client() {
        list.retain(|s| s.status != SurveyStatus::Scheduled.as_str());
    }
    Ok(Json(list))
}

#[derive(Debug, Deserialize)]
pub struct CreateSurveyRequest {
    pub kind: SurveyKind,
    pub title: Option<String>,
    pub send_at: Option<String>,
    pub delivery_id: Option<String>,
}

/// POST /api/companies/:id/surveys
pub async fn create_survey(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(company_id): Path<String>,
    Json(req): Json<CreateSurveyRequest>,
) -> ApiResult<(StatusCode, Json<Survey>)> {
    let company = managed_company(&state, &auth.principal, &company_id).await?;

    let send_at = match optional_text(req.send_at.as_deref()) {
        None => None,
        Some(raw) => Some(
            time::parse(&raw)
                .ok_or_else(|| ApiError::BadRequest(format!("send_at must be RFC 3339, got {}", raw)))?,
        ),
    };
    let status = match send_at {
        Some(at) if at > time::now() => SurveyStatus::Scheduled,
        _ => SurveyStatus::Open,
    };

    let delivery_id = optional_text(req.delivery_id.as_deref());
    if let Some(id) = &delivery_id {
        let delivery = deliveries::get(&state.db, id)
            .await?
            .ok_or_else(|| ApiError::BadRequest(format!("Unknown delivery {}", id)))?;
        if delivery.company_id != company.id {
            return Err(ApiError::BadRequest(
                "Delivery belongs to another company".to_string(),
            ));
        }
    }

    let title = optional_text(req.title.as_deref()).unwrap_or_else(|| default_title(req.kind).to_string());
    let send_at = send_at.map(time::to_db);
    let survey = surveys::insert(
        &state.db,
        &NewSurvey {
            company_id: &company.id,
            kind: req.kind,
            title: &title,
            status,
            delivery_id: delivery_id.as_deref(),
            send_at: send_at.as_deref(),
            created_by: Some(&auth.principal.user_id),
        },
    )
    .await?;

    info!(survey_id = %survey.id, kind = %survey.kind, status = %survey.status, "Created survey");
    if status == SurveyStatus::Open {
        notifier::survey_opened(&state.db, &state.event_bus, &survey).await;
    }
    Ok((StatusCode::CREATED, Json(survey)))
}

#[derive(Debug, Serialize)]
pub struct SurveyDetail {
    #[serde(flatten)]
    pub survey: Survey,
    /// Internal roles only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<SurveyResults>,
}

/// GET /api/surveys/:id
pub async fn get_survey(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<SurveyDetail>> {
    let (survey, _) = visible_survey(&state, &auth.principal, &id).await?;

    let results = if auth.principal.is_internal() {
        let scores = surveys::scores(&state.db, &survey.id).await?;
        Some(survey::aggregate(survey.kind()?, &scores))
    } else {
        None
    };
    Ok(Json(SurveyDetail { survey, results }))
}

/// POST /api/surveys/:id/close
pub async fn close_survey(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Survey>> {
    let (survey, company) = visible_survey(&state, &auth.principal, &id).await?;
    managed_company(&state, &auth.principal, &company.id).await?;

    if !surveys::close(&state.db, &survey.id, &time::now_db()).await? {
        return Err(ApiError::Conflict("Survey is already closed".to_string()));
    }
    info!(survey_id = %survey.id, "Closed survey");

    let survey = surveys::get(&state.db, &survey.id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Survey {}", id)))?;
    Ok(Json(survey))
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub score: Option<i64>,
    pub adoption: Option<AdoptionAnswer>,
    pub comment: Option<String>,
}

/// POST /api/surveys/:id/responses
pub async fn respond(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<RespondRequest>,
) -> ApiResult<(StatusCode, Json<SurveyResponse>)> {
    let (survey, company) = visible_survey(&state, &auth.principal, &id).await?;
    auth.principal
        .require(auth.principal.role.is_client(), "answer surveys")?;
    if survey.status()? != SurveyStatus::Open {
        return Err(ApiError::Conflict(format!(
            "Survey is {}, not OPEN",
            survey.status
        )));
    }

    let score = survey::score_answer(
        survey.kind()?,
        &SurveyAnswer {
            score: req.score,
            adoption: req.adoption,
        },
    )?;
    let response = surveys::insert_response(
        &state.db,
        &survey.id,
        &auth.principal.user_id,
        score,
        req.comment.as_deref(),
    )
    .await?;

    info!(survey_id = %survey.id, user_id = %auth.principal.user_id, score, "Survey answered");
    services::health::refresh(&state.db, &state.event_bus, &company.id).await;
    Ok((StatusCode::CREATED, Json(response)))
}

pub fn survey_routes() -> Router<AppState> {
    Router::new()
        .route("/api/companies/:id/surveys", get(list_surveys).post(create_survey))
        .route("/api/surveys/:id", get(get_survey))
        .route("/api/surveys/:id/close", post(close_survey))
        .route("/api/surveys/:id/responses", post(respond))
}
