//! Booking listings and Cal.com / Calendly / Fathom proxies

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use csops_common::access::Principal;
use csops_common::time;

use crate::db::bookings::{self, Booking, Provider};
use crate::error::{ApiError, ApiResult};
use crate::services::calcom_client::{CalComClient, CreateBooking};
use crate::services::calendly_client::CalendlyClient;
use crate::services::fathom_client::{self, FathomClient};
use crate::services::{booking_sync, health};
use crate::AppState;

use super::{managed_company, optional_text, require_admin, require_internal, visible_company, AuthUser};

const DEFAULT_CANCEL_REASON: &str = "Cancelled by the customer success team";

fn calcom(state: &AppState) -> ApiResult<&CalComClient> {
    state
        .calcom
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("Cal.com is not configured".to_string()))
}

fn calendly(state: &AppState) -> ApiResult<&CalendlyClient> {
    state
        .calendly
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("Calendly is not configured".to_string()))
}

fn fathom(state: &AppState) -> ApiResult<&FathomClient> {
    state
        .fathom
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("Fathom is not configured".to_string()))
}

/// Load a booking the caller may act on. Bookings without a company are
/// admin-only.
async fn managed_booking(
    state: &AppState,
    principal: &Principal,
    provider: Provider,
    id: &str,
) -> ApiResult<Booking> {
    require_internal(principal)?;
    let booking = bookings::get(&state.db, provider, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Booking {}", id)))?;
    match &booking.company_id {
        Some(company_id) => {
            managed_company(state, principal, company_id)
                .await
                .map_err(|_| ApiError::NotFound(format!("Booking {}", id)))?;
        }
        None => require_admin(principal)?,
    }
    Ok(booking)
}

/// GET /api/companies/:id/bookings
pub async fn list_bookings(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(company_id): Path<String>,
) -> ApiResult<Json<Vec<Booking>>> {
    let company = visible_company(&state, &auth.principal, &company_id).await?;
    Ok(Json(bookings::list_for_company(&state.db, &company.id).await?))
}

// ============================================================================
// Cal.com
// ============================================================================

/// GET /api/integrations/calcom/event-types
pub async fn calcom_event_types(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<Value>> {
    require_internal(&auth.principal)?;
    Ok(Json(calcom(&state)?.event_types().await?))
}

/// POST /api/integrations/calcom/bookings
pub async fn calcom_create_booking(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateBooking>,
) -> ApiResult<(StatusCode, Json<Booking>)> {
    require_internal(&auth.principal)?;
    let client = calcom(&state)?;
    if req.attendee_email.trim().is_empty() || req.attendee_name.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "attendee_name and attendee_email are required".to_string(),
        ));
    }
    if time::parse(&req.start).is_none() {
        return Err(ApiError::BadRequest(format!("start must be RFC 3339, got {}", req.start)));
    }

    let created = client.create_booking(&req).await?;
    let upsert = booking_sync::from_calcom_api(&created, &req.attendee_name, &req.attendee_email)
        .map_err(|e| ApiError::BadGateway(format!("Cal.com returned an unusable booking: {}", e)))?;
    let booking = booking_sync::store(&state.db, &state.event_bus, Provider::Calcom, upsert).await?;

    info!(booking_id = %booking.id, uid = %booking.external_id, "Created Cal.com booking");
    Ok((StatusCode::CREATED, Json(booking)))
}

// ============================================================================
// Calendly
// ============================================================================

/// GET /api/integrations/calendly/event-types
pub async fn calendly_event_types(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<Value>> {
    require_internal(&auth.principal)?;
    Ok(Json(calendly(&state)?.event_types().await?))
}

#[derive(Debug, Deserialize)]
pub struct SchedulingLinkRequest {
    pub event_type_uri: String,
}

#[derive(Debug, Serialize)]
pub struct SchedulingLinkResponse {
    pub booking_url: String,
}

/// POST /api/integrations/calendly/scheduling-links
pub async fn calendly_scheduling_link(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<SchedulingLinkRequest>,
) -> ApiResult<(StatusCode, Json<SchedulingLinkResponse>)> {
    require_internal(&auth.principal)?;
    let client = calendly(&state)?;
    let uri = super::required_text(&req.event_type_uri, "event_type_uri")?;
    let booking_url = client.create_scheduling_link(&uri).await?;
    Ok((StatusCode::CREATED, Json(SchedulingLinkResponse { booking_url })))
}

// ============================================================================
// Per-booking actions
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

/// POST /api/bookings/:provider/:id/cancel
pub async fn cancel_booking(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((provider, id)): Path<(String, String)>,
    body: Option<Json<CancelRequest>>,
) -> ApiResult<Json<Booking>> {
    let provider: Provider = provider.parse()?;
    let booking = managed_booking(&state, &auth.principal, provider, &id).await?;
    if booking.status == booking_sync::CANCELLED {
        return Err(ApiError::Conflict("Booking is already cancelled".to_string()));
    }

    let reason = body
        .and_then(|Json(req)| optional_text(req.reason.as_deref()))
        .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());
    match provider {
        Provider::Calcom => calcom(&state)?.cancel_booking(&booking.external_id, &reason).await?,
        Provider::Calendly => {
            let client = calendly(&state)?;
            let event_uri = bookings::calendly_event_uri(&state.db, &booking.id)
                .await?
                .ok_or_else(|| ApiError::Conflict("Booking has no Calendly event URI".to_string()))?;
            client.cancel_event(&event_uri, &reason).await?;
        }
    }

    let cancelled = bookings::mark_cancelled(&state.db, provider, &booking.external_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Booking {}", id)))?;
    info!(provider = provider.as_str(), booking_id = %cancelled.id, "Cancelled booking");

    if let Some(company_id) = &cancelled.company_id {
        health::refresh(&state.db, &state.event_bus, company_id).await;
    }
    Ok(Json(cancelled))
}

/// POST /api/bookings/:provider/:id/fathom-sync
pub async fn fathom_sync(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((provider, id)): Path<(String, String)>,
) -> ApiResult<Json<Booking>> {
    let provider: Provider = provider.parse()?;
    let booking = managed_booking(&state, &auth.principal, provider, &id).await?;
    let client = fathom(&state)?;

    let (Some(start), Some(end)) = (time::parse(&booking.start_time), time::parse(&booking.end_time)) else {
        return Err(ApiError::Internal(format!("Booking {} has malformed times", booking.id)));
    };
    let meetings = client.meetings_around(start, end).await?;
    let meeting = fathom_client::find_matching(&meetings, start, end, booking.attendee_email.as_deref())
        .ok_or_else(|| ApiError::NotFound("No Fathom recording matches this booking".to_string()))?;

    bookings::set_recording(&state.db, provider, &booking.id, Some(meeting.link()), meeting.summary()).await?;
    info!(booking_id = %booking.id, recording = meeting.link(), "Attached Fathom recording");

    let updated = bookings::get(&state.db, provider, &booking.id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Booking {}", id)))?;
    Ok(Json(updated))
}

pub fn booking_routes() -> Router<AppState> {
    Router::new()
        .route("/api/companies/:id/bookings", get(list_bookings))
        .route("/api/integrations/calcom/event-types", get(calcom_event_types))
        .route("/api/integrations/calcom/bookings", post(calcom_create_booking))
        .route("/api/integrations/calendly/event-types", get(calendly_event_types))
        .route(
            "/api/integrations/calendly/scheduling-links",
            post(calendly_scheduling_link),
        )
        .route("/api/bookings/:provider/:id/cancel", post(cancel_booking))
        .route("/api/bookings/:provider/:id/fathom-sync", post(fathom_sync))
}
