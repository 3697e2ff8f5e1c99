//! Provider webhooks (public, signature-verified)
//!
//! Bodies are taken as raw bytes: the signature covers the exact payload.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tracing::warn;

use csops_common::{time, webhook};

use crate::db::bookings::Provider;
use crate::error::{ApiError, ApiResult};
use crate::services::booking_sync;
use crate::AppState;

pub const CALCOM_SIGNATURE_HEADER: &str = "x-cal-signature-256";
pub const CALENDLY_SIGNATURE_HEADER: &str = "calendly-webhook-signature";

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    /// Stored booking id; None for ignored events
    pub booking_id: Option<String>,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn ingest(state: &AppState, provider: Provider, action: booking_sync::WebhookAction) -> ApiResult<Json<WebhookAck>> {
    let stored = booking_sync::apply(&state.db, &state.event_bus, provider, action).await?;
    Ok(Json(WebhookAck {
        received: true,
        booking_id: stored.map(|b| b.id),
    }))
}

/// POST /api/webhooks/calcom
pub async fn calcom_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let config = state
        .config
        .calcom
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("Cal.com is not configured".to_string()))?;

    if let Err(e) = webhook::verify_calcom(
        &config.webhook_secret,
        &body,
        header(&headers, CALCOM_SIGNATURE_HEADER),
    ) {
        warn!(provider = "CALCOM", "Rejected webhook: {}", e);
        return Err(e.into());
    }

    let action = booking_sync::parse_calcom(&body)?;
    ingest(&state, Provider::Calcom, action).await
}

/// POST /api/webhooks/calendly
pub async fn calendly_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let config = state
        .config
        .calendly
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("Calendly is not configured".to_string()))?;

    if let Err(e) = webhook::verify_calendly(
        &config.webhook_signing_key,
        &body,
        header(&headers, CALENDLY_SIGNATURE_HEADER),
        time::now().timestamp(),
    ) {
        warn!(provider = "CALENDLY", "Rejected webhook: {}", e);
        return Err(e.into());
    }

    let action = booking_sync::parse_calendly(&body)?;
    ingest(&state, Provider::Calendly, action).await
}

pub fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route("/api/webhooks/calcom", post(calcom_webhook))
        .route("/api/webhooks/calendly", post(calendly_webhook))
}
