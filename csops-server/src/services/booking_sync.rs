//! Booking webhook ingestion
//!
//! Turns verified Cal.com / Calendly webhook bodies into booking upserts,
//! attaches them to a company and refreshes the company's health and
//! onboarding state.

use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::{debug, info};

use csops_common::events::EventBus;
use csops_common::{time, Error, Result};

use crate::db::bookings::{self, Booking, BookingUpsert, Provider};
use crate::db::{companies, users};

use super::calcom_client::CalBooking;
use super::{health, onboarding};

pub const CANCELLED: &str = "CANCELLED";

/// What a webhook asks us to do
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookAction {
    Upsert(BookingUpsert),
    /// Event type we acknowledge without acting on
    Ignore(String),
}

fn normalize_time(value: &str, field: &str) -> Result<String> {
    time::parse(value)
        .map(time::to_db)
        .ok_or_else(|| Error::InvalidInput(format!("Invalid {}: {}", field, value)))
}

fn invalid_body(e: serde_json::Error) -> Error {
    Error::InvalidInput(format!("Malformed webhook body: {}", e))
}

// ============================================================================
// Cal.com
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalcomWebhook {
    trigger_event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalcomBooking {
    uid: String,
    #[serde(default)]
    title: String,
    start_time: String,
    end_time: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    attendees: Vec<CalcomAttendee>,
    #[serde(default)]
    metadata: Option<CalcomMetadata>,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CalcomAttendee {
    email: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalcomMetadata {
    video_call_url: Option<String>,
}

pub fn parse_calcom(body: &[u8]) -> Result<WebhookAction> {
    let webhook: CalcomWebhook = serde_json::from_slice(body).map_err(invalid_body)?;
    let cancelled = match webhook.trigger_event.as_str() {
        "BOOKING_CREATED" | "BOOKING_RESCHEDULED" => false,
        "BOOKING_CANCELLED" => true,
        other => return Ok(WebhookAction::Ignore(other.to_string())),
    };

    let booking: CalcomBooking = serde_json::from_value(webhook.payload).map_err(invalid_body)?;
    let attendee = booking.attendees.into_iter().next();
    let status = if cancelled {
        CANCELLED.to_string()
    } else {
        booking
            .status
            .map(|s| s.to_ascii_uppercase())
            .unwrap_or_else(|| "ACCEPTED".to_string())
    };
    let meeting_url = booking
        .metadata
        .and_then(|m| m.video_call_url)
        .or_else(|| booking.location.filter(|l| l.starts_with("http")));

    Ok(WebhookAction::Upsert(BookingUpsert {
        external_id: booking.uid,
        event_uri: None,
        company_id: None,
        title: booking.title,
        start_time: normalize_time(&booking.start_time, "startTime")?,
        end_time: normalize_time(&booking.end_time, "endTime")?,
        status,
        attendee_email: attendee.as_ref().and_then(|a| a.email.clone()),
        attendee_name: attendee.and_then(|a| a.name),
        meeting_url,
    }))
}

// ============================================================================
// Calendly
// ============================================================================

#[derive(Debug, Deserialize)]
struct CalendlyWebhook {
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CalendlyInvitee {
    uri: String,
    email: Option<String>,
    name: Option<String>,
    scheduled_event: CalendlyEvent,
}

#[derive(Debug, Deserialize)]
struct CalendlyEvent {
    uri: String,
    #[serde(default)]
    name: String,
    start_time: String,
    end_time: String,
    #[serde(default)]
    location: Option<CalendlyLocation>,
}

#[derive(Debug, Deserialize)]
struct CalendlyLocation {
    join_url: Option<String>,
}

pub fn parse_calendly(body: &[u8]) -> Result<WebhookAction> {
    let webhook: CalendlyWebhook = serde_json::from_slice(body).map_err(invalid_body)?;
    let cancelled = match webhook.event.as_str() {
        "invitee.created" => false,
        "invitee.canceled" => true,
        other => return Ok(WebhookAction::Ignore(other.to_string())),
    };

    let invitee: CalendlyInvitee = serde_json::from_value(webhook.payload).map_err(invalid_body)?;
    let event = invitee.scheduled_event;

    Ok(WebhookAction::Upsert(BookingUpsert {
        external_id: invitee.uri,
        event_uri: Some(event.uri),
        company_id: None,
        title: event.name,
        start_time: normalize_time(&event.start_time, "start_time")?,
        end_time: normalize_time(&event.end_time, "end_time")?,
        status: if cancelled { CANCELLED } else { "ACTIVE" }.to_string(),
        attendee_email: invitee.email,
        attendee_name: invitee.name,
        meeting_url: event.location.and_then(|l| l.join_url),
    }))
}

// ============================================================================
// Company resolution and persistence
// ============================================================================

/// Company of the user with this email, else the company owning its domain
pub async fn resolve_company(db: &SqlitePool, email: Option<&str>) -> Result<Option<String>> {
    let Some(email) = email.map(str::trim).filter(|e| !e.is_empty()) else {
        return Ok(None);
    };

    if let Some(user) = users::find_by_email(db, email).await? {
        if user.company_id.is_some() {
            return Ok(user.company_id);
        }
    }

    let Some((_, domain)) = email.rsplit_once('@') else {
        return Ok(None);
    };
    Ok(companies::find_by_domain(db, domain).await?.map(|c| c.id))
}

/// Attach a booking to its company, store it and refresh the company
pub async fn store(
    db: &SqlitePool,
    bus: &EventBus,
    provider: Provider,
    mut booking: BookingUpsert,
) -> Result<Booking> {
    booking.company_id = resolve_company(db, booking.attendee_email.as_deref()).await?;
    let stored = bookings::upsert(db, provider, &booking).await?;
    info!(
        provider = provider.as_str(),
        booking_id = %stored.id,
        status = %stored.status,
        company_id = stored.company_id.as_deref().unwrap_or("-"),
        "Booking synced"
    );

    if let Some(company_id) = &stored.company_id {
        onboarding::refresh(db, company_id).await;
        health::refresh(db, bus, company_id).await;
    }
    Ok(stored)
}

/// Store a webhook booking; returns None for ignored events
pub async fn apply(
    db: &SqlitePool,
    bus: &EventBus,
    provider: Provider,
    action: WebhookAction,
) -> Result<Option<Booking>> {
    match action {
        WebhookAction::Ignore(event) => {
            debug!(provider = provider.as_str(), event = %event, "Ignoring webhook event");
            Ok(None)
        }
        WebhookAction::Upsert(booking) => Ok(Some(store(db, bus, provider, booking).await?)),
    }
}

/// Local row for a booking we created through the Cal.com API
pub fn from_calcom_api(
    booking: &CalBooking,
    attendee_name: &str,
    attendee_email: &str,
) -> Result<BookingUpsert> {
    let meeting_url = booking.meeting_url.clone().or_else(|| {
        booking
            .location
            .clone()
            .filter(|l| l.starts_with("http://") || l.starts_with("https://"))
    });
    Ok(BookingUpsert {
        external_id: booking.uid.clone(),
        event_uri: None,
        company_id: None,
        title: booking.title.clone(),
        start_time: normalize_time(&booking.start, "start")?,
        end_time: normalize_time(&booking.end, "end")?,
        status: if booking.status.trim().is_empty() {
            "ACCEPTED".to_string()
        } else {
            booking.status.to_uppercase()
        },
        attendee_email: Some(attendee_email.trim().to_lowercase()),
        attendee_name: Some(attendee_name.trim().to_string()),
        meeting_url,
    })
}
