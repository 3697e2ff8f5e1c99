//! Cal.com API v2 client
//!
//! Used for the event-type list, creating bookings on behalf of a client and
//! cancelling. Incoming bookings arrive through the webhook instead.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use csops_common::config::CalComConfig;

use super::{check_status, http_client, join_url, IntegrationError};

/// Version headers required by the v2 endpoints
const EVENT_TYPES_API_VERSION: &str = "2024-06-14";
const BOOKINGS_API_VERSION: &str = "2024-08-13";

/// Request to book an event type for an attendee
#[derive(Debug, Clone, Deserialize)]
pub struct CreateBooking {
    pub event_type_id: i64,
    /// Start instant, RFC 3339 UTC
    pub start: String,
    pub attendee_name: String,
    pub attendee_email: String,
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
}

fn default_time_zone() -> String {
    "UTC".to_string()
}

/// Booking fields we keep from a Cal.com response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalBooking {
    pub uid: String,
    #[serde(default)]
    pub title: String,
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub meeting_url: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Clone)]
pub struct CalComClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl CalComClient {
    pub fn new(config: &CalComConfig) -> Result<Self, IntegrationError> {
        Ok(Self {
            http: http_client()?,
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
        })
    }

    /// GET /event-types
    pub async fn event_types(&self) -> Result<Value, IntegrationError> {
        debug!("Fetching Cal.com event types");
        let response = self
            .http
            .get(join_url(&self.base_url, "event-types"))
            .bearer_auth(&self.api_key)
            .header("cal-api-version", EVENT_TYPES_API_VERSION)
            .send()
            .await?;
        let envelope: Envelope<Value> = check_status(response).await?.json().await?;
        Ok(envelope.data)
    }

    /// POST /bookings
    pub async fn create_booking(&self, request: &CreateBooking) -> Result<CalBooking, IntegrationError> {
        let body = json!({
            "start": request.start,
            "eventTypeId": request.event_type_id,
            "attendee": {
                "name": request.attendee_name,
                "email": request.attendee_email,
                "timeZone": request.time_zone,
            },
        });

        let response = self
            .http
            .post(join_url(&self.base_url, "bookings"))
            .bearer_auth(&self.api_key)
            .header("cal-api-version", BOOKINGS_API_VERSION)
            .json(&body)
            .send()
            .await?;
        let envelope: Envelope<CalBooking> = check_status(response).await?.json().await?;

        info!(uid = %envelope.data.uid, "Created Cal.com booking");
        Ok(envelope.data)
    }

    /// POST /bookings/{uid}/cancel
    pub async fn cancel_booking(&self, uid: &str, reason: &str) -> Result<(), IntegrationError> {
        let response = self
            .http
            .post(join_url(&self.base_url, &format!("bookings/{}/cancel", uid)))
            .bearer_auth(&self.api_key)
            .header("cal-api-version", BOOKINGS_API_VERSION)
            .json(&json!({ "cancellationReason": reason }))
            .send()
            .await?;
        check_status(response).await?;

        info!(uid = %uid, "Cancelled Cal.com booking");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_response_parses() {
        let raw = json!({
            "status": "success",
            "data": {
                "uid": "bk_123",
                "title": "Kickoff",
                "start": "2025-03-01T10:00:00.000Z",
                "end": "2025-03-01T10:30:00.000Z",
                "status": "accepted",
                "meetingUrl": "https://cal.com/video/bk_123"
            }
        });
        let envelope: Envelope<CalBooking> = serde_json::from_value(raw).unwrap();
        assert_eq!(envelope.data.uid, "bk_123");
        assert_eq!(
            envelope.data.meeting_url.as_deref(),
            Some("https://cal.com/video/bk_123")
        );
    }
}
