//! Server-Sent Events: the caller's own notifications
//!
//! Browsers cannot set headers on `EventSource`, so the token may also be
//! passed as `?access_token=`.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use csops_common::events::CsEvent;

use crate::AppState;

use super::AuthUser;

const KEEP_ALIVE_SECS: u64 = 15;

/// Whether `event` goes to `user_id`'s stream
fn is_for(event: &CsEvent, user_id: &str) -> bool {
    event.recipient() == Some(user_id)
}

/// GET /api/events
pub async fn event_stream(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let user_id = auth.principal.user_id;
    info!(user_id = %user_id, "SSE client connected");
    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("ConnectionStatus").data("connected"));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if !is_for(&event, &user_id) {
                        continue;
                    }
                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            debug!(user_id = %user_id, "SSE: sending {}", event.event_type());
                            yield Ok(Event::default().event(event.event_type()).data(json));
                        }
                        Err(e) => warn!("Failed to serialize event: {}", e),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(user_id = %user_id, skipped, "SSE subscriber lagged");
                }
                Err(RecvError::Closed) => {
                    debug!("Event bus closed, ending SSE stream");
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(KEEP_ALIVE_SECS))
            .text("heartbeat"),
    )
}

pub fn sse_routes() -> Router<AppState> {
    Router::new().route("/api/events", get(event_stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use csops_common::delivery::DeliveryStatus;

    fn notification(user_id: &str) -> CsEvent {
        CsEvent::NotificationCreated {
            notification_id: "n1".to_string(),
            user_id: user_id.to_string(),
            kind: "COMMENT_ADDED".to_string(),
            title: "New comment".to_string(),
            body: "Hello".to_string(),
            link: None,
            created_at: "2025-01-01T00:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn test_only_own_notifications_are_streamed() {
        assert!(is_for(&notification("u1"), "u1"));
        assert!(!is_for(&notification("u2"), "u1"));

        let status = CsEvent::DeliveryStatusChanged {
            delivery_id: "d1".to_string(),
            company_id: "c1".to_string(),
            old_status: DeliveryStatus::Pending,
            new_status: DeliveryStatus::InProgress,
            timestamp: "2025-01-01T00:00:00.000Z".to_string(),
        };
        assert!(!is_for(&status, "u1"));
    }
}
