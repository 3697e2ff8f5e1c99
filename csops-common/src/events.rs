//! Event types and EventBus
//!
//! Events are broadcast in-process via a `tokio::sync::broadcast` channel and
//! serialized for SSE delivery. A slow subscriber loses the oldest events
//! rather than blocking publishers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::delivery::DeliveryStatus;
use crate::health::HealthStatus;

/// CS Ops event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CsEvent {
    /// A notification was stored for `user_id`
    NotificationCreated {
        notification_id: String,
        user_id: String,
        kind: String,
        title: String,
        body: String,
        link: Option<String>,
        created_at: String,
    },

    /// A delivery changed status
    DeliveryStatusChanged {
        delivery_id: String,
        company_id: String,
        old_status: DeliveryStatus,
        new_status: DeliveryStatus,
        timestamp: String,
    },

    /// A company's health score was recomputed
    HealthScoreUpdated {
        company_id: String,
        score: i64,
        status: HealthStatus,
        timestamp: String,
    },
}

impl CsEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            CsEvent::NotificationCreated { .. } => "NotificationCreated",
            CsEvent::DeliveryStatusChanged { .. } => "DeliveryStatusChanged",
            CsEvent::HealthScoreUpdated { .. } => "HealthScoreUpdated",
        }
    }

    /// Recipient for user-scoped events
    pub fn recipient(&self) -> Option<&str> {
        match self {
            CsEvent::NotificationCreated { user_id, .. } => Some(user_id),
            _ => None,
        }
    }

    /// Company the event concerns
    pub fn company_id(&self) -> Option<&str> {
        match self {
            CsEvent::NotificationCreated { .. } => None,
            CsEvent::DeliveryStatusChanged { company_id, .. }
            | CsEvent::HealthScoreUpdated { company_id, .. } => Some(company_id),
        }
    }
}

/// Broadcast bus shared by handlers, the scheduler and SSE streams
///
/// # Examples
///
/// ```
/// use csops_common::events::{CsEvent, EventBus};
///
/// let bus = EventBus::new(16);
/// let mut rx = bus.subscribe();
/// bus.emit_lossy(CsEvent::HealthScoreUpdated {
///     company_id: "acme".to_string(),
///     score: 82,
///     status: csops_common::health::HealthStatus::Healthy,
///     timestamp: "2025-01-01T00:00:00.000Z".to_string(),
/// });
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CsEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<CsEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: CsEvent) -> Result<usize, broadcast::error::SendError<CsEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: CsEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
