//! In-app notifications
//!
//! Each notification is stored, then broadcast on the event bus for SSE
//! listeners. Fan-out helpers log failures instead of failing the request
//! that triggered them.

use sqlx::SqlitePool;
use tracing::warn;

use csops_common::events::{CsEvent, EventBus};
use csops_common::Result;

use crate::db::notifications::{self, Notification};
use crate::db::surveys::Survey;
use crate::db::users;

/// Notification categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    ApprovalRequested,
    DeliveryApproved,
    DeliveryRejected,
    DeliveryCompleted,
    CommentAdded,
    SurveyOpened,
    DiagnosticSent,
    DiagnosticAnswered,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::ApprovalRequested => "APPROVAL_REQUESTED",
            Kind::DeliveryApproved => "DELIVERY_APPROVED",
            Kind::DeliveryRejected => "DELIVERY_REJECTED",
            Kind::DeliveryCompleted => "DELIVERY_COMPLETED",
            Kind::CommentAdded => "COMMENT_ADDED",
            Kind::SurveyOpened => "SURVEY_OPENED",
            Kind::DiagnosticSent => "DIAGNOSTIC_SENT",
            Kind::DiagnosticAnswered => "DIAGNOSTIC_ANSWERED",
        }
    }
}

/// Message content shared by every recipient
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: Kind,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
}

impl Message {
    pub fn new(kind: Kind, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            body: body.into(),
            link: None,
        }
    }

    pub fn link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }
}

/// Store one notification and broadcast it
pub async fn notify(
    db: &SqlitePool,
    bus: &EventBus,
    user_id: &str,
    message: &Message,
) -> Result<Notification> {
    let n = notifications::insert(
        db,
        user_id,
        message.kind.as_str(),
        &message.title,
        &message.body,
        message.link.as_deref(),
    )
    .await?;

    bus.emit_lossy(CsEvent::NotificationCreated {
        notification_id: n.id.clone(),
        user_id: n.user_id.clone(),
        kind: n.kind.clone(),
        title: n.title.clone(),
        body: n.body.clone(),
        link: n.link.clone(),
        created_at: n.created_at.clone(),
    });

    Ok(n)
}

/// Notify each user; returns how many notifications were stored
pub async fn notify_all(db: &SqlitePool, bus: &EventBus, user_ids: &[String], message: &Message) -> usize {
    let mut sent = 0;
    for user_id in user_ids {
        match notify(db, bus, user_id, message).await {
            Ok(_) => sent += 1,
            Err(e) => warn!(user_id = %user_id, kind = message.kind.as_str(), "Notification failed: {}", e),
        }
    }
    sent
}

/// Client users of a company (`approvers_only` keeps CLIENT role only)
pub async fn notify_clients(
    db: &SqlitePool,
    bus: &EventBus,
    company_id: &str,
    approvers_only: bool,
    message: &Message,
) -> usize {
    match users::client_user_ids(db, company_id, approvers_only).await {
        Ok(ids) => notify_all(db, bus, &ids, message).await,
        Err(e) => {
            warn!(company_id = %company_id, "Could not load client users: {}", e);
            0
        }
    }
}

/// The company's CS owner, or every admin when the company has none
pub async fn notify_internal(db: &SqlitePool, bus: &EventBus, company_id: &str, message: &Message) -> usize {
    let recipients = match users::owner_user_id(db, company_id).await {
        Ok(Some(owner)) => Ok(vec![owner]),
        Ok(None) => users::admin_user_ids(db).await,
        Err(e) => Err(e),
    };
    match recipients {
        Ok(ids) => notify_all(db, bus, &ids, message).await,
        Err(e) => {
            warn!(company_id = %company_id, "Could not load internal recipients: {}", e);
            0
        }
    }
}

/// Tell a company's client users that a survey is open
pub async fn survey_opened(db: &SqlitePool, bus: &EventBus, survey: &Survey) -> usize {
    let message = Message::new(
        Kind::SurveyOpened,
        "New survey",
        format!("Please answer \"{}\"", survey.title),
    )
    .link(format!("/surveys/{}", survey.id));
    notify_clients(db, bus, &survey.company_id, false, &message).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{companies, users::NewUser};
    use csops_common::access::Role;
    use csops_common::db::init_memory_database;

    #[tokio::test]
    async fn test_notify_stores_and_broadcasts() {
        let db = init_memory_database().await.unwrap();
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        let company = companies::insert(&db, "Acme", None, None).await.unwrap();
        let user = users::insert(
            &db,
            &NewUser {
                email: "ana@acme.com",
                name: "Ana",
                password_hash: "x",
                role: Role::Client,
                company_id: Some(&company.id),
            },
        )
        .await
        .unwrap();

        let message = Message::new(Kind::CommentAdded, "Hi", "Body");
        let sent = notify_clients(&db, &bus, &company.id, false, &message).await;
        assert_eq!(sent, 1);

        match rx.try_recv().unwrap() {
            CsEvent::NotificationCreated { user_id, kind, .. } => {
                assert_eq!(user_id, user.id);
                assert_eq!(kind, "COMMENT_ADDED");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(notifications::unread_count(&db, &user.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_internal_falls_back_to_admins() {
        let db = init_memory_database().await.unwrap();
        let bus = EventBus::new(8);
        let company = companies::insert(&db, "Acme", None, None).await.unwrap();
        let admin = users::insert(
            &db,
            &NewUser {
                email: "root@csops.io",
                name: "Root",
                password_hash: "x",
                role: Role::Admin,
                company_id: None,
            },
        )
        .await
        .unwrap();

        let message = Message::new(Kind::CommentAdded, "Hi", "Body");
        assert_eq!(notify_internal(&db, &bus, &company.id, &message).await, 1);
        assert_eq!(notifications::unread_count(&db, &admin.id).await.unwrap(), 1);
    }
}
