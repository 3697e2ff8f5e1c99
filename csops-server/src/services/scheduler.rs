//! Adoption check scheduler
//!
//! Completing a delivery schedules an ADOPTION survey for later. A background
//! task periodically opens the surveys whose send time has passed and
//! notifies the company's client users.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use csops_common::events::EventBus;
use csops_common::survey::{SurveyKind, SurveyStatus};
use csops_common::{time, Result};

use crate::db::deliveries::Delivery;
use crate::db::surveys::{self, NewSurvey, Survey};

use super::notifier;

/// Create the SCHEDULED adoption survey for a just-completed delivery
pub async fn schedule_adoption_check(
    db: &SqlitePool,
    delivery: &Delivery,
    completed_at: DateTime<Utc>,
    delay_days: i64,
) -> Result<Survey> {
    let send_at = time::to_db(completed_at + Duration::days(delay_days));
    let title = format!("Adoption check: {}", delivery.title);
    let survey = surveys::insert(
        db,
        &NewSurvey {
            company_id: &delivery.company_id,
            kind: SurveyKind::Adoption,
            title: &title,
            status: SurveyStatus::Scheduled,
            delivery_id: Some(&delivery.id),
            send_at: Some(&send_at),
            created_by: None,
        },
    )
    .await?;

    info!(
        delivery_id = %delivery.id,
        survey_id = %survey.id,
        send_at = %send_at,
        "Scheduled adoption check"
    );
    Ok(survey)
}

/// Open every scheduled survey due at `now`; returns how many were opened
///
/// A survey that fails to open stays SCHEDULED and is picked up again on the
/// next run.
pub async fn run_due_checks(db: &SqlitePool, bus: &EventBus, now: DateTime<Utc>) -> Result<usize> {
    let now_db = time::to_db(now);
    let due = surveys::due_scheduled(db, &now_db).await?;
    if due.is_empty() {
        debug!("No adoption checks due");
        return Ok(0);
    }

    let mut opened = 0;
    for survey in due {
        match surveys::open(db, &survey.id, &now_db).await {
            Ok(true) => {
                opened += 1;
                let notified = notifier::survey_opened(db, bus, &survey).await;
                info!(
                    survey_id = %survey.id,
                    company_id = %survey.company_id,
                    notified,
                    "Opened scheduled survey"
                );
            }
            // Opened or removed concurrently
            Ok(false) => {}
            Err(e) => warn!(survey_id = %survey.id, "Failed to open scheduled survey: {}", e),
        }
    }
    Ok(opened)
}

/// Periodic runner for `run_due_checks`
pub struct AdoptionScheduler {
    db: SqlitePool,
    bus: EventBus,
    interval_secs: u64,
}

impl AdoptionScheduler {
    pub fn new(db: SqlitePool, bus: EventBus, interval_secs: u64) -> Self {
        Self {
            db,
            bus,
            interval_secs: interval_secs.max(1),
        }
    }

    /// Spawn the background task; it runs until the runtime shuts down
    pub fn run(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        info!("Starting adoption scheduler (interval: {}s)", self.interval_secs);

        tokio::spawn(async move {
            let mut timer = interval(std::time::Duration::from_secs(self.interval_secs));
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                timer.tick().await;
                if let Err(e) = run_due_checks(&self.db, &self.bus, time::now()).await {
                    error!("Adoption scheduler run failed: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::deliveries::{self, NewDelivery};
    use crate::db::users::{self, NewUser};
    use crate::db::{companies, notifications};
    use csops_common::db::init_memory_database;
    use csops_common::Role;

    #[tokio::test]
    async fn test_scheduled_check_opens_when_due() {
        let db = init_memory_database().await.unwrap();
        let bus = EventBus::new(8);
        let company = companies::insert(&db, "Acme", None, None).await.unwrap();
        let client = users::insert(
            &db,
            &NewUser {
                email: "ana@acme.com",
                name: "Ana",
                password_hash: "x",
                role: Role::ClientMember,
                company_id: Some(&company.id),
            },
        )
        .await
        .unwrap();
        let delivery = deliveries::insert(
            &db,
            &NewDelivery {
                company_id: &company.id,
                title: "CRM rollout",
                description: None,
                due_date: None,
                created_by: None,
            },
        )
        .await
        .unwrap();

        let completed_at = time::now();
        let survey = schedule_adoption_check(&db, &delivery, completed_at, 30)
            .await
            .unwrap();
        assert_eq!(survey.status, "SCHEDULED");
        assert_eq!(survey.kind, "ADOPTION");

        // Not due yet
        let opened = run_due_checks(&db, &bus, completed_at + Duration::days(29))
            .await
            .unwrap();
        assert_eq!(opened, 0);

        let opened = run_due_checks(&db, &bus, completed_at + Duration::days(31))
            .await
            .unwrap();
        assert_eq!(opened, 1);

        let stored = surveys::get(&db, &survey.id).await.unwrap().unwrap();
        assert_eq!(stored.status, "OPEN");
        assert_eq!(notifications::unread_count(&db, &client.id).await.unwrap(), 1);

        // Already open, nothing left to do
        let opened = run_due_checks(&db, &bus, completed_at + Duration::days(32))
            .await
            .unwrap();
        assert_eq!(opened, 0);
    }
}
