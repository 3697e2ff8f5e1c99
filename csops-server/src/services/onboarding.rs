//! Onboarding progression from stored signals

use sqlx::SqlitePool;
use tracing::{info, warn};

use csops_common::onboarding::{self, OnboardingSignals, OnboardingStep};
use csops_common::{Error, Result};

use crate::db::{bookings, companies, deliveries, diagnostics};

pub async fn signals(db: &SqlitePool, company_id: &str) -> Result<OnboardingSignals> {
    Ok(OnboardingSignals {
        kickoff_booked: bookings::has_active_booking(db, company_id).await?,
        diagnostic_answered: diagnostics::company_has_response(db, company_id).await?,
        delivery_completed: deliveries::has_completed(db, company_id).await?,
    })
}

/// Advance the company as far as its signals allow; returns the step reached
pub async fn evaluate(db: &SqlitePool, company_id: &str) -> Result<OnboardingStep> {
    let company = companies::get(db, company_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Company {}", company_id)))?;
    let current = company.onboarding()?;
    let signals = signals(db, company_id).await?;
    let next = onboarding::next_step(current, &signals);

    if next != current {
        companies::set_onboarding_step(db, company_id, next).await?;
        info!(
            company_id = %company_id,
            from = current.as_str(),
            to = next.as_str(),
            "Onboarding advanced"
        );
    }
    Ok(next)
}

/// Evaluate after a triggering event; failures are only logged
pub async fn refresh(db: &SqlitePool, company_id: &str) {
    if let Err(e) = evaluate(db, company_id).await {
        warn!(company_id = %company_id, "Onboarding evaluation failed: {}", e);
    }
}

/// Manual single-step advance
pub async fn advance(db: &SqlitePool, company_id: &str, current: OnboardingStep) -> Result<OnboardingStep> {
    let next = onboarding::advance_one(current)?;
    companies::set_onboarding_step(db, company_id, next).await?;
    info!(company_id = %company_id, to = next.as_str(), "Onboarding advanced manually");
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::bookings::{BookingUpsert, Provider};
    use csops_common::db::init_memory_database;

    #[tokio::test]
    async fn test_booking_moves_to_kickoff() {
        let db = init_memory_database().await.unwrap();
        let company = companies::insert(&db, "Acme", None, None).await.unwrap();

        assert_eq!(evaluate(&db, &company.id).await.unwrap(), OnboardingStep::Welcome);

        bookings::upsert(
            &db,
            Provider::Calcom,
            &BookingUpsert {
                external_id: "bk_1".to_string(),
                company_id: Some(company.id.clone()),
                title: "Kickoff".to_string(),
                start_time: "2025-03-01T10:00:00.000Z".to_string(),
                end_time: "2025-03-01T10:30:00.000Z".to_string(),
                status: "ACCEPTED".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(
            evaluate(&db, &company.id).await.unwrap(),
            OnboardingStep::KickoffScheduled
        );
        let stored = companies::get(&db, &company.id).await.unwrap().unwrap();
        assert_eq!(stored.onboarding_step, "KICKOFF_SCHEDULED");
    }

    #[tokio::test]
    async fn test_manual_advance_stops_at_completed() {
        let db = init_memory_database().await.unwrap();
        let company = companies::insert(&db, "Acme", None, None).await.unwrap();

        let next = advance(&db, &company.id, OnboardingStep::Welcome).await.unwrap();
        assert_eq!(next, OnboardingStep::KickoffScheduled);
        assert!(matches!(
            advance(&db, &company.id, OnboardingStep::Completed).await,
            Err(Error::Conflict(_))
        ));
    }
}
