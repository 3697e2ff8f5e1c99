//! Health score recalculation
//!
//! Gathers a company's signals from the database, scores them with
//! `csops_common::health::compute`, persists the result and broadcasts
//! `HealthScoreUpdated`.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use csops_common::events::{CsEvent, EventBus};
use csops_common::health::{self, HealthBreakdown, HealthSignals};
use csops_common::survey::SurveyKind;
use csops_common::{time, Result};

use crate::db::{bookings, companies, deliveries, surveys};

/// Satisfaction window
const SATISFACTION_DAYS: i64 = 90;
/// Engagement window
const ENGAGEMENT_DAYS: i64 = 30;

pub async fn gather_signals(db: &SqlitePool, company_id: &str, now: DateTime<Utc>) -> Result<HealthSignals> {
    let satisfaction_since = time::to_db(now - Duration::days(SATISFACTION_DAYS));
    let engagement_since = time::to_db(now - Duration::days(ENGAGEMENT_DAYS));
    let now_db = time::to_db(now);

    Ok(HealthSignals {
        deliveries: deliveries::counts_for_company(db, company_id, now.date_naive()).await?,
        nps_scores: surveys::company_scores_since(db, company_id, SurveyKind::Nps, Some(&satisfaction_since))
            .await?,
        csat_scores: surveys::company_scores_since(db, company_id, SurveyKind::Csat, Some(&satisfaction_since))
            .await?,
        recent_meetings: bookings::recent_meeting_count(db, company_id, &engagement_since, &now_db).await?,
        adoption_scores: surveys::company_scores_since(db, company_id, SurveyKind::Adoption, None).await?,
    })
}

/// Recompute, persist and broadcast a company's health score
pub async fn recalculate(db: &SqlitePool, bus: &EventBus, company_id: &str) -> Result<HealthBreakdown> {
    let now = time::now();
    let signals = gather_signals(db, company_id, now).await?;
    let breakdown = health::compute(&signals);
    let at = time::to_db(now);

    companies::set_health(db, company_id, breakdown.score, breakdown.status, &at).await?;
    debug!(
        company_id = %company_id,
        score = breakdown.score,
        status = breakdown.status.as_str(),
        "Health score updated"
    );

    bus.emit_lossy(CsEvent::HealthScoreUpdated {
        company_id: company_id.to_string(),
        score: breakdown.score,
        status: breakdown.status,
        timestamp: at,
    });

    Ok(breakdown)
}

/// Recalculate after a triggering event; failures are only logged
pub async fn refresh(db: &SqlitePool, bus: &EventBus, company_id: &str) {
    if let Err(e) = recalculate(db, bus, company_id).await {
        warn!(company_id = %company_id, "Health recalculation failed: {}", e);
    }
}
