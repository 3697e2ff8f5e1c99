//! Company health score
//!
//! Four components on a 0-100 scale, each optional: a component with no
//! underlying signal is left out and the remaining weights are renormalized.
//!
//! | component    | weight |
//! |--------------|--------|
//! | delivery     | 0.35   |
//! | satisfaction | 0.25   |
//! | engagement   | 0.20   |
//! | adoption     | 0.20   |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Score used when no signal exists at all
pub const NEUTRAL_SCORE: i64 = 60;

const DELIVERY_WEIGHT: f64 = 0.35;
const SATISFACTION_WEIGHT: f64 = 0.25;
const ENGAGEMENT_WEIGHT: f64 = 0.20;
const ADOPTION_WEIGHT: f64 = 0.20;

/// Health bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Attention,
    AtRisk,
    Critical,
}

impl HealthStatus {
    pub const ALL: [HealthStatus; 4] = [
        HealthStatus::Healthy,
        HealthStatus::Attention,
        HealthStatus::AtRisk,
        HealthStatus::Critical,
    ];

    /// ≥80 HEALTHY, ≥60 ATTENTION, ≥40 AT_RISK, otherwise CRITICAL
    pub fn from_score(score: i64) -> Self {
        match score {
            s if s >= 80 => HealthStatus::Healthy,
            s if s >= 60 => HealthStatus::Attention,
            s if s >= 40 => HealthStatus::AtRisk,
            _ => HealthStatus::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "HEALTHY",
            HealthStatus::Attention => "ATTENTION",
            HealthStatus::AtRisk => "AT_RISK",
            HealthStatus::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "HEALTHY" => Ok(HealthStatus::Healthy),
            "ATTENTION" => Ok(HealthStatus::Attention),
            "AT_RISK" => Ok(HealthStatus::AtRisk),
            "CRITICAL" => Ok(HealthStatus::Critical),
            other => Err(Error::InvalidInput(format!("Unknown health status: {}", other))),
        }
    }
}

/// Delivery counts for one company
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryCounts {
    pub total: i64,
    pub completed: i64,
    pub in_progress: i64,
    pub blocked: i64,
    pub overdue: i64,
}

/// Raw signals the score is derived from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthSignals {
    pub deliveries: DeliveryCounts,
    /// NPS answers (0-10) within the lookback window
    pub nps_scores: Vec<i64>,
    /// CSAT answers (1-5) within the lookback window
    pub csat_scores: Vec<i64>,
    /// Non-cancelled meetings in the last 30 days; None when the company
    /// has never booked a meeting
    pub recent_meetings: Option<i64>,
    /// Adoption answers already mapped to 0-100
    pub adoption_scores: Vec<i64>,
}

/// Component breakdown plus the final score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthBreakdown {
    pub delivery: Option<f64>,
    pub satisfaction: Option<f64>,
    pub engagement: Option<f64>,
    pub adoption: Option<f64>,
    pub score: i64,
    pub status: HealthStatus,
}

fn mean(values: &[i64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<i64>() as f64 / values.len() as f64)
    }
}

/// Net Promoter Score (-100..=100) of 0-10 answers, None when empty
pub fn net_promoter_score(scores: &[i64]) -> Option<i64> {
    if scores.is_empty() {
        return None;
    }
    let promoters = scores.iter().filter(|s| **s >= 9).count() as f64;
    let detractors = scores.iter().filter(|s| **s <= 6).count() as f64;
    let total = scores.len() as f64;
    Some(((promoters - detractors) / total * 100.0).round() as i64)
}

fn delivery_component(counts: &DeliveryCounts) -> Option<f64> {
    if counts.total <= 0 {
        return None;
    }
    let base = 100.0 * (counts.completed as f64 + 0.5 * counts.in_progress as f64)
        / counts.total as f64;
    let penalty = 10.0 * counts.blocked as f64 + 5.0 * counts.overdue as f64;
    Some((base - penalty).clamp(0.0, 100.0))
}

fn satisfaction_component(nps: &[i64], csat: &[i64]) -> Option<f64> {
    let nps_part = net_promoter_score(nps).map(|n| (n as f64 + 100.0) / 2.0);
    let csat_part = mean(csat).map(|avg| ((avg - 1.0) / 4.0 * 100.0).clamp(0.0, 100.0));

    match (nps_part, csat_part) {
        (Some(a), Some(b)) => Some((a + b) / 2.0),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn engagement_component(meetings: i64) -> f64 {
    (20.0 + 40.0 * meetings.max(0) as f64).min(100.0)
}

/// Compute the health breakdown from signals
pub fn compute(signals: &HealthSignals) -> HealthBreakdown {
    let delivery = delivery_component(&signals.deliveries);
    let satisfaction = satisfaction_component(&signals.nps_scores, &signals.csat_scores);
    let engagement = signals.recent_meetings.map(engagement_component);
    let adoption = mean(&signals.adoption_scores);

    let weighted = [
        (delivery, DELIVERY_WEIGHT),
        (satisfaction, SATISFACTION_WEIGHT),
        (engagement, ENGAGEMENT_WEIGHT),
        (adoption, ADOPTION_WEIGHT),
    ];

    let (sum, weight) = weighted
        .iter()
        .filter_map(|(value, w)| value.map(|v| (v * w, *w)))
        .fold((0.0, 0.0), |(s, tw), (v, w)| (s + v, tw + w));

    let score = if weight > 0.0 {
        (sum / weight).round() as i64
    } else {
        NEUTRAL_SCORE
    };

    HealthBreakdown {
        delivery,
        satisfaction,
        engagement,
        adoption,
        score,
        status: HealthStatus::from_score(score),
    }
}
