//! Onboarding step sequencing
//!
//! WELCOME -> KICKOFF_SCHEDULED -> DIAGNOSTIC_COMPLETED
//!   -> FIRST_DELIVERY_APPROVED -> COMPLETED
//!
//! Automatic evaluation only ever moves forward, through every consecutive
//! step whose condition is already met.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnboardingStep {
    Welcome,
    KickoffScheduled,
    DiagnosticCompleted,
    FirstDeliveryApproved,
    Completed,
}

impl OnboardingStep {
    pub const ORDER: [OnboardingStep; 5] = [
        OnboardingStep::Welcome,
        OnboardingStep::KickoffScheduled,
        OnboardingStep::DiagnosticCompleted,
        OnboardingStep::FirstDeliveryApproved,
        OnboardingStep::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OnboardingStep::Welcome => "WELCOME",
            OnboardingStep::KickoffScheduled => "KICKOFF_SCHEDULED",
            OnboardingStep::DiagnosticCompleted => "DIAGNOSTIC_COMPLETED",
            OnboardingStep::FirstDeliveryApproved => "FIRST_DELIVERY_APPROVED",
            OnboardingStep::Completed => "COMPLETED",
        }
    }

    fn index(&self) -> usize {
        Self::ORDER
            .iter()
            .position(|s| s == self)
            .unwrap_or(Self::ORDER.len() - 1)
    }

    /// The following step, None at COMPLETED
    pub fn next(&self) -> Option<OnboardingStep> {
        Self::ORDER.get(self.index() + 1).copied()
    }
}

impl fmt::Display for OnboardingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OnboardingStep {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ORDER
            .iter()
            .find(|step| step.as_str() == s)
            .copied()
            .ok_or_else(|| Error::InvalidInput(format!("Unknown onboarding step: {}", s)))
    }
}

/// Facts that unlock onboarding steps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingSignals {
    pub kickoff_booked: bool,
    pub diagnostic_answered: bool,
    pub delivery_completed: bool,
}

impl OnboardingSignals {
    /// Whether the condition for entering `step` holds
    fn unlocks(&self, step: OnboardingStep) -> bool {
        match step {
            OnboardingStep::Welcome => true,
            OnboardingStep::KickoffScheduled => self.kickoff_booked,
            OnboardingStep::DiagnosticCompleted => self.diagnostic_answered,
            OnboardingStep::FirstDeliveryApproved => self.delivery_completed,
            // Completion follows the first approved delivery
            OnboardingStep::Completed => self.delivery_completed,
        }
    }
}

/// Advance through every consecutive unlocked step; never moves backwards
pub fn next_step(current: OnboardingStep, signals: &OnboardingSignals) -> OnboardingStep {
    let mut step = current;
    while let Some(candidate) = step.next() {
        if !signals.unlocks(candidate) {
            break;
        }
        step = candidate;
    }
    step
}

/// Manual advance by exactly one step
pub fn advance_one(current: OnboardingStep) -> Result<OnboardingStep> {
    current
        .next()
        .ok_or_else(|| Error::Conflict("Onboarding is already completed".to_string()))
}

/// One row of the onboarding checklist
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepView {
    pub step: OnboardingStep,
    pub done: bool,
    pub current: bool,
}

/// Checklist view for `current`
pub fn checklist(current: OnboardingStep) -> Vec<StepView> {
    OnboardingStep::ORDER
        .iter()
        .map(|step| StepView {
            step: *step,
            done: *step < current || current == OnboardingStep::Completed,
            current: *step == current,
        })
        .collect()
}
