//! Delivery workflow rules
//!
//! A delivery moves through PENDING, IN_PROGRESS, BLOCKED and COMPLETED.
//! Completion is gated by two approvals held side by side: the internal
//! (admin) approval first, then the client approval. All status changes go
//! through [`DeliveryStatus::can_transition_to`].

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Delivery status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    InProgress,
    Blocked,
    Completed,
}

impl DeliveryStatus {
    pub const ALL: [DeliveryStatus; 4] = [
        DeliveryStatus::Pending,
        DeliveryStatus::InProgress,
        DeliveryStatus::Blocked,
        DeliveryStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::InProgress => "IN_PROGRESS",
            DeliveryStatus::Blocked => "BLOCKED",
            DeliveryStatus::Completed => "COMPLETED",
        }
    }

    /// Transition table for manual status changes.
    ///
    /// IN_PROGRESS -> COMPLETED is absent: completion only happens through
    /// the approval flow. COMPLETED -> IN_PROGRESS is a reopen and needs an
    /// admin (checked by [`change_status`]).
    pub fn can_transition_to(&self, to: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        matches!(
            (self, to),
            (Pending, InProgress)
                | (Pending, Blocked)
                | (InProgress, Pending)
                | (InProgress, Blocked)
                | (Blocked, Pending)
                | (Blocked, InProgress)
                | (Completed, InProgress)
        )
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(DeliveryStatus::Pending),
            "IN_PROGRESS" => Ok(DeliveryStatus::InProgress),
            "BLOCKED" => Ok(DeliveryStatus::Blocked),
            "COMPLETED" => Ok(DeliveryStatus::Completed),
            other => Err(Error::InvalidInput(format!("Unknown delivery status: {}", other))),
        }
    }
}

/// State of one approval gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalState {
    NotRequested,
    Pending,
    Approved,
    Rejected,
}

impl ApprovalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalState::NotRequested => "NOT_REQUESTED",
            ApprovalState::Pending => "PENDING",
            ApprovalState::Approved => "APPROVED",
            ApprovalState::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NOT_REQUESTED" => Ok(ApprovalState::NotRequested),
            "PENDING" => Ok(ApprovalState::Pending),
            "APPROVED" => Ok(ApprovalState::Approved),
            "REJECTED" => Ok(ApprovalState::Rejected),
            other => Err(Error::InvalidInput(format!("Unknown approval state: {}", other))),
        }
    }
}

/// Workflow-relevant fields of a delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowState {
    pub status: DeliveryStatus,
    pub admin_approval: ApprovalState,
    pub client_approval: ApprovalState,
    pub progress: i64,
    pub blocked_reason: Option<String>,
    pub completed_at: Option<String>,
}

impl WorkflowState {
    /// State of a freshly created delivery
    pub fn new() -> Self {
        Self {
            status: DeliveryStatus::Pending,
            admin_approval: ApprovalState::NotRequested,
            client_approval: ApprovalState::NotRequested,
            progress: 0,
            blocked_reason: None,
            completed_at: None,
        }
    }

    /// Waiting on the client to approve
    pub fn awaiting_client(&self) -> bool {
        self.admin_approval == ApprovalState::Approved
            && self.client_approval == ApprovalState::Pending
    }
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::new()
    }
}

/// Inputs to a manual status change
#[derive(Debug, Clone, Default)]
pub struct StatusChange {
    pub to: Option<DeliveryStatus>,
    pub blocked_reason: Option<String>,
    /// Caller is ADMIN (required to reopen)
    pub actor_is_admin: bool,
    /// Every dependency of the delivery is COMPLETED
    pub dependencies_satisfied: bool,
}

/// Validate a progress value (0..=100)
pub fn validate_progress(progress: i64) -> Result<i64> {
    if !(0..=100).contains(&progress) {
        return Err(Error::InvalidInput(format!(
            "progress must be between 0 and 100, got {}",
            progress
        )));
    }
    Ok(progress)
}

/// Apply a progress update; a COMPLETED delivery stays at 100
pub fn change_progress(state: &WorkflowState, progress: i64) -> Result<WorkflowState> {
    let progress = validate_progress(progress)?;
    if state.status == DeliveryStatus::Completed && progress != 100 {
        return Err(Error::Conflict(
            "Progress of a COMPLETED delivery is fixed at 100; reopen it first".to_string(),
        ));
    }
    Ok(WorkflowState {
        progress,
        ..state.clone()
    })
}

fn required_reason(reason: Option<String>) -> Result<String> {
    reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .ok_or_else(|| Error::InvalidInput("blocked_reason is required when blocking".to_string()))
}

/// Apply a manual status change
pub fn change_status(state: &WorkflowState, change: StatusChange) -> Result<WorkflowState> {
    let Some(to) = change.to else {
        return Ok(state.clone());
    };
    if to == state.status {
        // Re-blocking only updates the reason
        if to == DeliveryStatus::Blocked && change.blocked_reason.is_some() {
            return Ok(WorkflowState {
                blocked_reason: Some(required_reason(change.blocked_reason)?),
                ..state.clone()
            });
        }
        return Ok(state.clone());
    }

    if !state.status.can_transition_to(to) {
        let hint = if to == DeliveryStatus::Completed {
            " (completion requires admin and client approval)"
        } else {
            ""
        };
        return Err(Error::Conflict(format!(
            "Cannot move delivery from {} to {}{}",
            state.status, to, hint
        )));
    }

    let mut next = state.clone();
    next.status = to;

    match to {
        DeliveryStatus::InProgress => {
            if !change.dependencies_satisfied {
                return Err(Error::Conflict(
                    "Delivery has unfinished dependencies".to_string(),
                ));
            }
            if state.status == DeliveryStatus::Completed {
                if !change.actor_is_admin {
                    return Err(Error::Forbidden(
                        "Only an admin can reopen a completed delivery".to_string(),
                    ));
                }
                next.admin_approval = ApprovalState::NotRequested;
                next.client_approval = ApprovalState::NotRequested;
                next.completed_at = None;
            }
            next.blocked_reason = None;
        }
        DeliveryStatus::Blocked => {
            next.blocked_reason = Some(required_reason(change.blocked_reason)?);
        }
        DeliveryStatus::Pending => {
            next.blocked_reason = None;
        }
        DeliveryStatus::Completed => unreachable!("not in the transition table"),
    }

    // Leaving IN_PROGRESS abandons any approval round in flight
    if to != DeliveryStatus::InProgress {
        next.admin_approval = ApprovalState::NotRequested;
        next.client_approval = ApprovalState::NotRequested;
    }

    Ok(next)
}

/// Start an approval round
pub fn request_approval(state: &WorkflowState) -> Result<WorkflowState> {
    if state.status != DeliveryStatus::InProgress {
        return Err(Error::Conflict(format!(
            "Approval can only be requested for IN_PROGRESS deliveries (currently {})",
            state.status
        )));
    }
    if state.admin_approval == ApprovalState::Pending || state.awaiting_client() {
        return Err(Error::Conflict("An approval round is already open".to_string()));
    }

    let mut next = state.clone();
    next.admin_approval = ApprovalState::Pending;
    next.client_approval = ApprovalState::NotRequested;
    Ok(next)
}

/// Internal approval decision
pub fn admin_decision(state: &WorkflowState, approved: bool) -> Result<WorkflowState> {
    if state.admin_approval != ApprovalState::Pending {
        return Err(Error::Conflict(format!(
            "Admin approval is not pending (currently {})",
            state.admin_approval
        )));
    }

    let mut next = state.clone();
    if approved {
        next.admin_approval = ApprovalState::Approved;
        next.client_approval = ApprovalState::Pending;
    } else {
        next.admin_approval = ApprovalState::Rejected;
        next.client_approval = ApprovalState::NotRequested;
    }
    Ok(next)
}

/// Client approval decision; approving completes the delivery at `now`
pub fn client_decision(
    state: &WorkflowState,
    approved: bool,
    comment: Option<&str>,
    now: &str,
) -> Result<WorkflowState> {
    if !state.awaiting_client() {
        return Err(Error::Conflict(format!(
            "Client approval is not pending (admin {}, client {})",
            state.admin_approval, state.client_approval
        )));
    }

    let mut next = state.clone();
    if approved {
        next.client_approval = ApprovalState::Approved;
        next.status = DeliveryStatus::Completed;
        next.progress = 100;
        next.completed_at = Some(now.to_string());
        next.blocked_reason = None;
    } else {
        if comment.map(|c| c.trim().is_empty()).unwrap_or(true) {
            return Err(Error::InvalidInput(
                "A comment is required when rejecting a delivery".to_string(),
            ));
        }
        next.client_approval = ApprovalState::Rejected;
        next.admin_approval = ApprovalState::NotRequested;
        next.status = DeliveryStatus::InProgress;
    }
    Ok(next)
}

// ========================================
// Dependency graph
// ========================================

/// Whether adding `delivery -> depends_on` would close a cycle.
///
/// `edges` are existing `(delivery, depends_on)` pairs. A cycle appears iff
/// `depends_on` already (transitively) depends on `delivery`.
pub fn would_create_cycle(edges: &[(String, String)], delivery: &str, depends_on: &str) -> bool {
    if delivery == depends_on {
        return true;
    }

    let mut graph: HashMap<&str, Vec<&str>> = HashMap::new();
    for (from, to) in edges {
        graph.entry(from.as_str()).or_default().push(to.as_str());
    }

    let mut stack = vec![depends_on];
    let mut seen = HashSet::new();
    while let Some(node) = stack.pop() {
        if node == delivery {
            return true;
        }
        if !seen.insert(node) {
            continue;
        }
        if let Some(next) = graph.get(node) {
            stack.extend(next.iter().copied());
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: &str = "2025-05-01T12:00:00.000Z";

    fn in_progress() -> WorkflowState {
        WorkflowState {
            status: DeliveryStatus::InProgress,
            progress: 40,
            ..WorkflowState::new()
        }
    }

    fn to(status: DeliveryStatus) -> StatusChange {
        StatusChange {
            to: Some(status),
            dependencies_satisfied: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_transition_table() {
        use DeliveryStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(Blocked.can_transition_to(InProgress));
        assert!(Completed.can_transition_to(InProgress));
        assert!(!InProgress.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Blocked));
    }

    #[test]
    fn test_start_requires_dependencies() {
        let state = WorkflowState::new();
        let change = StatusChange {
            to: Some(DeliveryStatus::InProgress),
            dependencies_satisfied: false,
            ..Default::default()
        };
        assert!(matches!(change_status(&state, change), Err(Error::Conflict(_))));

        let next = change_status(&state, to(DeliveryStatus::InProgress)).unwrap();
        assert_eq!(next.status, DeliveryStatus::InProgress);
    }

    #[test]
    fn test_block_requires_reason_and_unblock_clears_it() {
        let state = in_progress();
        assert!(matches!(
            change_status(&state, to(DeliveryStatus::Blocked)),
            Err(Error::InvalidInput(_))
        ));

        let blocked = change_status(
            &state,
            StatusChange {
                blocked_reason: Some("  waiting on API keys ".to_string()),
                ..to(DeliveryStatus::Blocked)
            },
        )
        .unwrap();
        assert_eq!(blocked.blocked_reason.as_deref(), Some("waiting on API keys"));

        let resumed = change_status(&blocked, to(DeliveryStatus::InProgress)).unwrap();
        assert_eq!(resumed.blocked_reason, None);
    }

    #[test]
    fn test_manual_completion_rejected() {
        let err = change_status(&in_progress(), to(DeliveryStatus::Completed)).unwrap_err();
        assert!(err.to_string().contains("approval"));
    }

    #[test]
    fn test_full_approval_flow_completes() {
        let requested = request_approval(&in_progress()).unwrap();
        assert_eq!(requested.admin_approval, ApprovalState::Pending);

        let admin_ok = admin_decision(&requested, true).unwrap();
        assert!(admin_ok.awaiting_client());

        let done = client_decision(&admin_ok, true, None, NOW).unwrap();
        assert_eq!(done.status, DeliveryStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.completed_at.as_deref(), Some(NOW));
    }

    #[test]
    fn test_client_cannot_approve_before_admin() {
        let requested = request_approval(&in_progress()).unwrap();
        assert!(matches!(
            client_decision(&requested, true, None, NOW),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn test_client_rejection_needs_comment_and_resets_round() {
        let admin_ok = admin_decision(&request_approval(&in_progress()).unwrap(), true).unwrap();
        assert!(matches!(
            client_decision(&admin_ok, false, Some("  "), NOW),
            Err(Error::InvalidInput(_))
        ));

        let rejected = client_decision(&admin_ok, false, Some("Missing export"), NOW).unwrap();
        assert_eq!(rejected.status, DeliveryStatus::InProgress);
        assert_eq!(rejected.client_approval, ApprovalState::Rejected);
        assert_eq!(rejected.admin_approval, ApprovalState::NotRequested);

        // A new round can start after a rejection
        assert!(request_approval(&rejected).is_ok());
    }

    #[test]
    fn test_admin_rejection() {
        let requested = request_approval(&in_progress()).unwrap();
        let rejected = admin_decision(&requested, false).unwrap();
        assert_eq!(rejected.admin_approval, ApprovalState::Rejected);
        assert!(admin_decision(&rejected, true).is_err());
    }

    #[test]
    fn test_double_request_conflicts() {
        let requested = request_approval(&in_progress()).unwrap();
        assert!(request_approval(&requested).is_err());
        assert!(request_approval(&WorkflowState::new()).is_err());
    }

    #[test]
    fn test_reopen_needs_admin_and_resets_approvals() {
        let admin_ok = admin_decision(&request_approval(&in_progress()).unwrap(), true).unwrap();
        let done = client_decision(&admin_ok, true, None, NOW).unwrap();

        assert!(matches!(
            change_status(&done, to(DeliveryStatus::InProgress)),
            Err(Error::Forbidden(_))
        ));

        let reopened = change_status(
            &done,
            StatusChange {
                actor_is_admin: true,
                ..to(DeliveryStatus::InProgress)
            },
        )
        .unwrap();
        assert_eq!(reopened.status, DeliveryStatus::InProgress);
        assert_eq!(reopened.admin_approval, ApprovalState::NotRequested);
        assert_eq!(reopened.client_approval, ApprovalState::NotRequested);
        assert_eq!(reopened.completed_at, None);
    }

    #[test]
    fn test_blocking_abandons_open_round() {
        let requested = request_approval(&in_progress()).unwrap();
        let blocked = change_status(
            &requested,
            StatusChange {
                blocked_reason: Some("vendor outage".to_string()),
                ..to(DeliveryStatus::Blocked)
            },
        )
        .unwrap();
        assert_eq!(blocked.admin_approval, ApprovalState::NotRequested);
    }

    #[test]
    fn test_progress_bounds() {
        assert_eq!(validate_progress(0).unwrap(), 0);
        assert_eq!(validate_progress(100).unwrap(), 100);
        assert!(validate_progress(101).is_err());
        assert!(validate_progress(-1).is_err());
    }

    #[test]
    fn test_completed_progress_is_pinned() {
        let admin_ok = admin_decision(&request_approval(&in_progress()).unwrap(), true).unwrap();
        let done = client_decision(&admin_ok, true, None, NOW).unwrap();
        assert_eq!(done.progress, 100);

        assert!(matches!(change_progress(&done, 10), Err(Error::Conflict(_))));
        assert_eq!(change_progress(&done, 100).unwrap(), done);
        assert_eq!(change_progress(&in_progress(), 75).unwrap().progress, 75);
        assert!(matches!(change_progress(&in_progress(), 150), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_reblocking_updates_reason() {
        let blocked = change_status(
            &in_progress(),
            StatusChange {
                blocked_reason: Some("waiting on API keys".to_string()),
                ..to(DeliveryStatus::Blocked)
            },
        )
        .unwrap();

        let updated = change_status(
            &blocked,
            StatusChange {
                blocked_reason: Some("waiting on legal".to_string()),
                ..to(DeliveryStatus::Blocked)
            },
        )
        .unwrap();
        assert_eq!(updated.status, DeliveryStatus::Blocked);
        assert_eq!(updated.blocked_reason.as_deref(), Some("waiting on legal"));

        // No reason given leaves the old one alone
        let unchanged = change_status(&updated, to(DeliveryStatus::Blocked)).unwrap();
        assert_eq!(unchanged, updated);

        assert!(matches!(
            change_status(
                &updated,
                StatusChange {
                    blocked_reason: Some("   ".to_string()),
                    ..to(DeliveryStatus::Blocked)
                },
            ),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_cycle_detection() {
        let edges = vec![
            ("b".to_string(), "a".to_string()),
            ("c".to_string(), "b".to_string()),
        ];
        // a -> c would close a -> c -> b -> a
        assert!(would_create_cycle(&edges, "a", "c"));
        assert!(would_create_cycle(&edges, "a", "a"));
        assert!(!would_create_cycle(&edges, "c", "a"));
        assert!(!would_create_cycle(&edges, "d", "c"));
    }
}
