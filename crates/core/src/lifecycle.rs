//! Leave-request lifecycle: submission settlement, approve/reject decisions
//! and requester cancellation.
//!
//! All functions here are pure over the request value; persistence and its
//! concurrency guards live with the caller. Re-submitting a decision for an
//! already-decided level is a state conflict, never a silent success; the
//! caller surfaces it so the UI prompts a refresh.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::employee::EmployeeId;
use crate::domain::leave::{ApprovalState, LeaveRequest, LeaveRequestId, LeaveStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("request is {status:?} and can no longer change")]
    TerminalState { status: LeaveStatus },
    #[error("level {level} is not the current pending level")]
    LevelNotCurrent { level: u32 },
    #[error("`{actor}` is not the pending approver (expected `{expected}`)")]
    NotCurrentApprover { actor: String, expected: String },
    #[error("only the requester may cancel; `{actor}` is not `{requester}`")]
    NotRequester { actor: String, requester: String },
    #[error("request has no pending approval at its current level")]
    NoPendingApproval,
}

/// Outbound notification produced by a transition. Delivery is the caller's
/// concern; the engine only says who must hear what, and never waits on it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub request_id: LeaveRequestId,
    pub recipient: EmployeeId,
    pub kind: NotificationKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Sent to the approver whose level just became current.
    AwaitingDecision,
    Approved,
    Rejected,
    Cancelled,
    /// Sent to the HR manager when the sweeper re-points a stale level.
    Escalated,
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: NotificationEvent);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotificationSink;

impl NotificationSink for NoopNotificationSink {
    fn notify(&self, _event: NotificationEvent) {}
}

/// Captures dispatched notifications for assertions in tests.
#[derive(Clone, Default)]
pub struct InMemoryNotificationSink {
    events: std::sync::Arc<std::sync::Mutex<Vec<NotificationEvent>>>,
}

impl InMemoryNotificationSink {
    pub fn events(&self) -> Vec<NotificationEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn notify(&self, event: NotificationEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Settle a freshly materialized request: auto-approve non-required entries
/// (HR self-approval in audit-only mode) and finalize requests whose chain
/// demands nothing, otherwise notify the first pending approver.
pub fn settle_submission(request: &mut LeaveRequest, now: DateTime<Utc>) -> Vec<NotificationEvent> {
    for approval in &mut request.approvals {
        if !approval.required && approval.state == ApprovalState::Pending {
            approval.state = ApprovalState::Approved;
            approval.decided_at = Some(now);
            approval.comment = Some("self-approved".to_string());
        }
    }

    let first_required = request
        .approvals
        .iter()
        .find(|approval| approval.required && approval.state == ApprovalState::Pending);

    match first_required {
        Some(approval) => {
            request.current_level = Some(approval.level);
            request.entered_level_at = now;
            vec![NotificationEvent {
                request_id: request.id.clone(),
                recipient: approval.approver_id.clone(),
                kind: NotificationKind::AwaitingDecision,
            }]
        }
        None => {
            request.status = LeaveStatus::Approved;
            request.current_level = None;
            vec![NotificationEvent {
                request_id: request.id.clone(),
                recipient: request.requester_id.clone(),
                kind: NotificationKind::Approved,
            }]
        }
    }
}

/// Apply an approver's decision at `level`.
///
/// The level must be the request's current pending level and the actor its
/// assigned approver; anything else is a state conflict the UI resolves by
/// refreshing.
pub fn decide<S>(
    request: &mut LeaveRequest,
    level: u32,
    actor: &EmployeeId,
    decision: Decision,
    comment: Option<String>,
    now: DateTime<Utc>,
    sink: &S,
    correlation_id: &str,
) -> Result<Vec<NotificationEvent>, TransitionError>
where
    S: AuditSink,
{
    if request.status.is_terminal() {
        return Err(TransitionError::TerminalState { status: request.status.clone() });
    }

    let current_level = request.current_level.ok_or(TransitionError::NoPendingApproval)?;
    if level != current_level {
        return Err(TransitionError::LevelNotCurrent { level });
    }
    let pending_index = request
        .approvals
        .iter()
        .position(|approval| {
            approval.level == current_level && approval.state == ApprovalState::Pending
        })
        .ok_or(TransitionError::NoPendingApproval)?;

    if request.approvals[pending_index].approver_id != *actor {
        return Err(TransitionError::NotCurrentApprover {
            actor: actor.0.clone(),
            expected: request.approvals[pending_index].approver_id.0.clone(),
        });
    }

    let mut notifications = Vec::new();
    match decision {
        Decision::Approve => {
            {
                let approval = &mut request.approvals[pending_index];
                approval.state = ApprovalState::Approved;
                approval.decided_at = Some(now);
                approval.comment = comment;
            }
            let next = request.approvals[pending_index + 1..]
                .iter()
                .find(|approval| approval.required && approval.state == ApprovalState::Pending);
            match next {
                Some(approval) => {
                    request.status = LeaveStatus::InProgress;
                    request.current_level = Some(approval.level);
                    request.entered_level_at = now;
                    notifications.push(NotificationEvent {
                        request_id: request.id.clone(),
                        recipient: approval.approver_id.clone(),
                        kind: NotificationKind::AwaitingDecision,
                    });
                }
                None => {
                    request.status = LeaveStatus::Approved;
                    request.current_level = None;
                    notifications.push(NotificationEvent {
                        request_id: request.id.clone(),
                        recipient: request.requester_id.clone(),
                        kind: NotificationKind::Approved,
                    });
                }
            }
        }
        Decision::Reject => {
            // Remaining levels stay pending but become unreachable; they are
            // moot, not decided.
            {
                let approval = &mut request.approvals[pending_index];
                approval.state = ApprovalState::Rejected;
                approval.decided_at = Some(now);
                approval.comment = comment;
            }
            request.status = LeaveStatus::Rejected;
            request.current_level = None;
            notifications.push(NotificationEvent {
                request_id: request.id.clone(),
                recipient: request.requester_id.clone(),
                kind: NotificationKind::Rejected,
            });
        }
    }

    sink.emit(
        AuditEvent::new(
            Some(request.id.clone()),
            correlation_id,
            "lifecycle.decided",
            AuditCategory::Lifecycle,
            actor.0.clone(),
            match decision {
                Decision::Approve => AuditOutcome::Success,
                Decision::Reject => AuditOutcome::Rejected,
            },
        )
        .with_metadata("decision", decision.as_str())
        .with_metadata("level", current_level.to_string())
        .with_metadata("status", request.status.as_str()),
    );

    Ok(notifications)
}

/// Cancel a request. Only the requester may cancel, and only while the
/// request is still open; a cancel racing a concurrent decision loses with a
/// terminal-state conflict.
pub fn cancel<S>(
    request: &mut LeaveRequest,
    actor: &EmployeeId,
    sink: &S,
    correlation_id: &str,
) -> Result<Vec<NotificationEvent>, TransitionError>
where
    S: AuditSink,
{
    if *actor != request.requester_id {
        return Err(TransitionError::NotRequester {
            actor: actor.0.clone(),
            requester: request.requester_id.0.clone(),
        });
    }
    if request.status.is_terminal() {
        return Err(TransitionError::TerminalState { status: request.status.clone() });
    }

    let pending_approver =
        request.pending_approval().map(|approval| approval.approver_id.clone());

    request.status = LeaveStatus::Cancelled;
    request.current_level = None;

    let mut notifications = vec![NotificationEvent {
        request_id: request.id.clone(),
        recipient: request.requester_id.clone(),
        kind: NotificationKind::Cancelled,
    }];
    if let Some(approver) = pending_approver {
        notifications.push(NotificationEvent {
            request_id: request.id.clone(),
            recipient: approver,
            kind: NotificationKind::Cancelled,
        });
    }

    sink.emit(
        AuditEvent::new(
            Some(request.id.clone()),
            correlation_id,
            "lifecycle.cancelled",
            AuditCategory::Lifecycle,
            actor.0.clone(),
            AuditOutcome::Success,
        )
        .with_metadata("status", request.status.as_str()),
    );

    Ok(notifications)
}
