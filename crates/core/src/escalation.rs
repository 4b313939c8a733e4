//! Escalation sweep: force-unstick requests whose current pending level has
//! waited longer than the configured cutoff.
//!
//! The sweeper owns no timer. A scheduler (or an administrator) calls
//! [`Sweeper::sweep`] whenever it wants a pass; running it twice in a row is
//! safe because escalation is guarded by the `last_escalated_at` marker and
//! the store's conditional write. One request failing never blocks the rest
//! of the batch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::employee::Employee;
use crate::domain::leave::{ApprovalState, LeaveRequest, LeaveRequestId};
use crate::errors::ApplicationError;
use crate::lifecycle::{NotificationEvent, NotificationKind};
use crate::org::OrgSnapshot;

/// Reporting buckets for "pending N+ days" visibility. Purely informational;
/// the action cutoff is [`EscalationPolicy::threshold_days`].
pub const REPORT_BUCKET_DAYS: [i64; 3] = [2, 3, 7];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// A request becomes escalatable once it has been pending at its current
    /// level for strictly more than this many days.
    pub threshold_days: i64,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self { threshold_days: 2 }
    }
}

/// Whole days the request has sat at its current level.
pub fn pending_days(request: &LeaveRequest, now: DateTime<Utc>) -> i64 {
    (now - request.entered_level_at).num_days()
}

/// Eligibility for the timer-driven sweep: open, stale beyond the cutoff,
/// not already escalated at this level, and not already pointing at the HR
/// manager.
pub fn is_escalatable(
    request: &LeaveRequest,
    hr_manager: &Employee,
    policy: EscalationPolicy,
    now: DateTime<Utc>,
) -> bool {
    if request.status.is_terminal() || request.current_level.is_none() {
        return false;
    }
    if pending_days(request, now) <= policy.threshold_days {
        return false;
    }
    needs_escalation(request, hr_manager)
}

fn needs_escalation(request: &LeaveRequest, hr_manager: &Employee) -> bool {
    if let Some(escalated_at) = request.last_escalated_at {
        // Escalated since the request entered this level: nothing to do.
        if escalated_at >= request.entered_level_at {
            return false;
        }
    }
    match request.pending_approval() {
        Some(approval) => approval.approver_id != hr_manager.id,
        None => false,
    }
}

/// Re-point the current pending approval at the HR manager, keeping the
/// bypassed approver visible in `escalated_from`.
pub fn escalate(
    request: &mut LeaveRequest,
    hr_manager: &Employee,
    now: DateTime<Utc>,
) -> NotificationEvent {
    if let Some(level) = request.current_level {
        if let Some(approval) = request
            .approvals
            .iter_mut()
            .find(|approval| approval.level == level && approval.state == ApprovalState::Pending)
        {
            approval.escalated_from = Some(approval.approver_id.clone());
            approval.approver_id = hr_manager.id.clone();
            approval.approver_role = hr_manager.role;
        }
    }
    request.last_escalated_at = Some(now);
    NotificationEvent {
        request_id: request.id.clone(),
        recipient: hr_manager.id.clone(),
        kind: NotificationKind::Escalated,
    }
}

/// Persistence seam the sweeper writes through. Implemented over the leave
/// store; the conditional write is what makes concurrent decisions safe.
#[async_trait]
pub trait EscalationStore: Send + Sync {
    /// All non-terminal requests with a current pending level.
    async fn list_open_requests(&self) -> Result<Vec<LeaveRequest>, ApplicationError>;

    async fn load_requests(
        &self,
        ids: &[LeaveRequestId],
    ) -> Result<Vec<LeaveRequest>, ApplicationError>;

    /// Write an escalated request back, but only if the stored row is still
    /// pending at `expected_level` and not already escalated at that level.
    /// Returns false when the guard fails (a decision or another sweep won
    /// the race); that is a per-ID skip, not an error.
    async fn persist_escalation(
        &self,
        request: &LeaveRequest,
        expected_level: u32,
    ) -> Result<bool, ApplicationError>;
}

/// Per-ID outcome of one sweep pass. `skipped` covers requests that looked
/// stale when listed but were already handled; `failed` covers lost
/// conditional writes and per-ID store errors.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub escalated: Vec<LeaveRequestId>,
    pub skipped: Vec<LeaveRequestId>,
    pub failed: Vec<LeaveRequestId>,
    #[serde(skip)]
    pub notifications: Vec<NotificationEvent>,
}

pub struct Sweeper<'a, St, Si> {
    store: &'a St,
    sink: &'a Si,
    policy: EscalationPolicy,
}

impl<'a, St, Si> Sweeper<'a, St, Si>
where
    St: EscalationStore,
    Si: AuditSink,
{
    pub fn new(store: &'a St, sink: &'a Si, policy: EscalationPolicy) -> Self {
        Self { store, sink, policy }
    }

    /// Timer-driven pass over every open request.
    pub async fn sweep(
        &self,
        snapshot: &OrgSnapshot,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, ApplicationError> {
        let hr_manager = Self::hr_manager(snapshot)?;
        let candidates: Vec<LeaveRequest> = self
            .store
            .list_open_requests()
            .await?
            .into_iter()
            .filter(|request| {
                !request.status.is_terminal()
                    && request.current_level.is_some()
                    && pending_days(request, now) > self.policy.threshold_days
            })
            .collect();
        self.escalate_batch(candidates, hr_manager, now, "sweep").await
    }

    /// Administrator-selected subset. Same action and the same idempotence
    /// guarantee, but the staleness cutoff is not applied.
    pub async fn sweep_ids(
        &self,
        snapshot: &OrgSnapshot,
        ids: &[LeaveRequestId],
        now: DateTime<Utc>,
    ) -> Result<SweepReport, ApplicationError> {
        let hr_manager = Self::hr_manager(snapshot)?;
        let candidates: Vec<LeaveRequest> = self
            .store
            .load_requests(ids)
            .await?
            .into_iter()
            .filter(|request| !request.status.is_terminal() && request.current_level.is_some())
            .collect();
        self.escalate_batch(candidates, hr_manager, now, "manual").await
    }

    fn hr_manager(snapshot: &OrgSnapshot) -> Result<&Employee, ApplicationError> {
        snapshot.hr_manager().ok_or_else(|| {
            ApplicationError::Configuration(
                "no HR manager configured; escalation has no target".to_string(),
            )
        })
    }

    async fn escalate_batch(
        &self,
        candidates: Vec<LeaveRequest>,
        hr_manager: &Employee,
        now: DateTime<Utc>,
        trigger: &str,
    ) -> Result<SweepReport, ApplicationError> {
        let mut report = SweepReport::default();

        for mut request in candidates {
            let id = request.id.clone();
            if !needs_escalation(&request, hr_manager) {
                report.skipped.push(id);
                continue;
            }
            let Some(expected_level) = request.current_level else {
                report.skipped.push(id);
                continue;
            };
            let original_approver = request
                .pending_approval()
                .map(|approval| approval.approver_id.0.clone())
                .unwrap_or_default();

            let notification = escalate(&mut request, hr_manager, now);

            match self.store.persist_escalation(&request, expected_level).await {
                Ok(true) => {
                    self.sink.emit(
                        AuditEvent::new(
                            Some(id.clone()),
                            trigger,
                            "escalation.applied",
                            AuditCategory::Escalation,
                            "escalation-sweeper",
                            AuditOutcome::Success,
                        )
                        .with_metadata("level", expected_level.to_string())
                        .with_metadata("bypassed_approver", original_approver)
                        .with_metadata("hr_manager", hr_manager.id.0.clone()),
                    );
                    report.notifications.push(notification);
                    report.escalated.push(id);
                }
                Ok(false) => {
                    // A decision or an overlapping sweep landed first.
                    self.sink.emit(
                        AuditEvent::new(
                            Some(id.clone()),
                            trigger,
                            "escalation.lost_race",
                            AuditCategory::Escalation,
                            "escalation-sweeper",
                            AuditOutcome::Failed,
                        )
                        .with_metadata("level", expected_level.to_string()),
                    );
                    report.failed.push(id);
                }
                Err(error) => {
                    self.sink.emit(
                        AuditEvent::new(
                            Some(id.clone()),
                            trigger,
                            "escalation.write_failed",
                            AuditCategory::Escalation,
                            "escalation-sweeper",
                            AuditOutcome::Failed,
                        )
                        .with_metadata("error", error.to_string()),
                    );
                    report.failed.push(id);
                }
            }
        }

        Ok(report)
    }
}
