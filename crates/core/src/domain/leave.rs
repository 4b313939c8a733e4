use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::employee::{EmployeeId, Role};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaveRequestId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveStatus {
    Pending,
    InProgress,
    Approved,
    Rejected,
    Cancelled,
}

impl LeaveStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LeaveStatus::Approved | LeaveStatus::Rejected | LeaveStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveStatus::Pending => "pending",
            LeaveStatus::InProgress => "in_progress",
            LeaveStatus::Approved => "approved",
            LeaveStatus::Rejected => "rejected",
            LeaveStatus::Cancelled => "cancelled",
        }
    }
}

/// Where a chain step came from. Closed set so a new source cannot sneak in
/// without the compiler pointing at every match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepSource {
    UserFlow,
    Workflow,
    Fallback,
}

impl StepSource {
    pub fn as_str(self) -> &'static str {
        match self {
            StepSource::UserFlow => "user_flow",
            StepSource::Workflow => "workflow",
            StepSource::Fallback => "fallback",
        }
    }
}

/// The terminal HR Manager catch-all keeps this level no matter how many
/// steps precede it.
pub const HR_SENTINEL_LEVEL: u32 = 99;

/// One step of a frozen approval chain, materialized per request at
/// submission time. Levels are strictly increasing except the sentinel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub level: u32,
    pub approver_id: EmployeeId,
    pub approver_role: Role,
    pub source: StepSource,
    pub required: bool,
}

impl ApprovalStep {
    pub fn is_sentinel(&self) -> bool {
        self.level == HR_SENTINEL_LEVEL
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalState::Pending => "pending",
            ApprovalState::Approved => "approved",
            ApprovalState::Rejected => "rejected",
        }
    }
}

/// A chain step plus its decision record. Lower-level entries are immutable
/// once decided; at most one entry per request is pending at a time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub level: u32,
    pub approver_id: EmployeeId,
    pub approver_role: Role,
    pub source: StepSource,
    pub required: bool,
    pub state: ApprovalState,
    pub decided_at: Option<DateTime<Utc>>,
    pub comment: Option<String>,
    /// Original approver identity when the sweeper re-pointed this level to
    /// the HR manager; kept so the bypass stays visible in reports.
    pub escalated_from: Option<EmployeeId>,
}

impl Approval {
    pub fn from_step(step: &ApprovalStep) -> Self {
        Self {
            level: step.level,
            approver_id: step.approver_id.clone(),
            approver_role: step.approver_role,
            source: step.source,
            required: step.required,
            state: ApprovalState::Pending,
            decided_at: None,
            comment: None,
            escalated_from: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub id: LeaveRequestId,
    pub requester_id: EmployeeId,
    pub leave_type: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_days: u32,
    pub status: LeaveStatus,
    /// Level of the approval currently awaiting a decision; `None` exactly
    /// when status is terminal.
    pub current_level: Option<u32>,
    /// When the request entered its current level; the sweeper's staleness
    /// clock.
    pub entered_level_at: DateTime<Utc>,
    pub last_escalated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub approvals: Vec<Approval>,
}

impl LeaveRequest {
    /// Materialize a request from a frozen chain. The chain was validated by
    /// the builder; the first step becomes the current level.
    pub fn submit(
        id: LeaveRequestId,
        requester_id: EmployeeId,
        leave_type: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        total_days: u32,
        chain: &[ApprovalStep],
        now: DateTime<Utc>,
    ) -> Self {
        let approvals: Vec<Approval> = chain.iter().map(Approval::from_step).collect();
        let current_level = approvals.first().map(|approval| approval.level);
        Self {
            id,
            requester_id,
            leave_type: leave_type.into(),
            start_date,
            end_date,
            total_days,
            status: LeaveStatus::Pending,
            current_level,
            entered_level_at: now,
            last_escalated_at: None,
            created_at: now,
            approvals,
        }
    }

    pub fn pending_approval(&self) -> Option<&Approval> {
        let level = self.current_level?;
        self.approvals
            .iter()
            .find(|approval| approval.level == level && approval.state == ApprovalState::Pending)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::{
        ApprovalState, ApprovalStep, LeaveRequest, LeaveRequestId, LeaveStatus, StepSource,
        HR_SENTINEL_LEVEL,
    };
    use crate::domain::employee::{EmployeeId, Role};

    fn step(level: u32, approver: &str, role: Role) -> ApprovalStep {
        ApprovalStep {
            level,
            approver_id: EmployeeId(approver.to_string()),
            approver_role: role,
            source: StepSource::Fallback,
            required: true,
        }
    }

    #[test]
    fn submit_points_current_level_at_first_step() {
        let chain = vec![
            step(1, "s1", Role::SectionHead),
            step(2, "m1", Role::DeptManager),
            step(HR_SENTINEL_LEVEL, "hr1", Role::HrManager),
        ];
        let request = LeaveRequest::submit(
            LeaveRequestId("lr-1".to_string()),
            EmployeeId("e1".to_string()),
            "annual",
            NaiveDate::from_ymd_opt(2026, 3, 2).expect("date"),
            NaiveDate::from_ymd_opt(2026, 3, 4).expect("date"),
            3,
            &chain,
            Utc::now(),
        );

        assert_eq!(request.status, LeaveStatus::Pending);
        assert_eq!(request.current_level, Some(1));
        assert_eq!(request.approvals.len(), 3);
        assert!(request
            .approvals
            .iter()
            .all(|approval| approval.state == ApprovalState::Pending));
        assert_eq!(
            request.pending_approval().map(|approval| approval.approver_id.0.as_str()),
            Some("s1")
        );
    }

    #[test]
    fn sentinel_step_is_recognized() {
        assert!(step(HR_SENTINEL_LEVEL, "hr1", Role::HrManager).is_sentinel());
        assert!(!step(1, "s1", Role::SectionHead).is_sentinel());
    }
}
