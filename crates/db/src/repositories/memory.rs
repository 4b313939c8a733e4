//! In-memory repository implementations with the same conditional-write
//! semantics as the SQL ones. Used by handler tests and the doctor command,
//! never in the serving path.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use furlo_core::domain::employee::{Employee, EmployeeId};
use furlo_core::domain::leave::{ApprovalState, LeaveRequest, LeaveRequestId};
use furlo_core::domain::workflow::{UserFlow, WorkflowTemplate};
use furlo_core::errors::ApplicationError;
use furlo_core::escalation::EscalationStore;

use super::{
    EmployeeRepository, LeaveRequestRepository, RepositoryError, WorkflowRepository,
};

#[derive(Default)]
pub struct InMemoryEmployeeRepository {
    employees: Mutex<Vec<Employee>>,
}

impl InMemoryEmployeeRepository {
    pub fn with_employees(employees: Vec<Employee>) -> Self {
        Self { employees: Mutex::new(employees) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Employee>> {
        match self.employees.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl EmployeeRepository for InMemoryEmployeeRepository {
    async fn list_active(&self) -> Result<Vec<Employee>, RepositoryError> {
        Ok(self.lock().iter().filter(|employee| employee.is_active).cloned().collect())
    }

    async fn find_by_id(&self, id: &EmployeeId) -> Result<Option<Employee>, RepositoryError> {
        Ok(self.lock().iter().find(|employee| &employee.id == id).cloned())
    }

    async fn save(&self, employee: Employee) -> Result<(), RepositoryError> {
        let mut employees = self.lock();
        match employees.iter_mut().find(|existing| existing.id == employee.id) {
            Some(existing) => *existing = employee,
            None => employees.push(employee),
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    templates: Mutex<Vec<WorkflowTemplate>>,
    user_flows: Mutex<HashMap<EmployeeId, UserFlow>>,
}

impl InMemoryWorkflowRepository {
    pub fn with_templates(templates: Vec<WorkflowTemplate>) -> Self {
        Self { templates: Mutex::new(templates), user_flows: Mutex::default() }
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn list_templates(&self) -> Result<Vec<WorkflowTemplate>, RepositoryError> {
        let templates = match self.templates.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(templates.clone())
    }

    async fn find_user_flow(
        &self,
        requester_id: &EmployeeId,
    ) -> Result<Option<UserFlow>, RepositoryError> {
        let flows = match self.user_flows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(flows.get(requester_id).cloned())
    }

    async fn save_template(&self, template: WorkflowTemplate) -> Result<(), RepositoryError> {
        let mut templates = match self.templates.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match templates.iter_mut().find(|existing| existing.id == template.id) {
            Some(existing) => *existing = template,
            None => templates.push(template),
        }
        Ok(())
    }

    async fn save_user_flow(&self, flow: UserFlow) -> Result<(), RepositoryError> {
        let mut flows = match self.user_flows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        flows.insert(flow.requester_id.clone(), flow);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryLeaveRequestRepository {
    requests: Mutex<HashMap<LeaveRequestId, LeaveRequest>>,
}

impl InMemoryLeaveRequestRepository {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<LeaveRequestId, LeaveRequest>> {
        match self.requests.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl LeaveRequestRepository for InMemoryLeaveRequestRepository {
    async fn find_by_id(
        &self,
        id: &LeaveRequestId,
    ) -> Result<Option<LeaveRequest>, RepositoryError> {
        Ok(self.lock().get(id).cloned())
    }

    async fn list_open(&self) -> Result<Vec<LeaveRequest>, RepositoryError> {
        let mut open: Vec<LeaveRequest> = self
            .lock()
            .values()
            .filter(|request| !request.status.is_terminal())
            .cloned()
            .collect();
        open.sort_by(|a, b| (a.created_at, &a.id.0).cmp(&(b.created_at, &b.id.0)));
        Ok(open)
    }

    async fn load_many(
        &self,
        ids: &[LeaveRequestId],
    ) -> Result<Vec<LeaveRequest>, RepositoryError> {
        let requests = self.lock();
        Ok(ids.iter().filter_map(|id| requests.get(id).cloned()).collect())
    }

    async fn insert(&self, request: &LeaveRequest) -> Result<(), RepositoryError> {
        self.lock().insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn apply_transition(
        &self,
        request: &LeaveRequest,
        expected_level: Option<u32>,
    ) -> Result<bool, RepositoryError> {
        let mut requests = self.lock();
        let Some(stored) = requests.get_mut(&request.id) else {
            return Ok(false);
        };
        if stored.status.is_terminal() {
            return Ok(false);
        }
        if let Some(level) = expected_level {
            if stored.current_level != Some(level) {
                return Ok(false);
            }
            // Same approver guard as the SQL store: an escalation re-points
            // the level without moving current_level, and the displaced
            // approver's write must lose.
            let expected_approver = request
                .approvals
                .iter()
                .find(|approval| approval.level == level)
                .map(|approval| &approval.approver_id);
            let stored_approver = stored
                .approvals
                .iter()
                .find(|approval| {
                    approval.level == level && approval.state == ApprovalState::Pending
                })
                .map(|approval| &approval.approver_id);
            if expected_approver.is_none() || expected_approver != stored_approver {
                return Ok(false);
            }
        }
        *stored = request.clone();
        Ok(true)
    }

    async fn apply_escalation(
        &self,
        request: &LeaveRequest,
        expected_level: u32,
    ) -> Result<bool, RepositoryError> {
        let mut requests = self.lock();
        let Some(stored) = requests.get_mut(&request.id) else {
            return Ok(false);
        };
        if stored.status.is_terminal() || stored.current_level != Some(expected_level) {
            return Ok(false);
        }
        let already_escalated = match stored.last_escalated_at {
            Some(marker) => marker >= stored.entered_level_at,
            None => false,
        };
        if already_escalated {
            return Ok(false);
        }
        *stored = request.clone();
        Ok(true)
    }
}

#[async_trait]
impl EscalationStore for InMemoryLeaveRequestRepository {
    async fn list_open_requests(&self) -> Result<Vec<LeaveRequest>, ApplicationError> {
        Ok(self.list_open().await?)
    }

    async fn load_requests(
        &self,
        ids: &[LeaveRequestId],
    ) -> Result<Vec<LeaveRequest>, ApplicationError> {
        Ok(self.load_many(ids).await?)
    }

    async fn persist_escalation(
        &self,
        request: &LeaveRequest,
        expected_level: u32,
    ) -> Result<bool, ApplicationError> {
        Ok(self.apply_escalation(request, expected_level).await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use furlo_core::domain::employee::{Employee, EmployeeId, Role};
    use furlo_core::domain::leave::{
        ApprovalState, ApprovalStep, LeaveRequest, LeaveRequestId, LeaveStatus, StepSource,
        HR_SENTINEL_LEVEL,
    };
    use furlo_core::escalation;

    use super::InMemoryLeaveRequestRepository;
    use crate::repositories::LeaveRequestRepository;

    fn sample_request(id: &str) -> LeaveRequest {
        let chain = vec![
            ApprovalStep {
                level: 1,
                approver_id: EmployeeId("s1".to_string()),
                approver_role: Role::SectionHead,
                source: StepSource::Fallback,
                required: true,
            },
            ApprovalStep {
                level: HR_SENTINEL_LEVEL,
                approver_id: EmployeeId("hr1".to_string()),
                approver_role: Role::HrManager,
                source: StepSource::Fallback,
                required: true,
            },
        ];
        LeaveRequest::submit(
            LeaveRequestId(id.to_string()),
            EmployeeId("e1".to_string()),
            "annual",
            NaiveDate::from_ymd_opt(2026, 7, 6).expect("date"),
            NaiveDate::from_ymd_opt(2026, 7, 8).expect("date"),
            3,
            &chain,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn transition_with_stale_level_is_refused() {
        let repo = InMemoryLeaveRequestRepository::default();
        let mut request = sample_request("lr-1");
        repo.insert(&request).await.expect("insert");

        request.current_level = Some(HR_SENTINEL_LEVEL);
        request.status = LeaveStatus::InProgress;
        assert!(repo.apply_transition(&request, Some(1)).await.expect("apply"));
        assert!(!repo.apply_transition(&request, Some(1)).await.expect("stale"));
    }

    #[tokio::test]
    async fn escalated_level_refuses_the_displaced_approvers_decision() {
        let repo = InMemoryLeaveRequestRepository::default();
        let mut request = sample_request("lr-1");
        repo.insert(&request).await.expect("insert");

        let hr = Employee {
            id: EmployeeId("hr1".to_string()),
            employee_no: "EMP-hr1".to_string(),
            role: Role::HrManager,
            company: "acme".to_string(),
            department: "people".to_string(),
            section: None,
            shift: None,
            is_active: true,
        };
        let mut stale = request.clone();
        escalation::escalate(&mut request, &hr, Utc::now());
        assert!(repo.apply_escalation(&request, 1).await.expect("escalate"));

        // The bypassed section head still tries to decide level 1.
        stale.approvals[0].state = ApprovalState::Approved;
        stale.approvals[0].decided_at = Some(Utc::now());
        stale.status = LeaveStatus::InProgress;
        stale.current_level = Some(HR_SENTINEL_LEVEL);
        assert!(!repo.apply_transition(&stale, Some(1)).await.expect("stale decision"));

        let stored = repo
            .find_by_id(&LeaveRequestId("lr-1".to_string()))
            .await
            .expect("find")
            .expect("exists");
        let pending = stored.pending_approval().expect("level 1 still pending");
        assert_eq!(pending.approver_id.0, "hr1");
        assert_eq!(pending.escalated_from.as_ref().map(|id| id.0.as_str()), Some("s1"));
    }

    #[tokio::test]
    async fn escalation_refused_once_marker_is_set() {
        let repo = InMemoryLeaveRequestRepository::default();
        let mut request = sample_request("lr-1");
        repo.insert(&request).await.expect("insert");

        request.last_escalated_at = Some(Utc::now());
        assert!(repo.apply_escalation(&request, 1).await.expect("first"));
        assert!(!repo.apply_escalation(&request, 1).await.expect("second"));
    }
}
