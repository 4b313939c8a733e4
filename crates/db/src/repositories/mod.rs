use async_trait::async_trait;
use thiserror::Error;

use furlo_core::audit::AuditEvent;
use furlo_core::domain::employee::{Employee, EmployeeId};
use furlo_core::domain::leave::{LeaveRequest, LeaveRequestId};
use furlo_core::domain::workflow::{UserFlow, WorkflowTemplate};

pub mod audit;
pub mod employee;
pub mod leave_request;
pub mod memory;
pub mod workflow;

pub use audit::SqlAuditEventRepository;
pub use employee::SqlEmployeeRepository;
pub use leave_request::SqlLeaveRequestRepository;
pub use memory::{InMemoryEmployeeRepository, InMemoryLeaveRequestRepository, InMemoryWorkflowRepository};
pub use workflow::SqlWorkflowRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for furlo_core::ApplicationError {
    fn from(value: RepositoryError) -> Self {
        furlo_core::ApplicationError::Persistence(value.to_string())
    }
}

/// Read contract over the employee store. The engine never creates or
/// mutates employees; `save` exists for fixtures and admin import tooling.
#[async_trait]
pub trait EmployeeRepository: Send + Sync {
    async fn list_active(&self) -> Result<Vec<Employee>, RepositoryError>;
    async fn find_by_id(&self, id: &EmployeeId) -> Result<Option<Employee>, RepositoryError>;
    async fn save(&self, employee: Employee) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn list_templates(&self) -> Result<Vec<WorkflowTemplate>, RepositoryError>;
    async fn find_user_flow(
        &self,
        requester_id: &EmployeeId,
    ) -> Result<Option<UserFlow>, RepositoryError>;
    async fn save_template(&self, template: WorkflowTemplate) -> Result<(), RepositoryError>;
    async fn save_user_flow(&self, flow: UserFlow) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait LeaveRequestRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &LeaveRequestId,
    ) -> Result<Option<LeaveRequest>, RepositoryError>;

    async fn list_open(&self) -> Result<Vec<LeaveRequest>, RepositoryError>;

    async fn load_many(
        &self,
        ids: &[LeaveRequestId],
    ) -> Result<Vec<LeaveRequest>, RepositoryError>;

    /// First write of a freshly built request with its frozen chain.
    async fn insert(&self, request: &LeaveRequest) -> Result<(), RepositoryError>;

    /// Conditional write of a decided or cancelled request: succeeds only if
    /// the stored row still has `expected_level` as its current level (or,
    /// for cancellation from a settled state, is still non-terminal).
    /// Returns false when a concurrent write won the race.
    async fn apply_transition(
        &self,
        request: &LeaveRequest,
        expected_level: Option<u32>,
    ) -> Result<bool, RepositoryError>;

    /// Conditional write of an escalated request; guards on level and the
    /// not-yet-escalated marker in one statement.
    async fn apply_escalation(
        &self,
        request: &LeaveRequest,
        expected_level: u32,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait AuditEventRepository: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<(), RepositoryError>;

    async fn record_all(&self, events: &[AuditEvent]) -> Result<(), RepositoryError> {
        for event in events {
            self.record(event).await?;
        }
        Ok(())
    }

    async fn list_for_request(
        &self,
        request_id: &LeaveRequestId,
    ) -> Result<Vec<AuditEvent>, RepositoryError>;
}
