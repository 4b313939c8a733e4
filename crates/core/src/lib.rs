pub mod audit;
pub mod chain;
pub mod config;
pub mod domain;
pub mod errors;
pub mod escalation;
pub mod lifecycle;
pub mod org;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
pub use chain::{ChainBuilder, ChainError, ChainPolicy, ChainSources, HrSelfApproval};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::employee::{Employee, EmployeeId, Role};
pub use domain::leave::{
    Approval, ApprovalState, ApprovalStep, LeaveRequest, LeaveRequestId, LeaveStatus, StepSource,
    HR_SENTINEL_LEVEL,
};
pub use domain::workflow::{
    TemplateApprover, TemplateStep, UserFlow, UserFlowStep, WorkflowScope, WorkflowTemplate,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use escalation::{EscalationPolicy, EscalationStore, SweepReport, Sweeper};
pub use lifecycle::{
    Decision, InMemoryNotificationSink, NoopNotificationSink, NotificationEvent, NotificationKind,
    NotificationSink, TransitionError,
};
pub use org::{OrgResolver, OrgSnapshot};
