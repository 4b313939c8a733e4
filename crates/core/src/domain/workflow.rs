use serde::{Deserialize, Serialize};

use crate::domain::employee::{EmployeeId, Role};

/// Scope a workflow template is attached to, from most to least specific.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowScope {
    Section { company: String, department: String, section: String },
    Department { company: String, department: String },
    Company { company: String },
}

impl WorkflowScope {
    /// Higher wins when two templates both cover a requester.
    pub fn specificity(&self) -> u8 {
        match self {
            WorkflowScope::Section { .. } => 3,
            WorkflowScope::Department { .. } => 2,
            WorkflowScope::Company { .. } => 1,
        }
    }
}

/// One configured step of a workflow template: either a concrete approver or
/// a role to be resolved against the requester's scope at build time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateStep {
    pub level: u32,
    pub approver: TemplateApprover,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateApprover {
    User(EmployeeId),
    Role(Role),
}

/// An administrator-configured approver sequence for a section, department,
/// or company.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: String,
    pub scope: WorkflowScope,
    pub steps: Vec<TemplateStep>,
}

/// A manually curated override chain for one specific requester. Takes
/// precedence over every template and over org-structure inference at the
/// levels it defines.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFlow {
    pub requester_id: EmployeeId,
    pub steps: Vec<UserFlowStep>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFlowStep {
    pub level: u32,
    pub approver_id: EmployeeId,
}
