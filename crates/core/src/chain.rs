//! Approval-chain assembly for new leave requests.
//!
//! The chain is computed once at submission time and frozen for the life of
//! the request; later org changes never retroactively alter an in-flight
//! chain. `build` is a pure function over its sources, so the dry-run
//! simulation used by admin tooling is the exact same code path.
//!
//! Sources are layered in strict precedence order and merged per level: the
//! first source to claim a level wins, and the overall chain is the union of
//! levels claimed across sources.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::employee::{Employee, EmployeeId, Role};
use crate::domain::leave::{ApprovalStep, StepSource, HR_SENTINEL_LEVEL};
use crate::domain::workflow::{TemplateApprover, UserFlow, WorkflowScope, WorkflowTemplate};
use crate::org::{OrgResolver, OrgSnapshot};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("org snapshot is empty; no approvers can be resolved")]
    EmptySnapshot,
    #[error("requester `{0}` is not an active employee")]
    UnknownRequester(String),
    #[error("no HR manager is configured; cannot route request for `{requester_id}`")]
    NoHrManager { requester_id: String },
    #[error("no approver configured for requester `{requester_id}`")]
    NoApproverConfigured { requester_id: String },
    #[error("workflow step level {level} collides with the reserved HR sentinel level")]
    ReservedLevel { level: u32 },
}

/// What `build` returns for an HR manager or admin requester, whose leave
/// needs no routed approval.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HrSelfApproval {
    /// Empty chain; the request is implicitly approved by its owner.
    Implicit,
    /// A single non-required sentinel entry so the request still shows up in
    /// approval reports.
    AuditOnly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainPolicy {
    pub hr_self_approval: HrSelfApproval,
}

impl Default for ChainPolicy {
    fn default() -> Self {
        Self { hr_self_approval: HrSelfApproval::Implicit }
    }
}

/// Everything chain assembly reads. Loaded by the caller in one shot and
/// treated as immutable for the duration of the build.
#[derive(Clone, Debug, Default)]
pub struct ChainSources {
    pub snapshot: OrgSnapshot,
    pub templates: Vec<WorkflowTemplate>,
    pub user_flow: Option<UserFlow>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ChainBuilder {
    policy: ChainPolicy,
}

impl ChainBuilder {
    pub fn new(policy: ChainPolicy) -> Self {
        Self { policy }
    }

    /// Produce the ordered, deduplicated approval chain for `requester_id`.
    ///
    /// Also the dry-run entry point: nothing is persisted here, so admin
    /// simulation calls this directly.
    pub fn build<S>(
        &self,
        sources: &ChainSources,
        requester_id: &EmployeeId,
        sink: &S,
        correlation_id: &str,
    ) -> Result<Vec<ApprovalStep>, ChainError>
    where
        S: AuditSink,
    {
        if sources.snapshot.is_empty() {
            return Err(ChainError::EmptySnapshot);
        }
        let requester = sources
            .snapshot
            .get(requester_id)
            .ok_or_else(|| ChainError::UnknownRequester(requester_id.0.clone()))?;

        let chain = self.assemble(sources, requester, sink, correlation_id)?;

        sink.emit(
            AuditEvent::new(
                None,
                correlation_id,
                "chain.built",
                AuditCategory::Routing,
                "chain-builder",
                AuditOutcome::Success,
            )
            .with_metadata("requester", requester.id.0.clone())
            .with_metadata("steps", chain.len().to_string()),
        );

        Ok(chain)
    }

    fn assemble<S>(
        &self,
        sources: &ChainSources,
        requester: &Employee,
        sink: &S,
        correlation_id: &str,
    ) -> Result<Vec<ApprovalStep>, ChainError>
    where
        S: AuditSink,
    {
        // HR managers and admins approve their own leave; nothing to route.
        if requester.role.is_self_approving() {
            return Ok(match self.policy.hr_self_approval {
                HrSelfApproval::Implicit => Vec::new(),
                HrSelfApproval::AuditOnly => vec![ApprovalStep {
                    level: HR_SENTINEL_LEVEL,
                    approver_id: requester.id.clone(),
                    approver_role: requester.role,
                    source: StepSource::Fallback,
                    required: false,
                }],
            });
        }

        let sentinel = self.sentinel_step(sources, requester)?;

        // Department managers have no peer-level approver below HR; they
        // skip every template and go straight to the sentinel.
        if requester.role == Role::DeptManager {
            return Ok(vec![sentinel]);
        }

        let mut by_level: BTreeMap<u32, ApprovalStep> = BTreeMap::new();

        if let Some(flow) = sources.user_flow.as_ref().filter(|flow| flow.requester_id == requester.id)
        {
            for step in &flow.steps {
                // Level 99 belongs to the sentinel; a configured step there
                // would duplicate the level and break the ordering.
                if step.level >= HR_SENTINEL_LEVEL {
                    return Err(ChainError::ReservedLevel { level: step.level });
                }
                let Some(approver) = sources.snapshot.get(&step.approver_id) else {
                    // Stale override pointing at a departed employee: skip
                    // the level and leave a trace for the admin.
                    sink.emit(
                        AuditEvent::new(
                            None,
                            correlation_id,
                            "chain.stale_user_flow_step",
                            AuditCategory::Routing,
                            "chain-builder",
                            AuditOutcome::Flagged,
                        )
                        .with_metadata("requester", requester.id.0.clone())
                        .with_metadata("approver", step.approver_id.0.clone())
                        .with_metadata("level", step.level.to_string()),
                    );
                    continue;
                };
                by_level.entry(step.level).or_insert(ApprovalStep {
                    level: step.level,
                    approver_id: approver.id.clone(),
                    approver_role: approver.role,
                    source: StepSource::UserFlow,
                    required: true,
                });
            }
        }

        for template in self.templates_for(sources, requester) {
            for step in &template.steps {
                if step.level >= HR_SENTINEL_LEVEL {
                    return Err(ChainError::ReservedLevel { level: step.level });
                }
                if by_level.contains_key(&step.level) {
                    continue;
                }
                if let Some(approver) = self.resolve_template_approver(sources, template, step, sink, correlation_id)
                {
                    by_level.insert(
                        step.level,
                        ApprovalStep {
                            level: step.level,
                            approver_id: approver.id.clone(),
                            approver_role: approver.role,
                            source: StepSource::Workflow,
                            required: true,
                        },
                    );
                }
            }
        }

        let resolver = OrgResolver::new(&sources.snapshot, sink, correlation_id);
        for (offset, supervisor) in resolver.supervisor_chain(requester).iter().enumerate() {
            let level = offset as u32 + 1;
            by_level.entry(level).or_insert(ApprovalStep {
                level,
                approver_id: supervisor.id.clone(),
                approver_role: supervisor.role,
                source: StepSource::Fallback,
                required: true,
            });
        }

        let mut raw: Vec<ApprovalStep> = by_level.into_values().collect();
        raw.push(sentinel);

        let chain = elide(raw, requester);
        if chain.is_empty() {
            return Err(ChainError::NoApproverConfigured { requester_id: requester.id.0.clone() });
        }
        Ok(chain)
    }

    fn sentinel_step(
        &self,
        sources: &ChainSources,
        requester: &Employee,
    ) -> Result<ApprovalStep, ChainError> {
        let hr_manager = sources
            .snapshot
            .hr_manager()
            .ok_or_else(|| ChainError::NoHrManager { requester_id: requester.id.0.clone() })?;
        Ok(ApprovalStep {
            level: HR_SENTINEL_LEVEL,
            approver_id: hr_manager.id.clone(),
            approver_role: hr_manager.role,
            source: StepSource::Fallback,
            required: true,
        })
    }

    /// Templates covering the requester, most specific scope first.
    fn templates_for<'a>(
        &self,
        sources: &'a ChainSources,
        requester: &Employee,
    ) -> Vec<&'a WorkflowTemplate> {
        let mut matching: Vec<&WorkflowTemplate> = sources
            .templates
            .iter()
            .filter(|template| scope_covers(&template.scope, requester))
            .collect();
        matching.sort_by(|left, right| {
            right
                .scope
                .specificity()
                .cmp(&left.scope.specificity())
                .then_with(|| left.id.cmp(&right.id))
        });
        matching
    }

    fn resolve_template_approver<'a, S>(
        &self,
        sources: &'a ChainSources,
        template: &WorkflowTemplate,
        step: &crate::domain::workflow::TemplateStep,
        sink: &'a S,
        correlation_id: &str,
    ) -> Option<&'a Employee>
    where
        S: AuditSink,
    {
        match &step.approver {
            TemplateApprover::User(id) => sources.snapshot.get(id),
            TemplateApprover::Role(role) => {
                let resolver = OrgResolver::new(&sources.snapshot, sink, correlation_id);
                resolver.resolve_role_in_scope(*role, &template.scope)
            }
        }
    }
}

fn scope_covers(scope: &WorkflowScope, requester: &Employee) -> bool {
    match scope {
        WorkflowScope::Section { company, department, section } => {
            *company == requester.company
                && *department == requester.department
                && requester.section.as_deref() == Some(section.as_str())
        }
        WorkflowScope::Department { company, department } => {
            *company == requester.company && *department == requester.department
        }
        WorkflowScope::Company { company } => *company == requester.company,
    }
}

/// Post-assembly elision: self-approval removal, rank collapse, approver
/// dedupe, then renumbering with the sentinel pinned at its level.
fn elide(raw: Vec<ApprovalStep>, requester: &Employee) -> Vec<ApprovalStep> {
    let requester_rank = requester.rank();
    let mut seen: Vec<EmployeeId> = Vec::new();
    let mut survivors: Vec<ApprovalStep> = Vec::new();

    for step in raw {
        if step.approver_id == requester.id {
            continue;
        }
        if step.approver_role.rank() <= requester_rank {
            continue;
        }
        if seen.contains(&step.approver_id) {
            continue;
        }
        seen.push(step.approver_id.clone());
        survivors.push(step);
    }

    let mut next_level = 1u32;
    for step in &mut survivors {
        if step.level == HR_SENTINEL_LEVEL {
            continue;
        }
        step.level = next_level;
        next_level += 1;
    }
    survivors
}
