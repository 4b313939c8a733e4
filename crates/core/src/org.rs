//! Supervisory-relationship inference over a read-only employee snapshot.
//!
//! The employee store keeps no manager foreign key; supervision is recomputed
//! from role + scope attributes on every operation. The snapshot is loaded
//! once per operation and never mutated, so resolution stays a pure function
//! of its input order.
//!
//! Scope rules are asymmetric on purpose: supervisor inference ignores
//! `company` (a department shared across legal entities keeps a single point
//! of escalation) while subordinate inference requires a company match. Do
//! not "fix" one side without the other.

use std::collections::HashMap;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::employee::{Employee, EmployeeId, Role};
use crate::domain::workflow::WorkflowScope;

/// Point-in-time view of the active workforce, in the store's stable order.
/// Inactive rows are dropped on construction so every resolution sees the
/// same population.
#[derive(Clone, Debug, Default)]
pub struct OrgSnapshot {
    employees: Vec<Employee>,
    index_by_id: HashMap<String, usize>,
}

impl OrgSnapshot {
    pub fn new(employees: Vec<Employee>) -> Self {
        let employees: Vec<Employee> =
            employees.into_iter().filter(|employee| employee.is_active).collect();
        let index_by_id = employees
            .iter()
            .enumerate()
            .map(|(index, employee)| (employee.id.0.clone(), index))
            .collect();
        Self { employees, index_by_id }
    }

    pub fn is_empty(&self) -> bool {
        self.employees.is_empty()
    }

    pub fn len(&self) -> usize {
        self.employees.len()
    }

    pub fn get(&self, id: &EmployeeId) -> Option<&Employee> {
        self.index_by_id.get(&id.0).map(|&index| &self.employees[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Employee> {
        self.employees.iter()
    }

    /// First active HR manager in snapshot order, if any is configured.
    pub fn hr_manager(&self) -> Option<&Employee> {
        self.employees.iter().find(|employee| employee.role == Role::HrManager)
    }
}

pub struct OrgResolver<'a, S> {
    snapshot: &'a OrgSnapshot,
    sink: &'a S,
    correlation_id: String,
}

impl<'a, S> OrgResolver<'a, S>
where
    S: AuditSink,
{
    pub fn new(snapshot: &'a OrgSnapshot, sink: &'a S, correlation_id: impl Into<String>) -> Self {
        Self { snapshot, sink, correlation_id: correlation_id.into() }
    }

    pub fn snapshot(&self) -> &OrgSnapshot {
        self.snapshot
    }

    /// Inferred supervisors of `employee`, nearest first.
    ///
    /// A missing supervisor at any level shortens the chain; it is never an
    /// error. Duplicate role+scope matches are resolved first-in-snapshot and
    /// flagged as a data-integrity condition.
    pub fn supervisor_chain(&self, employee: &Employee) -> Vec<&'a Employee> {
        if employee.role.is_chain_root() {
            return Vec::new();
        }

        let mut chain = Vec::new();

        if matches!(employee.role, Role::Employee | Role::ShiftSupervisor) {
            if let Some(section) = &employee.section {
                if let Some(head) = self.unique_match(Role::SectionHead, |candidate| {
                    candidate.department == employee.department
                        && candidate.section.as_deref() == Some(section.as_str())
                }) {
                    if head.id != employee.id {
                        chain.push(head);
                    }
                }
            }
        }

        if let Some(manager) = self.unique_match(Role::DeptManager, |candidate| {
            candidate.department == employee.department
        }) {
            if manager.id != employee.id {
                chain.push(manager);
            }
        }

        chain
    }

    /// Inverse mapping: everyone `employee` supervises. Unlike
    /// `supervisor_chain`, matching here requires the same `company`.
    pub fn subordinates_of(&self, employee: &Employee) -> Vec<&'a Employee> {
        let same_scope = |candidate: &Employee| {
            candidate.company == employee.company && candidate.department == employee.department
        };

        match employee.role {
            Role::DeptManager => self
                .snapshot
                .iter()
                .filter(|candidate| same_scope(candidate) && candidate.id != employee.id)
                .collect(),
            Role::SectionHead => self
                .snapshot
                .iter()
                .filter(|candidate| {
                    same_scope(candidate)
                        && candidate.section == employee.section
                        && candidate.role != Role::DeptManager
                        && candidate.id != employee.id
                })
                .collect(),
            Role::ShiftSupervisor => self
                .snapshot
                .iter()
                .filter(|candidate| {
                    same_scope(candidate)
                        && candidate.section == employee.section
                        && candidate.shift == employee.shift
                        && candidate.role != Role::DeptManager
                        && candidate.role != Role::SectionHead
                        && candidate.id != employee.id
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Resolve a role-addressed template step against the scope the template
    /// is attached to. Templates are explicit configuration, so unlike
    /// supervisor inference the company boundary is honored here.
    pub fn resolve_role_in_scope(&self, role: Role, scope: &WorkflowScope) -> Option<&'a Employee> {
        self.unique_match(role, |candidate| match scope {
            WorkflowScope::Section { company, department, section } => {
                candidate.company == *company
                    && candidate.department == *department
                    && candidate.section.as_deref() == Some(section.as_str())
            }
            WorkflowScope::Department { company, department } => {
                candidate.company == *company && candidate.department == *department
            }
            WorkflowScope::Company { company } => candidate.company == *company,
        })
    }

    /// First snapshot entry with `role` matching `filter`. More than one
    /// match should not happen in a well-formed org; the resolver proceeds
    /// deterministically and flags the anomaly instead of failing.
    fn unique_match(
        &self,
        role: Role,
        filter: impl Fn(&Employee) -> bool,
    ) -> Option<&'a Employee> {
        let mut matches =
            self.snapshot.iter().filter(|candidate| candidate.role == role && filter(candidate));

        let first = matches.next()?;
        let extra_count = matches.count();
        if extra_count > 0 {
            self.sink.emit(
                AuditEvent::new(
                    None,
                    self.correlation_id.clone(),
                    "org.duplicate_scope_match",
                    AuditCategory::Routing,
                    "org-resolver",
                    AuditOutcome::Flagged,
                )
                .with_metadata("role", role.as_str())
                .with_metadata("department", first.department.clone())
                .with_metadata("picked", first.id.0.clone())
                .with_metadata("extra_matches", extra_count.to_string()),
            );
        }
        Some(first)
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditOutcome, InMemoryAuditSink};
    use crate::domain::employee::{Employee, EmployeeId, Role};
    use crate::org::{OrgResolver, OrgSnapshot};

    fn worker(
        id: &str,
        role: Role,
        company: &str,
        department: &str,
        section: Option<&str>,
        shift: Option<&str>,
    ) -> Employee {
        Employee {
            id: EmployeeId(id.to_string()),
            employee_no: format!("EMP-{id}"),
            role,
            company: company.to_string(),
            department: department.to_string(),
            section: section.map(str::to_string),
            shift: shift.map(str::to_string),
            is_active: true,
        }
    }

    fn plant_snapshot() -> OrgSnapshot {
        OrgSnapshot::new(vec![
            worker("e1", Role::Employee, "acme", "assembly", Some("line-a"), Some("day")),
            worker("e2", Role::Employee, "acme", "assembly", Some("line-a"), Some("night")),
            worker("sup1", Role::ShiftSupervisor, "acme", "assembly", Some("line-a"), Some("day")),
            worker("s1", Role::SectionHead, "acme", "assembly", Some("line-a"), None),
            worker("m1", Role::DeptManager, "acme", "assembly", None, None),
            worker("hr1", Role::HrManager, "acme", "people", None, None),
            // Same department under a different legal entity.
            worker("x1", Role::Employee, "globex", "assembly", Some("line-a"), Some("day")),
        ])
    }

    #[test]
    fn employee_routes_through_section_head_then_dept_manager() {
        let snapshot = plant_snapshot();
        let sink = InMemoryAuditSink::default();
        let resolver = OrgResolver::new(&snapshot, &sink, "test");

        let e1 = snapshot.get(&EmployeeId("e1".to_string())).expect("e1");
        let chain: Vec<&str> =
            resolver.supervisor_chain(e1).iter().map(|e| e.id.0.as_str()).collect();

        assert_eq!(chain, vec!["s1", "m1"]);
    }

    #[test]
    fn supervisor_inference_ignores_company() {
        let snapshot = plant_snapshot();
        let sink = InMemoryAuditSink::default();
        let resolver = OrgResolver::new(&snapshot, &sink, "test");

        // x1 works for globex but the assembly section head sits under acme.
        let x1 = snapshot.get(&EmployeeId("x1".to_string())).expect("x1");
        let chain: Vec<&str> =
            resolver.supervisor_chain(x1).iter().map(|e| e.id.0.as_str()).collect();

        assert_eq!(chain, vec!["s1", "m1"]);
    }

    #[test]
    fn manager_roles_have_no_supervisor() {
        let snapshot = plant_snapshot();
        let sink = InMemoryAuditSink::default();
        let resolver = OrgResolver::new(&snapshot, &sink, "test");

        for id in ["m1", "hr1"] {
            let employee = snapshot.get(&EmployeeId(id.to_string())).expect(id);
            assert!(resolver.supervisor_chain(employee).is_empty(), "{id} should be a chain root");
        }
    }

    #[test]
    fn missing_section_head_shortens_the_chain() {
        let snapshot = OrgSnapshot::new(vec![
            worker("e1", Role::Employee, "acme", "assembly", Some("line-b"), None),
            worker("m1", Role::DeptManager, "acme", "assembly", None, None),
        ]);
        let sink = InMemoryAuditSink::default();
        let resolver = OrgResolver::new(&snapshot, &sink, "test");

        let e1 = snapshot.get(&EmployeeId("e1".to_string())).expect("e1");
        let chain: Vec<&str> =
            resolver.supervisor_chain(e1).iter().map(|e| e.id.0.as_str()).collect();

        assert_eq!(chain, vec!["m1"]);
    }

    #[test]
    fn duplicate_section_heads_pick_first_and_flag_anomaly() {
        let snapshot = OrgSnapshot::new(vec![
            worker("e1", Role::Employee, "acme", "assembly", Some("line-a"), None),
            worker("s1", Role::SectionHead, "acme", "assembly", Some("line-a"), None),
            worker("s2", Role::SectionHead, "acme", "assembly", Some("line-a"), None),
            worker("m1", Role::DeptManager, "acme", "assembly", None, None),
        ]);
        let sink = InMemoryAuditSink::default();
        let resolver = OrgResolver::new(&snapshot, &sink, "req-9");

        let e1 = snapshot.get(&EmployeeId("e1".to_string())).expect("e1");
        let chain: Vec<&str> =
            resolver.supervisor_chain(e1).iter().map(|e| e.id.0.as_str()).collect();
        assert_eq!(chain, vec!["s1", "m1"], "first snapshot match must win");

        let flagged: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|event| event.outcome == AuditOutcome::Flagged)
            .collect();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].event_type, "org.duplicate_scope_match");
        assert_eq!(flagged[0].metadata.get("picked").map(String::as_str), Some("s1"));
    }

    #[test]
    fn dept_manager_subordinates_require_company_match() {
        let snapshot = plant_snapshot();
        let sink = InMemoryAuditSink::default();
        let resolver = OrgResolver::new(&snapshot, &sink, "test");

        let m1 = snapshot.get(&EmployeeId("m1".to_string())).expect("m1");
        let mut ids: Vec<&str> =
            resolver.subordinates_of(m1).iter().map(|e| e.id.0.as_str()).collect();
        ids.sort_unstable();

        // x1 shares the department but not the company, so it is excluded.
        assert_eq!(ids, vec!["e1", "e2", "s1", "sup1"]);
    }

    #[test]
    fn section_head_subordinates_exclude_dept_managers() {
        let snapshot = plant_snapshot();
        let sink = InMemoryAuditSink::default();
        let resolver = OrgResolver::new(&snapshot, &sink, "test");

        let s1 = snapshot.get(&EmployeeId("s1".to_string())).expect("s1");
        let mut ids: Vec<&str> =
            resolver.subordinates_of(s1).iter().map(|e| e.id.0.as_str()).collect();
        ids.sort_unstable();

        assert_eq!(ids, vec!["e1", "e2", "sup1"]);
    }

    #[test]
    fn shift_supervisor_subordinates_match_shift_and_exclude_leads() {
        let snapshot = plant_snapshot();
        let sink = InMemoryAuditSink::default();
        let resolver = OrgResolver::new(&snapshot, &sink, "test");

        let sup1 = snapshot.get(&EmployeeId("sup1".to_string())).expect("sup1");
        let ids: Vec<&str> =
            resolver.subordinates_of(sup1).iter().map(|e| e.id.0.as_str()).collect();

        assert_eq!(ids, vec!["e1"]);
    }

    #[test]
    fn rank_and_file_have_no_subordinates() {
        let snapshot = plant_snapshot();
        let sink = InMemoryAuditSink::default();
        let resolver = OrgResolver::new(&snapshot, &sink, "test");

        let e1 = snapshot.get(&EmployeeId("e1".to_string())).expect("e1");
        assert!(resolver.subordinates_of(e1).is_empty());
    }

    #[test]
    fn snapshot_drops_inactive_rows() {
        let mut inactive = worker("ghost", Role::Employee, "acme", "assembly", None, None);
        inactive.is_active = false;
        let snapshot = OrgSnapshot::new(vec![inactive]);

        assert!(snapshot.is_empty());
        assert!(snapshot.get(&EmployeeId("ghost".to_string())).is_none());
    }
}
