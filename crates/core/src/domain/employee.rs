use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EmployeeId(pub String);

/// Organizational role. The discriminant order doubles as the approval rank:
/// chains always route from lower to higher rank, and a requester never
/// routes through a role at or below their own rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Employee,
    ShiftSupervisor,
    SectionHead,
    DeptManager,
    Hr,
    HrManager,
    Admin,
}

impl Role {
    pub fn rank(self) -> u8 {
        match self {
            Role::Employee => 1,
            Role::ShiftSupervisor => 2,
            Role::SectionHead => 3,
            Role::DeptManager => 4,
            Role::Hr => 5,
            Role::HrManager => 6,
            Role::Admin => 7,
        }
    }

    /// Roles that never have an inferred supervisor.
    pub fn is_chain_root(self) -> bool {
        matches!(self, Role::DeptManager | Role::Hr | Role::HrManager | Role::Admin)
    }

    /// Roles whose own leave needs no routed approval chain.
    pub fn is_self_approving(self) -> bool {
        matches!(self, Role::HrManager | Role::Admin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Employee => "employee",
            Role::ShiftSupervisor => "shift_supervisor",
            Role::SectionHead => "section_head",
            Role::DeptManager => "dept_manager",
            Role::Hr => "hr",
            Role::HrManager => "hr_manager",
            Role::Admin => "admin",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "employee" => Ok(Role::Employee),
            "shift_supervisor" => Ok(Role::ShiftSupervisor),
            "section_head" => Ok(Role::SectionHead),
            "dept_manager" => Ok(Role::DeptManager),
            "hr" => Ok(Role::Hr),
            "hr_manager" => Ok(Role::HrManager),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown role `{0}`")]
pub struct UnknownRole(pub String);

/// A read-only snapshot row from the employee store. The engine never
/// creates or mutates employees; HR admin tooling owns their lifecycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub employee_no: String,
    pub role: Role,
    pub company: String,
    pub department: String,
    pub section: Option<String>,
    pub shift: Option<String>,
    pub is_active: bool,
}

impl Employee {
    pub fn rank(&self) -> u8 {
        self.role.rank()
    }
}

#[cfg(test)]
mod tests {
    use super::Role;

    #[test]
    fn ranks_are_strictly_ordered() {
        let roles = [
            Role::Employee,
            Role::ShiftSupervisor,
            Role::SectionHead,
            Role::DeptManager,
            Role::Hr,
            Role::HrManager,
            Role::Admin,
        ];
        for pair in roles.windows(2) {
            assert!(pair[0].rank() < pair[1].rank(), "{:?} must rank below {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn role_round_trips_through_strings() {
        for role in [
            Role::Employee,
            Role::ShiftSupervisor,
            Role::SectionHead,
            Role::DeptManager,
            Role::Hr,
            Role::HrManager,
            Role::Admin,
        ] {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
        assert!("plumber".parse::<Role>().is_err());
    }

    #[test]
    fn chain_roots_and_self_approvers() {
        assert!(Role::DeptManager.is_chain_root());
        assert!(!Role::DeptManager.is_self_approving());
        assert!(Role::HrManager.is_self_approving());
        assert!(!Role::SectionHead.is_chain_root());
    }
}
