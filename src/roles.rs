//! Role and capability model.
//!
//! Every authorization decision in the crate goes through
//! [`Role::can`]; no handler matches on role strings directly.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Employee,
    Manager,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ViewBoard,
    EditTickets,
    ManageEstimates,
    ManageParts,
    ManageInventory,
    ManageCustomers,
    ManageTeam,
    ManageSettings,
    DeleteAuditEntries,
    SendEmail,
    ClearLockouts,
}

use Capability::*;

const EMPLOYEE_CAPS: &[Capability] = &[
    ViewBoard,
    EditTickets,
    ManageEstimates,
    ManageParts,
    ManageInventory,
    ManageCustomers,
    SendEmail,
];

const MANAGER_CAPS: &[Capability] = &[
    ViewBoard,
    EditTickets,
    ManageEstimates,
    ManageParts,
    ManageInventory,
    ManageCustomers,
    ManageTeam,
    ManageSettings,
    SendEmail,
];

const ADMIN_CAPS: &[Capability] = &[
    ViewBoard,
    EditTickets,
    ManageEstimates,
    ManageParts,
    ManageInventory,
    ManageCustomers,
    ManageTeam,
    ManageSettings,
    DeleteAuditEntries,
    SendEmail,
    ClearLockouts,
];

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Employee => "employee",
            Self::Manager => "manager",
            Self::Admin => "admin",
        }
    }

    /// The single role-to-capability authority.
    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            Self::Customer => &[],
            Self::Employee => EMPLOYEE_CAPS,
            Self::Manager => MANAGER_CAPS,
            Self::Admin => ADMIN_CAPS,
        }
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    pub fn is_staff(&self) -> bool {
        *self >= Self::Employee
    }

    pub fn is_management(&self) -> bool {
        *self >= Self::Manager
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Self::Customer),
            "employee" => Ok(Self::Employee),
            "manager" => Ok(Self::Manager),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privilege_ordering_is_linear() {
        assert!(Role::Customer < Role::Employee);
        assert!(Role::Employee < Role::Manager);
        assert!(Role::Manager < Role::Admin);
        assert!(Role::Employee.is_staff());
        assert!(!Role::Customer.is_staff());
        assert!(Role::Manager.is_management());
        assert!(!Role::Employee.is_management());
    }

    #[test]
    fn capabilities_grow_with_privilege() {
        assert!(Role::Customer.capabilities().is_empty());
        for cap in Role::Employee.capabilities() {
            assert!(Role::Manager.can(*cap));
        }
        for cap in Role::Manager.capabilities() {
            assert!(Role::Admin.can(*cap));
        }
    }

    #[test]
    fn destructive_capabilities_are_admin_only() {
        for role in [Role::Customer, Role::Employee, Role::Manager] {
            assert!(!role.can(Capability::DeleteAuditEntries));
            assert!(!role.can(Capability::ClearLockouts));
        }
        assert!(Role::Admin.can(Capability::DeleteAuditEntries));
        assert!(Role::Admin.can(Capability::ClearLockouts));
    }

    #[test]
    fn team_management_uses_the_same_table() {
        assert!(!Role::Employee.can(Capability::ManageTeam));
        assert!(Role::Manager.can(Capability::ManageTeam));
    }

    #[test]
    fn role_round_trips_through_strings() {
        for role in [Role::Customer, Role::Employee, Role::Manager, Role::Admin] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("owner".parse::<Role>().is_err());
    }
}
