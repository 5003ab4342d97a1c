//! # Access Control
//!
//! Role → capability tables, checked server-side on every commit-path call.
//!
//! Identity itself is established upstream. This module only answers "may
//! this caller do that, on this branch".
//!
//! ## Capability Table
//! ```text
//! ┌───────────────────┬───────┬─────────┬───────────────────┐
//! │ Capability        │ admin │ cashier │ inventory_manager │
//! ├───────────────────┼───────┼─────────┼───────────────────┤
//! │ CommitSale        │   ✓   │    ✓    │                   │
//! │ RefundSale        │   ✓   │    ✓    │                   │
//! │ ViewSales         │   ✓   │    ✓    │         ✓         │
//! │ ViewInventory     │   ✓   │    ✓    │         ✓         │
//! │ ManageInventory   │   ✓   │         │         ✓         │
//! │ ViewLoyalty       │   ✓   │    ✓    │                   │
//! └───────────────────┴───────┴─────────┴───────────────────┘
//! ```
//!
//! A caller with a branch scope may only act on that branch. Admins are
//! never branch-scoped.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult, ValidationError};

// =============================================================================
// Capability
// =============================================================================

/// Something a caller can be allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    CommitSale,
    RefundSale,
    ViewSales,
    ViewInventory,
    ManageInventory,
    ViewLoyalty,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::CommitSale => "commit sales",
            Capability::RefundSale => "refund sales",
            Capability::ViewSales => "view sales",
            Capability::ViewInventory => "view inventory",
            Capability::ManageInventory => "manage inventory",
            Capability::ViewLoyalty => "view loyalty",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Role
// =============================================================================

/// Staff role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Cashier,
    InventoryManager,
}

const ADMIN_CAPABILITIES: &[Capability] = &[
    Capability::CommitSale,
    Capability::RefundSale,
    Capability::ViewSales,
    Capability::ViewInventory,
    Capability::ManageInventory,
    Capability::ViewLoyalty,
];

const CASHIER_CAPABILITIES: &[Capability] = &[
    Capability::CommitSale,
    Capability::RefundSale,
    Capability::ViewSales,
    Capability::ViewInventory,
    Capability::ViewLoyalty,
];

const INVENTORY_MANAGER_CAPABILITIES: &[Capability] = &[
    Capability::ViewSales,
    Capability::ViewInventory,
    Capability::ManageInventory,
];

impl Role {
    /// Every capability granted to this role.
    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            Role::Admin => ADMIN_CAPABILITIES,
            Role::Cashier => CASHIER_CAPABILITIES,
            Role::InventoryManager => INVENTORY_MANAGER_CAPABILITIES,
        }
    }

    #[inline]
    pub fn allows(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Cashier => "cashier",
            Role::InventoryManager => "inventory_manager",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "cashier" => Ok(Role::Cashier),
            "inventory_manager" | "inventorymanager" => Ok(Role::InventoryManager),
            _ => Err(ValidationError::NotAllowed {
                field: "role".to_string(),
                allowed: vec![
                    "admin".to_string(),
                    "cashier".to_string(),
                    "inventory_manager".to_string(),
                ],
            }),
        }
    }
}

// =============================================================================
// Caller
// =============================================================================

/// The authenticated user behind a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: i64,
    pub role: Role,
    /// Branch the caller is bound to, if any.
    pub branch_id: Option<i64>,
}

impl Caller {
    pub fn new(user_id: i64, role: Role, branch_id: Option<i64>) -> Self {
        Caller {
            user_id,
            role,
            branch_id,
        }
    }

    /// Fails unless the caller's role grants `capability`.
    pub fn require(&self, capability: Capability) -> CoreResult<()> {
        if self.role.allows(capability) {
            Ok(())
        } else {
            Err(CoreError::PermissionDenied {
                role: self.role.to_string(),
                capability: capability.to_string(),
            })
        }
    }

    /// Fails if the caller is bound to a branch other than `branch_id`.
    pub fn require_branch(&self, branch_id: i64) -> CoreResult<()> {
        match (self.role, self.branch_id) {
            (Role::Admin, _) | (_, None) => Ok(()),
            (_, Some(own)) if own == branch_id => Ok(()),
            _ => Err(CoreError::BranchOutOfScope { branch_id }),
        }
    }

    /// `require` and `require_branch` together.
    pub fn require_at(&self, capability: Capability, branch_id: i64) -> CoreResult<()> {
        self.require(capability)?;
        self.require_branch(branch_id)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("Cashier".parse::<Role>().unwrap(), Role::Cashier);
        assert_eq!(
            "inventory_manager".parse::<Role>().unwrap(),
            Role::InventoryManager
        );
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn test_capability_table() {
        assert!(Role::Admin.allows(Capability::ManageInventory));
        assert!(Role::Cashier.allows(Capability::CommitSale));
        assert!(Role::Cashier.allows(Capability::RefundSale));
        assert!(!Role::Cashier.allows(Capability::ManageInventory));
        assert!(Role::InventoryManager.allows(Capability::ManageInventory));
        assert!(!Role::InventoryManager.allows(Capability::CommitSale));
        assert!(!Role::InventoryManager.allows(Capability::ViewLoyalty));
    }

    #[test]
    fn test_require_reports_role_and_capability() {
        let caller = Caller::new(5, Role::InventoryManager, None);
        let err = caller.require(Capability::CommitSale).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Role inventory_manager is not allowed to commit sales"
        );
    }

    #[test]
    fn test_branch_scope() {
        let scoped = Caller::new(2, Role::Cashier, Some(1));
        assert!(scoped.require_branch(1).is_ok());
        assert!(matches!(
            scoped.require_branch(2),
            Err(CoreError::BranchOutOfScope { branch_id: 2 })
        ));

        let roaming = Caller::new(3, Role::Cashier, None);
        assert!(roaming.require_branch(2).is_ok());

        let admin = Caller::new(1, Role::Admin, Some(1));
        assert!(admin.require_branch(2).is_ok());
    }

    #[test]
    fn test_caller_is_copied_by_value() {
        fn take(caller: Caller) -> Option<i64> {
            caller.branch_id
        }
        let caller = Caller::new(9, Role::Cashier, Some(1));
        assert_eq!(take(caller), Some(1));
        assert_eq!(caller.user_id, 9);
    }

    #[test]
    fn test_require_at() {
        let caller = Caller::new(2, Role::Cashier, Some(1));
        assert!(caller.require_at(Capability::CommitSale, 1).is_ok());
        assert!(caller.require_at(Capability::CommitSale, 9).is_err());
        assert!(caller.require_at(Capability::ManageInventory, 1).is_err());
    }
}
