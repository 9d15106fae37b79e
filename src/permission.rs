//! Scope checks derived from managed prefixes
//!
//! A courier's authority is the set of codes starting with its managed
//! prefix. Nothing here is granted separately; creating or moving a courier
//! changes what it may touch.

use std::collections::HashMap;
use uuid::Uuid;

use crate::hierarchy::CourierTree;
use crate::models::{Courier, CourierLevel};

/// Role key for a viewer that manages the code
pub const ROLE_MANAGER: &str = "manager";
/// Role key for any other known courier
pub const ROLE_COURIER: &str = "courier";
/// Role key for an unidentified viewer
pub const ROLE_ANONYMOUS: &str = "anonymous";

/// True iff `code` starts with the courier's managed prefix
pub fn can_manage(courier: &Courier, code: &str) -> bool {
    code.starts_with(courier.managed_prefix.as_str())
}

/// Approval needs scope and at least area level
pub fn can_approve(courier: &Courier, candidate_code: &str) -> bool {
    courier.is_active && courier.level >= CourierLevel::Area && can_manage(courier, candidate_code)
}

/// Masking role key for a viewer of `code`
pub fn viewer_role(viewer: Option<&Courier>, code: &str) -> &'static str {
    match viewer {
        Some(courier) if courier.is_active && can_manage(courier, code) => ROLE_MANAGER,
        Some(_) => ROLE_COURIER,
        None => ROLE_ANONYMOUS,
    }
}

/// Whether a courier can take on more work right now
pub trait CapacityCheck {
    fn has_capacity(&self, courier: &Courier) -> bool;
}

/// Active-task counts against a per-courier limit
#[derive(Debug, Clone, Default)]
pub struct LoadSnapshot {
    pub loads: HashMap<Uuid, u32>,
    pub limit: u32,
}

impl LoadSnapshot {
    pub fn new(loads: HashMap<Uuid, u32>, limit: u32) -> Self {
        Self { loads, limit }
    }

    pub fn load_of(&self, courier_id: Uuid) -> u32 {
        self.loads.get(&courier_id).copied().unwrap_or(0)
    }
}

impl CapacityCheck for LoadSnapshot {
    fn has_capacity(&self, courier: &Courier) -> bool {
        self.load_of(courier.id) < self.limit
    }
}

/// Single eligibility predicate shared by set queries and claim checks
pub fn is_eligible(courier: &Courier, code: &str, capacity: &dyn CapacityCheck) -> bool {
    courier.is_active && can_manage(courier, code) && capacity.has_capacity(courier)
}

/// Scope queries over a courier tree snapshot
pub struct PermissionEnforcer<'a> {
    tree: &'a CourierTree,
}

impl<'a> PermissionEnforcer<'a> {
    pub fn new(tree: &'a CourierTree) -> Self {
        Self { tree }
    }

    /// Active couriers with free capacity whose prefix covers `code`, ordered by id
    pub fn eligible_couriers(&self, code: &str, capacity: &dyn CapacityCheck) -> Vec<&'a Courier> {
        let mut eligible: Vec<&Courier> = self
            .tree
            .iter()
            .filter(|c| is_eligible(c, code, capacity))
            .collect();
        eligible.sort_by_key(|c| c.id);
        eligible
    }

    pub fn can_manage(&self, courier_id: Uuid, code: &str) -> bool {
        self.tree
            .get(courier_id)
            .map(|c| c.is_active && can_manage(c, code))
            .unwrap_or(false)
    }
}
