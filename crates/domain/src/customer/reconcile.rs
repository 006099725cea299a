//! Reconciliation of a client-supplied address collection against the
//! addresses a customer currently owns.

use std::collections::HashSet;

use super::{Address, AddressDetails, AddressId, AddressInput};
use crate::entity::HasIdentity;

/// What has to happen to turn `current` into `target`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Details for addresses that get a fresh id.
    pub to_add: Vec<AddressDetails>,
    /// Existing addresses to overwrite, in target order.
    pub to_update: Vec<(AddressId, AddressDetails)>,
    /// Existing addresses absent from the target, in current order.
    pub to_remove: Vec<AddressId>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_remove.is_empty()
    }

    /// Whether applying the plan changes the membership of the collection.
    pub fn changes_membership(&self) -> bool {
        !self.to_add.is_empty() || !self.to_remove.is_empty()
    }
}

/// Matches `target` against `current` by address id.
///
/// - A target entry without an id, or whose id is not in `current`, is
///   added as a new address.
/// - A target entry whose id is in `current` updates that address. If the
///   same id appears more than once, the first entry wins and the rest are
///   dropped.
/// - Every current address whose id is not in `target` is removed.
pub fn reconcile(current: &[Address], target: &[AddressInput]) -> ReconcilePlan {
    let current_ids: HashSet<AddressId> = current.iter().map(|a| a.id()).collect();
    let target_ids: HashSet<AddressId> = target.iter().filter_map(|t| t.id).collect();

    let mut plan = ReconcilePlan {
        to_remove: current
            .iter()
            .map(|a| a.id())
            .filter(|id| !target_ids.contains(id))
            .collect(),
        ..ReconcilePlan::default()
    };

    let mut matched = HashSet::new();
    for input in target {
        match input.id {
            Some(id) if current_ids.contains(&id) => {
                if matched.insert(id) {
                    plan.to_update.push((id, input.details.clone()));
                }
            }
            _ => plan.to_add.push(input.details.clone()),
        }
    }

    plan
}
