//! Command plumbing shared by the customer handlers.

use event_store::StoredEvent;

use crate::customer::Customer;

/// Result of command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// The customer after the command. For deletions, its last state.
    pub customer: Customer,

    /// The event recorded by the command, or `None` if nothing changed.
    pub event: Option<StoredEvent>,
}

impl CommandResult {
    pub fn changed(customer: Customer, event: StoredEvent) -> Self {
        Self {
            customer,
            event: Some(event),
        }
    }

    pub fn unchanged(customer: Customer) -> Self {
        Self {
            customer,
            event: None,
        }
    }
}

/// Trait for commands handled by the customer service.
///
/// Commands represent an intention to perform an action. They may be
/// rejected if the aggregate's current state doesn't allow the action.
pub trait Command: Send + Sync {
    /// Stable name used as the `command` label on metrics.
    const NAME: &'static str;
}
