//! Effects (follow-up work as data).
//!
//! Transitions describe what should happen next; the engine executes it.
//! Keeping these as data lets the transition table be tested without a store.

use crowdreview_core::{ProjectStatus, Slot};

/// Follow-up work produced by a project transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// The task entered a phase whose slot is still empty; run the
    /// assignment engine for that slot.
    AutoAssign { slot: Slot },

    /// Tell subscribers the task's status changed.
    BroadcastStatus { status: ProjectStatus },
}
