//! Explicit state machines for both review workflows.
//!
//! The design mirrors a pure functional core:
//! - **State**: the task record (`Submission` / `ProjectTask`)
//! - **Commands**: what an actor asked for
//! - **Effects**: follow-up work for the engine (`Effect`)
//! - **Transition**: pure function `(task, command) -> Result<(task, effects)>`
//!
//! Nothing in here touches storage. The engine reads a task, runs the
//! transition, and writes the result back with a version check.

pub mod effect;
pub mod project;
pub mod submission;

pub use effect::Effect;

use crowdreview_core::{Role, Slot, UserId};
use thiserror::Error;

/// Why a transition was refused.
///
/// Every variant carries the task's current status so callers can tell the
/// user what state the task is actually in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot move task from {current} to {requested}")]
    IllegalTransition { current: String, requested: String },

    #[error("role {role} may not move task from {current} to {requested}")]
    RoleNotPermitted {
        role: String,
        current: String,
        requested: String,
    },

    #[error("task in {current} is bound to another {slot} ({bound})")]
    BoundToOther {
        current: String,
        slot: Slot,
        bound: UserId,
    },

    #[error("task in {current} is already bound to {bound}")]
    AlreadyBound { current: String, bound: UserId },

    #[error("{field} is required to move task from {current} to {requested}")]
    MissingField {
        field: &'static str,
        current: String,
        requested: String,
    },

    #[error("invalid {field} for task in {current}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
        current: String,
    },

    #[error("only the bound worker or an admin may act on task in {current}")]
    NotBoundWorker { current: String },

    #[error("{role} accounts cannot act on task in {current}")]
    WrongRole { role: Role, current: String },
}

impl TransitionError {
    /// The task status at the time the transition was refused.
    pub fn current_status(&self) -> &str {
        match self {
            Self::IllegalTransition { current, .. }
            | Self::RoleNotPermitted { current, .. }
            | Self::BoundToOther { current, .. }
            | Self::AlreadyBound { current, .. }
            | Self::MissingField { current, .. }
            | Self::InvalidField { current, .. }
            | Self::NotBoundWorker { current }
            | Self::WrongRole { current, .. } => current,
        }
    }
}
