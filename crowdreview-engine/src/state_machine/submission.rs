//! Transitions for simple submissions.
//!
//! ```text
//! PENDING --assign/claim--> CLAIMED --feedback(mark_eligible)--> ELIGIBLE --approve--> APPROVED
//!    ^                         |                                    |
//!    +---------release---------+------------------------------------+
//! ```

use chrono::{DateTime, Utc};
use crowdreview_core::{Role, Submission, SubmissionStatus, UserId};

use super::TransitionError;

/// A request to change a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionCommand {
    /// Automated bind of a queued task.
    Assign { worker: UserId, at: DateTime<Utc> },

    /// Move any open task to `worker`, as part of a global rebalance.
    Rebind { worker: UserId, at: DateTime<Utc> },

    /// Admin force-binds the task to themselves.
    Claim {
        admin: UserId,
        role: Role,
        at: DateTime<Utc>,
    },

    /// Feedback was left; optionally recommend approval.
    Feedback {
        reviewer: UserId,
        role: Role,
        mark_eligible: bool,
    },

    /// Admin approval.
    Approve { role: Role },

    /// The bound worker is going away; return the task to the queue.
    Release,
}

impl SubmissionCommand {
    /// The status this command is trying to reach, for error messages.
    fn requested(&self) -> &'static str {
        match self {
            Self::Assign { .. } | Self::Rebind { .. } | Self::Claim { .. } => {
                SubmissionStatus::Claimed.as_str()
            }
            Self::Feedback { .. } => SubmissionStatus::Eligible.as_str(),
            Self::Approve { .. } => SubmissionStatus::Approved.as_str(),
            Self::Release => SubmissionStatus::Pending.as_str(),
        }
    }
}

/// Pure transition function for simple submissions.
///
/// Returns the updated record; the caller persists it with a version check.
pub fn transition(
    submission: &Submission,
    command: &SubmissionCommand,
) -> Result<Submission, TransitionError> {
    let current = submission.status;
    let illegal = || TransitionError::IllegalTransition {
        current: current.to_string(),
        requested: command.requested().to_string(),
    };
    let mut next = submission.clone();

    match command {
        SubmissionCommand::Assign { worker, at } => {
            if let Some(bound) = submission.claimed_by {
                return Err(TransitionError::AlreadyBound {
                    current: current.to_string(),
                    bound,
                });
            }
            if current != SubmissionStatus::Pending {
                return Err(illegal());
            }
            next.claimed_by = Some(*worker);
            next.assigned_at = Some(*at);
            next.status = SubmissionStatus::Claimed;
        }

        SubmissionCommand::Rebind { worker, at } => {
            if !current.is_open() {
                return Err(illegal());
            }
            next.claimed_by = Some(*worker);
            next.assigned_at = Some(*at);
            if current == SubmissionStatus::Pending {
                next.status = SubmissionStatus::Claimed;
            }
        }

        SubmissionCommand::Claim { admin, role, at } => {
            if *role != Role::Admin {
                return Err(TransitionError::RoleNotPermitted {
                    role: role.to_string(),
                    current: current.to_string(),
                    requested: command.requested().to_string(),
                });
            }
            if !matches!(
                current,
                SubmissionStatus::Pending | SubmissionStatus::Claimed
            ) {
                return Err(illegal());
            }
            next.claimed_by = Some(*admin);
            next.assigned_at = Some(*at);
            next.status = SubmissionStatus::Claimed;
        }

        SubmissionCommand::Feedback {
            reviewer,
            role,
            mark_eligible,
        } => {
            if *role != Role::Admin && submission.claimed_by != Some(*reviewer) {
                return Err(TransitionError::NotBoundWorker {
                    current: current.to_string(),
                });
            }
            if *mark_eligible {
                match current {
                    SubmissionStatus::Claimed => next.status = SubmissionStatus::Eligible,
                    // Never regress, and an unbound task cannot be eligible.
                    SubmissionStatus::Eligible | SubmissionStatus::Approved => {}
                    SubmissionStatus::Pending => return Err(illegal()),
                }
            }
        }

        SubmissionCommand::Approve { role } => {
            if *role != Role::Admin {
                return Err(TransitionError::RoleNotPermitted {
                    role: role.to_string(),
                    current: current.to_string(),
                    requested: command.requested().to_string(),
                });
            }
            if current != SubmissionStatus::Eligible {
                return Err(illegal());
            }
            next.status = SubmissionStatus::Approved;
        }

        SubmissionCommand::Release => {
            next.claimed_by = None;
            next.assigned_at = None;
            if matches!(
                current,
                SubmissionStatus::Claimed | SubmissionStatus::Eligible
            ) {
                next.status = SubmissionStatus::Pending;
            }
        }
    }

    Ok(next)
}
