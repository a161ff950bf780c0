//! Transitions for the multi-stage project workflow.
//!
//! The legal moves are declared once in [`RULES`]. Both the engine and the
//! tests read the same table, so there is no second copy of the rules to
//! drift out of date.

use chrono::{DateTime, Utc};
use crowdreview_core::{Actor, ProjectRevision, ProjectStatus, ProjectTask, Role, Slot, Worker};
use regex::Regex;

use super::{Effect, TransitionError};

use ProjectStatus::*;

/// Who may trigger a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Only the assignment engine, never a caller of [`transition`].
    System,
    /// Any user holding one of these roles.
    Roles(&'static [Role]),
    /// The contributor who owns the task, or an admin.
    OwnerOrAdmin,
}

/// Extra condition on the task itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    None,
    /// The task came back from a change request.
    ChangesDone,
}

/// One row of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    pub to: ProjectStatus,
    pub from: &'static [ProjectStatus],
    pub gate: Gate,
    /// Slot whose binding the acting worker must hold (or takes, if empty).
    pub binds: Option<Slot>,
    pub guard: Guard,
}

const TESTERS: &[Role] = &[Role::Tester, Role::Admin];
const REVIEWERS: &[Role] = &[Role::Reviewer, Role::Admin];
const ADMINS: &[Role] = &[Role::Admin];

const GITHUB_REPO_PATTERN: &str = r"^https?://github\.com/[\w-]+/[\w.-]+/?$";

const TESTER_EXITS: &[ProjectStatus] = &[InTesting, ReworkDone, TaskSubmittedToPlatform];
const APPROVABLE: &[ProjectStatus] = &[
    EligibleForManualReview,
    PendingReview,
    ChangesDone,
    FinalChecks,
];

pub const RULES: &[TransitionRule] = &[
    TransitionRule {
        to: InTesting,
        from: &[TaskSubmitted],
        gate: Gate::System,
        binds: Some(Slot::Tester),
        guard: Guard::None,
    },
    TransitionRule {
        to: TaskSubmittedToPlatform,
        from: &[InTesting, ReworkDone],
        gate: Gate::Roles(TESTERS),
        binds: Some(Slot::Tester),
        guard: Guard::None,
    },
    TransitionRule {
        to: EligibleForManualReview,
        from: TESTER_EXITS,
        gate: Gate::Roles(TESTERS),
        binds: Some(Slot::Tester),
        guard: Guard::None,
    },
    TransitionRule {
        to: PendingReview,
        from: TESTER_EXITS,
        gate: Gate::Roles(TESTERS),
        binds: Some(Slot::Tester),
        guard: Guard::None,
    },
    TransitionRule {
        to: ChangesDone,
        from: &[InTesting],
        gate: Gate::Roles(TESTERS),
        binds: Some(Slot::Tester),
        guard: Guard::ChangesDone,
    },
    TransitionRule {
        to: Rework,
        from: TESTER_EXITS,
        gate: Gate::Roles(TESTERS),
        binds: Some(Slot::Tester),
        guard: Guard::None,
    },
    TransitionRule {
        to: ChangesRequested,
        from: &ProjectStatus::REVIEWABLE,
        gate: Gate::Roles(REVIEWERS),
        binds: Some(Slot::Reviewer),
        guard: Guard::None,
    },
    TransitionRule {
        to: FinalChecks,
        from: &ProjectStatus::REVIEWABLE,
        gate: Gate::Roles(REVIEWERS),
        binds: Some(Slot::Reviewer),
        guard: Guard::None,
    },
    TransitionRule {
        to: Rejected,
        from: &ProjectStatus::REVIEWABLE,
        gate: Gate::Roles(REVIEWERS),
        binds: Some(Slot::Reviewer),
        guard: Guard::None,
    },
    TransitionRule {
        to: Approved,
        from: APPROVABLE,
        gate: Gate::Roles(ADMINS),
        binds: None,
        guard: Guard::None,
    },
    TransitionRule {
        to: InTesting,
        from: &[ChangesRequested],
        gate: Gate::OwnerOrAdmin,
        binds: None,
        guard: Guard::None,
    },
    TransitionRule {
        to: ReworkDone,
        from: &[Rework],
        gate: Gate::OwnerOrAdmin,
        binds: None,
        guard: Guard::None,
    },
];

/// Optional payload carried by a transition request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionExtra {
    /// Tester feedback (rework) or reviewer feedback (changes requested).
    pub feedback: Option<String>,
    pub rejection_reason: Option<String>,
    pub task_link: Option<String>,
    pub submitted_account: Option<String>,
    pub task_link_submitted: Option<String>,
    pub account_posted_in: Option<String>,
    /// Revised task details. Only a contributor's resubmission may carry
    /// these.
    pub revision: Option<ProjectRevision>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    pub to: ProjectStatus,
    pub actor: Actor,
    pub extra: TransitionExtra,
}

/// Result of a project transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionResult {
    /// The task after the transition.
    pub task: ProjectTask,
    /// Effects for the engine to execute after the task is saved.
    pub effects: Vec<Effect>,
}

/// Find the rule that allows `current -> to`, if any.
pub fn rule_for(current: ProjectStatus, to: ProjectStatus) -> Option<&'static TransitionRule> {
    RULES
        .iter()
        .find(|rule| rule.to == to && rule.from.contains(&current))
}

/// Statuses reachable from `current` by a caller of [`transition`].
pub fn allowed_targets(current: ProjectStatus) -> Vec<ProjectStatus> {
    RULES
        .iter()
        .filter(|rule| rule.gate != Gate::System && rule.from.contains(&current))
        .map(|rule| rule.to)
        .collect()
}

/// Pure transition function for a user-requested status change.
///
/// Checks, in order: that a rule exists for the move, that the actor passes
/// its gate, the rule's guard, required payload fields, and finally the
/// slot binding. The first tester or reviewer to pass becomes the sticky
/// binding for that slot.
pub fn transition(
    task: &ProjectTask,
    request: &TransitionRequest,
    at: DateTime<Utc>,
) -> Result<TransitionResult, TransitionError> {
    let current = task.status;
    let illegal = || TransitionError::IllegalTransition {
        current: current.to_string(),
        requested: request.to.to_string(),
    };

    let rule = rule_for(current, request.to).ok_or_else(illegal)?;

    if !gate_allows(rule.gate, &request.actor, task) {
        return Err(TransitionError::RoleNotPermitted {
            role: request.actor.role_name().to_string(),
            current: current.to_string(),
            requested: request.to.to_string(),
        });
    }

    if rule.guard == Guard::ChangesDone && !task.changes_done {
        return Err(illegal());
    }

    let extra = &request.extra;
    let missing = |field: &'static str| TransitionError::MissingField {
        field,
        current: current.to_string(),
        requested: request.to.to_string(),
    };
    match request.to {
        TaskSubmittedToPlatform => {
            if present(&extra.submitted_account).is_none() {
                return Err(missing("submitted_account"));
            }
            if present(&extra.task_link_submitted).is_none() {
                return Err(missing("task_link_submitted"));
            }
        }
        EligibleForManualReview if present(&extra.task_link).is_none() => {
            return Err(missing("task_link"));
        }
        Rework | ChangesRequested if present(&extra.feedback).is_none() => {
            return Err(missing("feedback"));
        }
        Rejected if present(&extra.rejection_reason).is_none() => {
            return Err(missing("rejection_reason"));
        }
        _ => {}
    }

    if let Some(revision) = &extra.revision {
        if rule.gate != Gate::OwnerOrAdmin {
            return Err(TransitionError::InvalidField {
                field: "revision",
                reason: "only a resubmission may revise task details",
                current: current.to_string(),
            });
        }
        check_revision(revision, current)?;
    }

    let mut next = task.clone();

    if let (Some(slot), Actor::User { id, role }) = (rule.binds, &request.actor) {
        if *role != Role::Admin {
            match task.binding(slot) {
                Some(bound) if bound != *id => {
                    return Err(TransitionError::BoundToOther {
                        current: current.to_string(),
                        slot,
                        bound,
                    });
                }
                Some(_) => {}
                None => next.bind(slot, *id, at),
            }
        }
    }

    match request.to {
        TaskSubmittedToPlatform => {
            next.submitted_account = present(&extra.submitted_account);
            next.task_link_submitted = present(&extra.task_link_submitted);
        }
        EligibleForManualReview | PendingReview => {
            if let Some(link) = present(&extra.task_link) {
                next.task_link = Some(link);
            }
        }
        Rework => {
            next.tester_feedback = present(&extra.feedback);
        }
        ChangesRequested => {
            next.reviewer_feedback = present(&extra.feedback);
            next.has_changes_requested = true;
            next.changes_done = false;
        }
        Rejected => {
            next.rejection_reason = present(&extra.rejection_reason);
        }
        InTesting => {
            // Only reachable here as the contributor's resubmission.
            next.changes_done = true;
        }
        _ => {}
    }
    if let Some(revision) = &extra.revision {
        apply_revision(&mut next, revision);
    }
    if let Some(account) = present(&extra.account_posted_in) {
        next.account_posted_in = Some(account);
    }

    next.status = request.to;
    next.updated_at = at;

    let effects = follow_up(&next);
    Ok(TransitionResult {
        task: next,
        effects,
    })
}

/// Bind `worker` to the empty `slot` of a queued task.
///
/// A tester picking up a fresh task moves it into testing; every other
/// assignment only fills the binding.
pub fn assign(
    task: &ProjectTask,
    slot: Slot,
    worker: &Worker,
    at: DateTime<Utc>,
) -> Result<TransitionResult, TransitionError> {
    let current = task.status;

    if worker.role != slot.role() {
        return Err(TransitionError::WrongRole {
            role: worker.role,
            current: current.to_string(),
        });
    }

    if let Some(bound) = task.binding(slot) {
        return Err(TransitionError::AlreadyBound {
            current: current.to_string(),
            bound,
        });
    }

    let to = if slot == Slot::Tester && current == TaskSubmitted {
        rule_for(current, InTesting)
            .filter(|rule| rule.gate == Gate::System)
            .map(|rule| rule.to)
    } else if task.is_queued_for(slot) {
        Some(current)
    } else {
        None
    };
    let to = to.ok_or_else(|| TransitionError::IllegalTransition {
        current: current.to_string(),
        requested: format!("{} with {}", current, slot),
    })?;

    let mut next = task.clone();
    next.bind(slot, worker.id, at);
    next.status = to;
    next.updated_at = at;

    let mut effects = Vec::new();
    if to != current {
        effects.push(Effect::BroadcastStatus { status: to });
    }
    Ok(TransitionResult {
        task: next,
        effects,
    })
}

fn gate_allows(gate: Gate, actor: &Actor, task: &ProjectTask) -> bool {
    match (gate, actor) {
        (Gate::System, _) => false,
        (_, Actor::System) => false,
        (Gate::Roles(roles), Actor::User { role, .. }) => roles.contains(role),
        (Gate::OwnerOrAdmin, Actor::User { id, role }) => {
            *role == Role::Admin || *id == task.contributor_id
        }
    }
}

fn follow_up(task: &ProjectTask) -> Vec<Effect> {
    let mut effects = vec![Effect::BroadcastStatus {
        status: task.status,
    }];
    for slot in [Slot::Tester, Slot::Reviewer] {
        if task.is_queued_for(slot) {
            effects.push(Effect::AutoAssign { slot });
        }
    }
    effects
}

fn check_revision(revision: &ProjectRevision, current: ProjectStatus) -> Result<(), TransitionError> {
    let invalid = |field: &'static str, reason: &'static str| TransitionError::InvalidField {
        field,
        reason,
        current: current.to_string(),
    };

    if let Some(description) = present(&revision.description) {
        if !description.is_ascii() {
            return Err(invalid("description", "must contain only ASCII characters"));
        }
    }
    if let Some(repo) = present(&revision.github_repo) {
        let valid = Regex::new(GITHUB_REPO_PATTERN)
            .map(|re| re.is_match(&repo))
            .unwrap_or(false);
        if !valid {
            return Err(invalid("github_repo", "must be a GitHub repository URL"));
        }
    }
    Ok(())
}

/// Overwrite the task details the revision supplies.
fn apply_revision(task: &mut ProjectTask, revision: &ProjectRevision) {
    let fields = [
        (&mut task.title, &revision.title),
        (&mut task.language, &revision.language),
        (&mut task.category, &revision.category),
        (&mut task.difficulty, &revision.difficulty),
        (&mut task.description, &revision.description),
        (&mut task.github_repo, &revision.github_repo),
        (&mut task.commit_hash, &revision.commit_hash),
    ];
    for (field, value) in fields {
        if let Some(value) = present(value) {
            *field = value;
        }
    }
    if let Some(url) = present(&revision.issue_url) {
        task.issue_url = Some(url);
    }
}

/// Trimmed value, treating blank strings as absent.
fn present(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
