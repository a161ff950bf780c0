//! Multi-stage ("Project V") review items.
//!
//! A project task passes through a tester phase and then a reviewer phase.
//! Each phase has its own sticky binding.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Role, TaskId, UserId};

/// Lifecycle of a project task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    TaskSubmitted,
    InTesting,
    TaskSubmittedToPlatform,
    EligibleForManualReview,
    PendingReview,
    ChangesRequested,
    ChangesDone,
    FinalChecks,
    Rework,
    ReworkDone,
    Approved,
    Rejected,
}

impl ProjectStatus {
    pub const ALL: [ProjectStatus; 12] = [
        Self::TaskSubmitted,
        Self::InTesting,
        Self::TaskSubmittedToPlatform,
        Self::EligibleForManualReview,
        Self::PendingReview,
        Self::ChangesRequested,
        Self::ChangesDone,
        Self::FinalChecks,
        Self::Rework,
        Self::ReworkDone,
        Self::Approved,
        Self::Rejected,
    ];

    /// Statuses during which the bound tester owns the task.
    pub const TESTER_PHASE: [ProjectStatus; 4] = [
        Self::InTesting,
        Self::TaskSubmittedToPlatform,
        Self::Rework,
        Self::ReworkDone,
    ];

    /// Statuses during which the bound reviewer owns the task.
    pub const REVIEWER_PHASE: [ProjectStatus; 5] = [
        Self::EligibleForManualReview,
        Self::PendingReview,
        Self::ChangesRequested,
        Self::ChangesDone,
        Self::FinalChecks,
    ];

    /// Statuses a reviewer may act on.
    pub const REVIEWABLE: [ProjectStatus; 3] = [
        Self::EligibleForManualReview,
        Self::PendingReview,
        Self::ChangesDone,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskSubmitted => "TASK_SUBMITTED",
            Self::InTesting => "IN_TESTING",
            Self::TaskSubmittedToPlatform => "TASK_SUBMITTED_TO_PLATFORM",
            Self::EligibleForManualReview => "ELIGIBLE_FOR_MANUAL_REVIEW",
            Self::PendingReview => "PENDING_REVIEW",
            Self::ChangesRequested => "CHANGES_REQUESTED",
            Self::ChangesDone => "CHANGES_DONE",
            Self::FinalChecks => "FINAL_CHECKS",
            Self::Rework => "REWORK",
            Self::ReworkDone => "REWORK_DONE",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    pub fn is_tester_phase(&self) -> bool {
        Self::TESTER_PHASE.contains(self)
    }

    pub fn is_reviewer_phase(&self) -> bool {
        Self::REVIEWER_PHASE.contains(self)
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_uppercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| format!("Invalid project status: {s}"))
    }
}

/// Which of the two project bindings an operation concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Tester,
    Reviewer,
}

impl Slot {
    /// Statuses that count towards a worker's load in this slot.
    pub fn load_statuses(&self) -> &'static [ProjectStatus] {
        match self {
            Self::Tester => &ProjectStatus::TESTER_PHASE,
            Self::Reviewer => &ProjectStatus::REVIEWER_PHASE,
        }
    }

    /// The role a worker bound to this slot must hold.
    pub fn role(&self) -> Role {
        match self {
            Self::Tester => Role::Tester,
            Self::Reviewer => Role::Reviewer,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tester => f.write_str("tester"),
            Self::Reviewer => f.write_str("reviewer"),
        }
    }
}

/// Payload for creating a project task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProjectTask {
    pub title: String,
    pub language: String,
    pub category: String,
    pub difficulty: String,
    pub description: String,
    pub github_repo: String,
    pub commit_hash: String,
    pub issue_url: Option<String>,
}

/// Revised task details sent with a resubmission. Absent or blank fields
/// keep the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRevision {
    pub title: Option<String>,
    pub language: Option<String>,
    pub category: Option<String>,
    pub difficulty: Option<String>,
    pub description: Option<String>,
    pub github_repo: Option<String>,
    pub commit_hash: Option<String>,
    pub issue_url: Option<String>,
}

/// A multi-stage review item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectTask {
    pub id: TaskId,
    pub contributor_id: UserId,
    pub title: String,
    pub language: String,
    pub category: String,
    pub difficulty: String,
    pub description: String,
    pub github_repo: String,
    pub commit_hash: String,
    pub issue_url: Option<String>,
    pub status: ProjectStatus,
    pub tester_id: Option<UserId>,
    pub reviewer_id: Option<UserId>,
    pub tester_assigned_at: Option<DateTime<Utc>>,
    pub reviewer_assigned_at: Option<DateTime<Utc>>,
    pub tester_feedback: Option<String>,
    pub reviewer_feedback: Option<String>,
    pub rejection_reason: Option<String>,
    pub task_link: Option<String>,
    pub submitted_account: Option<String>,
    pub task_link_submitted: Option<String>,
    pub account_posted_in: Option<String>,
    pub has_changes_requested: bool,
    pub changes_done: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub version: u64,
}

impl ProjectTask {
    pub fn new(contributor_id: UserId, payload: NewProjectTask) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            contributor_id,
            title: payload.title,
            language: payload.language,
            category: payload.category,
            difficulty: payload.difficulty,
            description: payload.description,
            github_repo: payload.github_repo,
            commit_hash: payload.commit_hash,
            issue_url: payload.issue_url,
            status: ProjectStatus::TaskSubmitted,
            tester_id: None,
            reviewer_id: None,
            tester_assigned_at: None,
            reviewer_assigned_at: None,
            tester_feedback: None,
            reviewer_feedback: None,
            rejection_reason: None,
            task_link: None,
            submitted_account: None,
            task_link_submitted: None,
            account_posted_in: None,
            has_changes_requested: false,
            changes_done: false,
            created_at: now,
            updated_at: now,
            seq: 0,
            version: 0,
        }
    }

    pub fn binding(&self, slot: Slot) -> Option<UserId> {
        match slot {
            Slot::Tester => self.tester_id,
            Slot::Reviewer => self.reviewer_id,
        }
    }

    /// Set a binding and its timestamp.
    pub fn bind(&mut self, slot: Slot, worker: UserId, at: DateTime<Utc>) {
        match slot {
            Slot::Tester => {
                self.tester_id = Some(worker);
                self.tester_assigned_at = Some(at);
            }
            Slot::Reviewer => {
                self.reviewer_id = Some(worker);
                self.reviewer_assigned_at = Some(at);
            }
        }
    }

    pub fn unbind(&mut self, slot: Slot) {
        match slot {
            Slot::Tester => {
                self.tester_id = None;
                self.tester_assigned_at = None;
            }
            Slot::Reviewer => {
                self.reviewer_id = None;
                self.reviewer_assigned_at = None;
            }
        }
    }

    /// Whether the task is waiting for a worker in `slot`.
    pub fn is_queued_for(&self, slot: Slot) -> bool {
        if self.binding(slot).is_some() {
            return false;
        }
        match slot {
            Slot::Tester => {
                self.status == ProjectStatus::TaskSubmitted
                    || (self.status.is_tester_phase() && self.status != ProjectStatus::Rework)
            }
            Slot::Reviewer => self.status.is_reviewer_phase(),
        }
    }
}
