//! Single-stage submissions and their review records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ReviewId, TaskId, UserId};

/// Lifecycle of a simple submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    /// Unbound, waiting in the queue.
    Pending,
    /// Bound to a worker, awaiting feedback.
    Claimed,
    /// The bound worker recommended approval.
    Eligible,
    /// Terminal. Set by an admin.
    Approved,
}

impl SubmissionStatus {
    pub const ALL: [SubmissionStatus; 4] =
        [Self::Pending, Self::Claimed, Self::Eligible, Self::Approved];

    /// Statuses that count towards a worker's load and that redistribution
    /// may move between workers.
    pub const OPEN: [SubmissionStatus; 3] = [Self::Pending, Self::Claimed, Self::Eligible];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Claimed => "CLAIMED",
            Self::Eligible => "ELIGIBLE",
            Self::Approved => "APPROVED",
        }
    }

    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "CLAIMED" => Ok(Self::Claimed),
            "ELIGIBLE" => Ok(Self::Eligible),
            "APPROVED" => Ok(Self::Approved),
            _ => Err(format!("Invalid submission status: {s}")),
        }
    }
}

/// Payload for creating a submission. Files are stored by the caller
/// before the engine sees the task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSubmission {
    pub title: String,
    pub domain: String,
    pub language: String,
    pub file_url: String,
}

/// A simple (single-stage) work item.
///
/// `status == Pending` exactly when `claimed_by` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: TaskId,
    pub contributor_id: UserId,
    pub title: String,
    pub domain: String,
    pub language: String,
    pub file_url: String,
    pub status: SubmissionStatus,
    pub claimed_by: Option<UserId>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub version: u64,
}

impl Submission {
    pub fn new(contributor_id: UserId, payload: NewSubmission) -> Self {
        Self {
            id: TaskId::new(),
            contributor_id,
            title: payload.title,
            domain: payload.domain,
            language: payload.language,
            file_url: payload.file_url,
            status: SubmissionStatus::Pending,
            claimed_by: None,
            assigned_at: None,
            created_at: Utc::now(),
            seq: 0,
            version: 0,
        }
    }

    /// Whether status and binding agree.
    pub fn binding_consistent(&self) -> bool {
        match self.status {
            SubmissionStatus::Pending => self.claimed_by.is_none(),
            SubmissionStatus::Claimed | SubmissionStatus::Eligible => self.claimed_by.is_some(),
            SubmissionStatus::Approved => true,
        }
    }
}

/// Feedback left on a submission. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub submission_id: TaskId,
    pub reviewer_id: UserId,
    pub feedback: String,
    /// Which external account the reviewer used, if any.
    pub account_posted_in: Option<String>,
    pub created_at: DateTime<Utc>,
}
