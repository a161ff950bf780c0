//! Identities, roles and workers.
//!
//! Identifiers are newtypes over `Uuid` so a task id can never be passed
//! where a user id is expected.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Newtype for any platform account (contributor, tester, reviewer, admin).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Newtype for a work item id. Used for both simple submissions and
/// project tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Newtype for a review (feedback record) id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewId(pub Uuid);

impl ReviewId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ReviewId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Reviewer,
    Tester,
    Contributor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Reviewer => "REVIEWER",
            Self::Tester => "TESTER",
            Self::Contributor => "CONTRIBUTOR",
        }
    }

    /// Roles that need admin approval before they receive work.
    pub fn requires_approval(&self) -> bool {
        matches!(self, Self::Reviewer | Self::Tester)
    }

    /// Roles whose green light can be toggled.
    pub fn can_hold_assignments(&self) -> bool {
        matches!(self, Self::Reviewer | Self::Tester)
    }

    /// Roles a simple submission may be bound to. Admins bind by claiming.
    pub fn can_hold_submission(&self) -> bool {
        matches!(self, Self::Reviewer | Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ADMIN" => Ok(Self::Admin),
            "REVIEWER" => Ok(Self::Reviewer),
            "TESTER" => Ok(Self::Tester),
            "CONTRIBUTOR" => Ok(Self::Contributor),
            _ => Err(format!(
                "Invalid role: {s}. Use: admin, reviewer, tester, contributor"
            )),
        }
    }
}

/// A platform account as seen by the assignment engine.
///
/// Load is never stored here; it is derived from task bindings at the
/// moment a decision is made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: UserId,
    pub name: String,
    pub role: Role,
    /// Admin-approved to receive work.
    pub eligible: bool,
    /// Opted in to receive new assignments ("green light").
    pub available: bool,
    pub created_at: DateTime<Utc>,
    /// Registration order, assigned by the store on insert.
    #[serde(default)]
    pub seq: u64,
    /// Optimistic concurrency token, bumped by the store on every save.
    #[serde(default)]
    pub version: u64,
}

impl Worker {
    /// Build a freshly registered account. Contributors and admins are
    /// approved on creation; testers and reviewers wait for an admin.
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            id: UserId::new(),
            name: name.into(),
            role,
            eligible: !role.requires_approval(),
            available: false,
            created_at: Utc::now(),
            seq: 0,
            version: 0,
        }
    }

    /// Eligible and opted in.
    pub fn is_assignable(&self) -> bool {
        self.eligible && self.available
    }
}
