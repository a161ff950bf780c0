//! Activity log events.
//!
//! Every workflow transition, assignment and directory change produces one
//! of these. They are append-only.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Role, TaskId, UserId};

/// Who caused an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actor {
    /// Automated engine action (auto-assignment, redistribution).
    System,
    /// A human account acting with the given role.
    User { id: UserId, role: Role },
}

impl Actor {
    pub const SYSTEM_NAME: &'static str = "System";
    pub const SYSTEM_ROLE: &'static str = "SYSTEM";

    pub fn user(id: UserId, role: Role) -> Self {
        Self::User { id, role }
    }

    /// The id recorded for this actor. The system actor uses the nil UUID.
    pub fn id(&self) -> Uuid {
        match self {
            Self::System => Uuid::nil(),
            Self::User { id, .. } => id.0,
        }
    }

    pub fn role_name(&self) -> &'static str {
        match self {
            Self::System => Self::SYSTEM_ROLE,
            Self::User { role, .. } => role.as_str(),
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str(Self::SYSTEM_NAME),
            Self::User { id, role } => write!(f, "{} {}", role, id),
        }
    }
}

/// Action vocabulary of the activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityAction {
    SubmissionCreated,
    ProjectCreated,
    AutoAssign,
    QueuedAssign,
    Redistribute,
    ManualClaim,
    Review,
    Approve,
    Delete,
    ProjectTransition,
    RegisterUser,
    ApproveWorker,
    ToggleGreenLight,
    SwitchRole,
    DeleteUser,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubmissionCreated => "SUBMISSION_CREATED",
            Self::ProjectCreated => "PROJECT_CREATED",
            Self::AutoAssign => "AUTO_ASSIGN",
            Self::QueuedAssign => "QUEUED_ASSIGN",
            Self::Redistribute => "REDISTRIBUTE",
            Self::ManualClaim => "MANUAL_CLAIM",
            Self::Review => "REVIEW",
            Self::Approve => "APPROVE",
            Self::Delete => "DELETE",
            Self::ProjectTransition => "PROJECT_TRANSITION",
            Self::RegisterUser => "REGISTER_USER",
            Self::ApproveWorker => "APPROVE_WORKER",
            Self::ToggleGreenLight => "TOGGLE_GREEN_LIGHT",
            Self::SwitchRole => "SWITCH_ROLE",
            Self::DeleteUser => "DELETE_USER",
        }
    }
}

impl fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Target {
    Submission(TaskId),
    ProjectTask(TaskId),
    User(UserId),
}

impl Target {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Submission(id) | Self::ProjectTask(id) => id.0,
            Self::User(id) => id.0,
        }
    }
}

/// A single activity log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub action: ActivityAction,
    pub description: String,
    pub actor: Actor,
    pub target: Option<Target>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn new(action: ActivityAction, actor: Actor, description: impl Into<String>) -> Self {
        Self {
            action,
            description: description.into(),
            actor,
            target: None,
            metadata: serde_json::Value::Null,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
