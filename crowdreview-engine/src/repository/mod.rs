//! Repository abstraction for workers, tasks and the activity log.
//!
//! The engine talks to storage only through the `Repository` and
//! `ActivityLog` traits. Two backends are provided: an in-memory one for
//! tests and embedding, and SQLite for durable state.
//!
//! # Concurrency
//!
//! Every record carries a `version`. `save_*` calls succeed only when the
//! stored version equals the caller's copy, and bump it on write. A mismatch
//! is reported as `RepositoryError::Conflict` and nothing is written. Batch
//! saves are all-or-nothing.
//!
//! # Bindings
//!
//! A save that changes a task's binding must name a worker who still exists
//! and whose role can hold that binding. Otherwise the save is a `Conflict`,
//! so an engine retry picks from a fresh pool.
//!
//! # Ordering
//!
//! Inserts are stamped with a store-assigned `seq`. Lists come back in
//! ascending `seq`, which is registration order for workers and creation
//! order ("oldest first") for tasks.

mod memory;
pub mod sqlite;
#[cfg(test)]
pub(crate) mod testing;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use crowdreview_core::{
    ActivityEvent, ProjectStatus, ProjectTask, Review, Slot, Submission, SubmissionStatus, TaskId,
    UserId, Worker,
};
use thiserror::Error;
use uuid::Uuid;

/// Storage failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("storage error during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },

    #[error("corrupt record: {0}")]
    Corruption(String),

    #[error("{kind} {id} was modified concurrently")]
    Conflict { kind: &'static str, id: Uuid },
}

impl RepositoryError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            message: message.into(),
        }
    }

    pub fn corruption(what: impl Into<String>) -> Self {
        Self::Corruption(what.into())
    }

    pub fn conflict(kind: &'static str, id: Uuid) -> Self {
        Self::Conflict { kind, id }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Tasks removed along with a deleted account because it contributed them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovedWork {
    pub submissions: usize,
    pub project_tasks: usize,
}

/// Persistent state of the platform as seen by the engine.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- workers ---

    /// Store a new worker. Returns it with `seq` assigned.
    async fn insert_worker(&self, worker: Worker) -> Result<Worker, RepositoryError>;

    async fn get_worker(&self, id: UserId) -> Result<Option<Worker>, RepositoryError>;

    /// All workers in registration order.
    async fn list_workers(&self) -> Result<Vec<Worker>, RepositoryError>;

    /// Version-checked update. Returns the stored copy with its new version.
    async fn save_worker(&self, worker: &Worker) -> Result<Worker, RepositoryError>;

    /// Save a worker together with the tasks released from them, in one
    /// write. Fails with `Conflict` if an open task would still bind the
    /// worker to a slot the saved role cannot hold.
    async fn save_worker_releasing(
        &self,
        worker: &Worker,
        submissions: Vec<Submission>,
        projects: Vec<ProjectTask>,
    ) -> Result<Worker, RepositoryError>;

    /// Delete a worker in one write: save the tasks released from them,
    /// remove every task they contributed (reviews included), then drop the
    /// account. Fails with `Conflict`, writing nothing, if any task would
    /// still bind the worker. Every record is version-checked.
    async fn delete_worker(
        &self,
        worker: &Worker,
        submissions: Vec<Submission>,
        projects: Vec<ProjectTask>,
    ) -> Result<RemovedWork, RepositoryError>;

    // --- simple submissions ---

    /// Store a new submission. Returns it with `seq` assigned.
    async fn insert_submission(&self, submission: Submission)
        -> Result<Submission, RepositoryError>;

    async fn get_submission(&self, id: TaskId) -> Result<Option<Submission>, RepositoryError>;

    /// Submissions whose status is in `statuses`, oldest first.
    async fn list_submissions(
        &self,
        statuses: &[SubmissionStatus],
    ) -> Result<Vec<Submission>, RepositoryError>;

    /// Number of submissions bound to `worker` with a status in `statuses`.
    async fn count_submission_load(
        &self,
        worker: UserId,
        statuses: &[SubmissionStatus],
    ) -> Result<usize, RepositoryError>;

    /// Version-checked batch update, all-or-nothing.
    async fn save_submissions(
        &self,
        submissions: Vec<Submission>,
    ) -> Result<Vec<Submission>, RepositoryError>;

    /// Insert a review and save its submission in one write.
    async fn commit_feedback(
        &self,
        review: Review,
        submission: Submission,
    ) -> Result<Submission, RepositoryError>;

    /// Reviews for a submission, oldest first.
    async fn list_reviews(&self, submission: TaskId) -> Result<Vec<Review>, RepositoryError>;

    /// Delete a submission and its reviews. Returns false if it did not exist.
    async fn delete_submission(&self, id: TaskId) -> Result<bool, RepositoryError>;

    // --- project tasks ---

    /// Store a new project task. Returns it with `seq` assigned.
    async fn insert_project_task(&self, task: ProjectTask)
        -> Result<ProjectTask, RepositoryError>;

    async fn get_project_task(&self, id: TaskId) -> Result<Option<ProjectTask>, RepositoryError>;

    /// Project tasks whose status is in `statuses`, oldest first.
    async fn list_project_tasks(
        &self,
        statuses: &[ProjectStatus],
    ) -> Result<Vec<ProjectTask>, RepositoryError>;

    /// Number of tasks bound to `worker` in `slot` whose status counts
    /// towards that slot's load.
    async fn count_project_load(&self, worker: UserId, slot: Slot)
        -> Result<usize, RepositoryError>;

    /// Version-checked batch update, all-or-nothing.
    async fn save_project_tasks(
        &self,
        tasks: Vec<ProjectTask>,
    ) -> Result<Vec<ProjectTask>, RepositoryError>;

    /// Returns false if the task did not exist.
    async fn delete_project_task(&self, id: TaskId) -> Result<bool, RepositoryError>;
}

/// Append-only activity log sink.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn record(&self, event: ActivityEvent) -> Result<(), RepositoryError>;

    /// Most recent events, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<ActivityEvent>, RepositoryError>;
}
