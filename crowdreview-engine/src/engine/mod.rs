//! The engine: assignment, redistribution and both review workflows.
//!
//! Every read-check-write goes through the same loop: read the record, run
//! the pure transition, save with a version check. A version conflict means
//! another request got there first, so the loop re-reads and tries again, up
//! to `EngineConfig::max_conflict_retries` times.
//!
//! Redistribution takes an advisory lock so two rebalances never interleave.
//! Single-task assignment does not; the version check is enough there.

mod assign;
mod project;
mod redistribute;
mod submission;
mod workers;

pub use workers::{AvailabilityChange, Workload};

use std::future::Future;
use std::sync::Arc;

use crowdreview_core::{
    ActivityEvent, Actor, ProjectTask, Role, Submission, TaskId, UserId, Worker,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::directory::WorkerDirectory;
use crate::error::{EngineError, Result};
use crate::notifier::{NoopNotifier, Notifier, StatusChange};
use crate::repository::{ActivityLog, InMemoryRepository, Repository, RepositoryError};

pub struct Engine {
    repo: Arc<dyn Repository>,
    activity: Arc<dyn ActivityLog>,
    notifier: Arc<dyn Notifier>,
    directory: WorkerDirectory,
    config: EngineConfig,
    /// Held for the duration of `assign_queued` and `redistribute_all`.
    redistribution: Mutex<()>,
}

impl Engine {
    pub fn new(
        repo: Arc<dyn Repository>,
        activity: Arc<dyn ActivityLog>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            directory: WorkerDirectory::new(repo.clone()),
            repo,
            activity,
            notifier,
            config,
            redistribution: Mutex::new(()),
        }
    }

    /// Engine over a store that also keeps the activity log.
    pub fn with_store<S>(store: Arc<S>, notifier: Arc<dyn Notifier>, config: EngineConfig) -> Self
    where
        S: Repository + ActivityLog + 'static,
    {
        Self::new(store.clone(), store, notifier, config)
    }

    /// Fresh in-memory engine with default settings and no notifier.
    pub fn in_memory() -> Self {
        Self::with_store(
            Arc::new(InMemoryRepository::new()),
            Arc::new(NoopNotifier),
            EngineConfig::default(),
        )
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    pub fn directory(&self) -> &WorkerDirectory {
        &self.directory
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// Append to the activity log. Failures are logged and swallowed.
    pub(crate) async fn record(&self, event: ActivityEvent) {
        let action = event.action;
        if let Err(e) = self.activity.record(event).await {
            warn!("Failed to record {} activity: {}", action, e);
        }
    }

    /// Best-effort status broadcast.
    pub(crate) async fn notify(&self, change: StatusChange) {
        if let Err(e) = self.notifier.broadcast_status_change(change).await {
            warn!(
                "Failed to broadcast status change for {}: {}",
                change.task_id, e
            );
        }
    }

    /// Run `attempt` until it succeeds, fails for a reason other than a
    /// version conflict, or runs out of retries.
    pub(crate) async fn retrying<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut conflicts = 0;
        loop {
            match attempt().await {
                Err(EngineError::Persistence(e)) if e.is_conflict() => {
                    conflicts += 1;
                    if conflicts > self.config.max_conflict_retries {
                        warn!(
                            "Giving up on {} after {} version conflicts: {}",
                            operation, conflicts, e
                        );
                        return Err(EngineError::Persistence(e));
                    }
                    debug!("Version conflict during {}, retrying: {}", operation, e);
                }
                other => return other,
            }
        }
    }

    pub(crate) async fn require_worker(&self, id: UserId) -> Result<Worker> {
        self.repo
            .get_worker(id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("worker {}", id)))
    }

    pub(crate) async fn require_submission(&self, id: TaskId) -> Result<Submission> {
        self.repo
            .get_submission(id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("submission {}", id)))
    }

    pub(crate) async fn require_project_task(&self, id: TaskId) -> Result<ProjectTask> {
        self.repo
            .get_project_task(id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("project task {}", id)))
    }

    /// The acting account with its stored role. Callers cannot act under a
    /// role the account does not hold.
    pub(crate) async fn resolve_actor(&self, actor: Actor) -> Result<Actor> {
        match actor {
            Actor::System => Ok(Actor::System),
            Actor::User { id, .. } => {
                let worker = self.require_worker(id).await?;
                Ok(Actor::user(id, worker.role))
            }
        }
    }

    /// Display name for log lines; falls back to the id.
    pub(crate) async fn worker_name(&self, id: UserId) -> String {
        match self.repo.get_worker(id).await {
            Ok(Some(worker)) => worker.name,
            _ => id.to_string(),
        }
    }
}

/// Refuse anyone but an admin or the system operator.
pub(crate) fn require_admin(actor: &Actor, action: &str) -> Result<()> {
    match actor {
        Actor::System
        | Actor::User {
            role: Role::Admin, ..
        } => Ok(()),
        Actor::User { .. } => Err(EngineError::precondition(
            actor.role_name(),
            format!("only an admin may {}", action),
        )),
    }
}

/// Persist a single record, mapping the one-element batch back.
pub(crate) fn single<T>(mut saved: Vec<T>, operation: &'static str) -> Result<T> {
    saved
        .pop()
        .ok_or_else(|| RepositoryError::storage(operation, "store returned no record").into())
}
