//! Batch assignment and global rebalancing.
//!
//! Both entry points hold the redistribution lock, snapshot worker loads
//! once, and then update the snapshot locally as tasks are placed.

use chrono::Utc;
use crowdreview_core::{
    ActivityAction, ActivityEvent, Actor, ProjectStatus, Slot, SubmissionStatus, Target,
};
use serde_json::json;
use tracing::{info, warn};

use super::{single, Engine};
use crate::allocation::plan_redistribution;
use crate::directory::Pool;
use crate::error::{EngineError, Result};
use crate::notifier::StatusChange;
use crate::state_machine::project as project_sm;
use crate::state_machine::submission::{transition, SubmissionCommand};
use crate::state_machine::Effect;

impl Engine {
    /// Assign every queued task, oldest first, across all pools.
    ///
    /// Returns the number of tasks that received a worker.
    pub async fn assign_queued(&self) -> Result<usize> {
        let _guard = self.redistribution.lock().await;
        let mut assigned = self.assign_queued_submissions().await?;
        for slot in [Slot::Tester, Slot::Reviewer] {
            assigned += self.assign_queued_projects(slot).await?;
        }
        Ok(assigned)
    }

    /// Same as [`Engine::assign_queued`] but only for one project slot.
    pub async fn assign_queued_for(&self, slot: Slot) -> Result<usize> {
        let _guard = self.redistribution.lock().await;
        self.assign_queued_projects(slot).await
    }

    async fn assign_queued_submissions(&self) -> Result<usize> {
        let queued = self
            .repo
            .list_submissions(&[SubmissionStatus::Pending])
            .await?;
        if queued.is_empty() {
            return Ok(0);
        }
        let mut snapshot = self.directory.load_snapshot(Pool::Submission).await?;
        if snapshot.is_empty() {
            info!(
                "No reviewers available; {} submissions stay queued",
                queued.len()
            );
            return Ok(0);
        }

        let mut assigned = 0;
        for submission in queued {
            let Some(worker) = snapshot.least_loaded() else {
                break;
            };
            let next = match transition(
                &submission,
                &SubmissionCommand::Assign {
                    worker,
                    at: Utc::now(),
                },
            ) {
                Ok(next) => next,
                Err(e) => {
                    warn!("Skipping queued submission {}: {}", submission.id, e);
                    continue;
                }
            };

            match self.repo.save_submissions(vec![next]).await {
                Ok(_) => {}
                Err(e) if e.is_conflict() => {
                    // Someone else changed it since the listing; leave it to them.
                    warn!("Skipping queued submission {}: {}", submission.id, e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            snapshot.record_assignment(worker);
            assigned += 1;

            let name = self.worker_name(worker).await;
            self.record(
                ActivityEvent::new(
                    ActivityAction::QueuedAssign,
                    Actor::System,
                    format!("Queued task \"{}\" assigned to {}", submission.title, name),
                )
                .with_target(Target::Submission(submission.id))
                .with_metadata(json!({
                    "reviewerId": worker.to_string(),
                    "reviewerName": name,
                })),
            )
            .await;
        }

        info!("Assigned {} queued submissions", assigned);
        Ok(assigned)
    }

    async fn assign_queued_projects(&self, slot: Slot) -> Result<usize> {
        let queued: Vec<_> = self
            .repo
            .list_project_tasks(&ProjectStatus::ALL)
            .await?
            .into_iter()
            .filter(|task| task.is_queued_for(slot))
            .collect();
        if queued.is_empty() {
            return Ok(0);
        }
        let mut snapshot = self.directory.load_snapshot(Pool::for_slot(slot)).await?;
        if snapshot.is_empty() {
            info!(
                "No {}s available; {} project tasks stay queued",
                slot,
                queued.len()
            );
            return Ok(0);
        }

        let mut assigned = 0;
        for task in queued {
            let Some(worker_id) = snapshot.least_loaded() else {
                break;
            };
            let worker = self.require_worker(worker_id).await?;
            let result = match project_sm::assign(&task, slot, &worker, Utc::now()) {
                Ok(result) => result,
                Err(e) => {
                    warn!("Skipping queued project task {}: {}", task.id, e);
                    continue;
                }
            };

            let saved = match self.repo.save_project_tasks(vec![result.task]).await {
                Ok(saved) => single(saved, "assign queued project task")?,
                Err(e) if e.is_conflict() => {
                    warn!("Skipping queued project task {}: {}", task.id, e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            snapshot.record_assignment(worker_id);
            assigned += 1;

            self.record(
                ActivityEvent::new(
                    ActivityAction::QueuedAssign,
                    Actor::System,
                    format!(
                        "Queued project task \"{}\" assigned to {} {}",
                        saved.title, slot, worker.name
                    ),
                )
                .with_target(Target::ProjectTask(saved.id))
                .with_metadata(json!({
                    "slot": slot,
                    "workerId": worker.id.to_string(),
                    "workerName": worker.name,
                })),
            )
            .await;

            for effect in result.effects {
                if let Effect::BroadcastStatus { status } = effect {
                    self.notify(StatusChange {
                        task_id: saved.id,
                        from: task.status,
                        to: status,
                    })
                    .await;
                }
            }
        }

        info!("Assigned {} queued project tasks to {}s", assigned, slot);
        Ok(assigned)
    }

    /// Rebalance every open submission across the available pool.
    ///
    /// Each worker gets `N / W` tasks and the first `N % W` workers in pool
    /// order one more. Tasks are dealt oldest first, filling one worker's
    /// quota before moving to the next. Tasks that already sit with their
    /// planned worker are left untouched on disk.
    ///
    /// Returns the number of open tasks placed by the plan.
    pub async fn redistribute_all(&self) -> Result<usize> {
        let _guard = self.redistribution.lock().await;
        self.retrying("redistribute", || self.redistribute_once())
            .await
    }

    async fn redistribute_once(&self) -> Result<usize> {
        let workers = self
            .directory
            .eligible_available_workers(Pool::Submission)
            .await?;
        if workers.is_empty() {
            info!("No reviewers available; skipping redistribution");
            return Ok(0);
        }
        let tasks = self.repo.list_submissions(&SubmissionStatus::OPEN).await?;
        if tasks.is_empty() {
            return Ok(0);
        }

        let worker_ids: Vec<_> = workers.iter().map(|w| w.id).collect();
        let task_ids: Vec<_> = tasks.iter().map(|t| t.id).collect();
        let plan = plan_redistribution(&task_ids, &worker_ids);

        let at = Utc::now();
        let mut changed = Vec::new();
        for (submission, (_, worker)) in tasks.iter().zip(&plan) {
            if submission.claimed_by == Some(*worker) {
                continue;
            }
            let next = transition(
                submission,
                &SubmissionCommand::Rebind {
                    worker: *worker,
                    at,
                },
            )
            .map_err(EngineError::from)?;
            changed.push(next);
        }
        let moved = changed.len();
        if !changed.is_empty() {
            self.repo.save_submissions(changed).await?;
        }

        info!(
            "Redistributed {} open submissions across {} reviewers ({} moved)",
            plan.len(),
            workers.len(),
            moved
        );
        self.record(
            ActivityEvent::new(
                ActivityAction::Redistribute,
                Actor::System,
                format!(
                    "Redistributed {} tasks across {} reviewers",
                    plan.len(),
                    workers.len()
                ),
            )
            .with_metadata(json!({
                "tasks": plan.len(),
                "workers": workers.len(),
                "moved": moved,
            })),
        )
        .await;

        Ok(plan.len())
    }
}
