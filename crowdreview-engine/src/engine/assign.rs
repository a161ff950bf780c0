//! Single-task assignment.

use chrono::Utc;
use crowdreview_core::{ActivityAction, ActivityEvent, Actor, Slot, Target, TaskId, UserId};
use serde_json::json;
use tracing::info;

use super::{single, Engine};
use crate::directory::Pool;
use crate::error::Result;
use crate::notifier::StatusChange;
use crate::state_machine::project as project_sm;
use crate::state_machine::submission::{transition, SubmissionCommand};
use crate::state_machine::Effect;

impl Engine {
    /// Bind a queued submission to the least-loaded available reviewer.
    ///
    /// Returns `None` and leaves the task queued when nobody is available.
    pub async fn assign(&self, id: TaskId) -> Result<Option<UserId>> {
        let assigned = self
            .retrying("assign", || async move {
                let submission = self.require_submission(id).await?;
                let snapshot = self.directory.load_snapshot(Pool::Submission).await?;
                let Some(worker) = snapshot.least_loaded() else {
                    return Ok(None);
                };

                let next = transition(
                    &submission,
                    &SubmissionCommand::Assign {
                        worker,
                        at: Utc::now(),
                    },
                )?;
                let saved = single(self.repo.save_submissions(vec![next]).await?, "assign")?;
                Ok(Some((saved, worker)))
            })
            .await?;

        let Some((submission, worker)) = assigned else {
            info!("No reviewers available; submission {} stays queued", id);
            return Ok(None);
        };

        let name = self.worker_name(worker).await;
        info!("Auto-assigned submission {} to {}", id, name);
        self.record(
            ActivityEvent::new(
                ActivityAction::AutoAssign,
                Actor::System,
                format!("Task \"{}\" auto-assigned to {}", submission.title, name),
            )
            .with_target(Target::Submission(id))
            .with_metadata(json!({
                "reviewerId": worker.to_string(),
                "reviewerName": name,
            })),
        )
        .await;

        Ok(Some(worker))
    }

    /// Fill the empty `slot` of a project task with the least-loaded worker
    /// from that slot's pool.
    pub async fn assign_project(&self, id: TaskId, slot: Slot) -> Result<Option<UserId>> {
        let pool = Pool::for_slot(slot);
        let assigned = self
            .retrying("assign project task", || async move {
                let task = self.require_project_task(id).await?;
                let snapshot = self.directory.load_snapshot(pool).await?;
                let Some(worker_id) = snapshot.least_loaded() else {
                    return Ok(None);
                };
                let worker = self.require_worker(worker_id).await?;

                let result = project_sm::assign(&task, slot, &worker, Utc::now())?;
                let saved = single(
                    self.repo.save_project_tasks(vec![result.task]).await?,
                    "assign project task",
                )?;
                Ok(Some((task.status, saved, worker, result.effects)))
            })
            .await?;

        let Some((from, task, worker, effects)) = assigned else {
            info!("No {}s available; project task {} stays queued", slot, id);
            return Ok(None);
        };

        info!("Auto-assigned project task {} to {} {}", id, slot, worker.name);
        self.record(
            ActivityEvent::new(
                ActivityAction::AutoAssign,
                Actor::System,
                format!(
                    "Project task \"{}\" auto-assigned to {} {}",
                    task.title, slot, worker.name
                ),
            )
            .with_target(Target::ProjectTask(id))
            .with_metadata(json!({
                "slot": slot,
                "workerId": worker.id.to_string(),
                "workerName": worker.name,
                "status": task.status,
            })),
        )
        .await;

        for effect in effects {
            if let Effect::BroadcastStatus { status } = effect {
                self.notify(StatusChange {
                    task_id: id,
                    from,
                    to: status,
                })
                .await;
            }
        }

        Ok(Some(worker.id))
    }
}
