//! Project task workflow.
//!
//! Status changes run through the rule table in `state_machine::project`.
//! After a successful save the engine executes the returned effects: it
//! broadcasts the new status and fills any slot the task is now queued for.

use chrono::Utc;
use crowdreview_core::{
    ActivityAction, ActivityEvent, Actor, NewProjectTask, ProjectStatus, ProjectTask, Role, Slot,
    TaskId, Target, UserId,
};
use serde_json::json;
use tracing::{info, warn};

use super::{single, Engine};
use crate::error::{EngineError, Result};
use crate::notifier::StatusChange;
use crate::state_machine::project::{self as project_sm, TransitionExtra, TransitionRequest};
use crate::state_machine::Effect;

impl Engine {
    /// Store a new project task and try to hand it to a tester.
    pub async fn create_project_task(
        &self,
        contributor: UserId,
        payload: NewProjectTask,
    ) -> Result<ProjectTask> {
        let task = self
            .repo
            .insert_project_task(ProjectTask::new(contributor, payload))
            .await?;
        info!("Created project task {} ({})", task.id, task.title);

        self.record(
            ActivityEvent::new(
                ActivityAction::ProjectCreated,
                Actor::user(contributor, Role::Contributor),
                format!("Project task \"{}\" submitted", task.title),
            )
            .with_target(Target::ProjectTask(task.id))
            .with_metadata(json!({
                "language": task.language,
                "category": task.category,
                "difficulty": task.difficulty,
            })),
        )
        .await;

        if !self.config.auto_assign {
            return Ok(task);
        }
        // The insert is committed; a failed assignment leaves the task queued.
        match self.assign_project(task.id, Slot::Tester).await {
            Ok(None) => Ok(task),
            Ok(Some(_)) => Ok(self.require_project_task(task.id).await.unwrap_or(task)),
            Err(e) => {
                warn!(
                    "Auto-assign of project task {} failed, leaving it queued: {}",
                    task.id, e
                );
                Ok(task)
            }
        }
    }

    /// Move a project task to `to` on behalf of `actor`.
    ///
    /// The first tester or reviewer to act becomes the sticky binding for
    /// their slot. Returns the task as saved, before any follow-up
    /// auto-assignment. A user actor acts under their stored role, whatever
    /// role the caller passed.
    pub async fn transition_project(
        &self,
        id: TaskId,
        to: ProjectStatus,
        actor: Actor,
        extra: TransitionExtra,
    ) -> Result<ProjectTask> {
        let actor = self.resolve_actor(actor).await?;
        let request = TransitionRequest { to, actor, extra };
        let req = &request;
        let (from, saved, effects) = self
            .retrying("project transition", || async move {
                let task = self.require_project_task(id).await?;
                let result = project_sm::transition(&task, req, Utc::now())?;
                let saved = single(
                    self.repo.save_project_tasks(vec![result.task]).await?,
                    "project transition",
                )?;
                Ok((task.status, saved, result.effects))
            })
            .await?;

        info!(
            "Project task {} moved {} -> {} by {}",
            id, from, to, request.actor
        );
        let mut metadata = json!({
            "from": from,
            "to": to,
        });
        if let Some(feedback) = saved_feedback(&saved, to) {
            metadata["feedback"] = json!(feedback);
        }
        if to == ProjectStatus::Rejected {
            metadata["rejectionReason"] = json!(saved.rejection_reason);
        }
        self.record(
            ActivityEvent::new(
                ActivityAction::ProjectTransition,
                request.actor.clone(),
                format!("Project task \"{}\" moved to {}", saved.title, to),
            )
            .with_target(Target::ProjectTask(id))
            .with_metadata(metadata),
        )
        .await;

        self.run_effects(id, from, effects).await;
        Ok(saved)
    }

    async fn run_effects(&self, id: TaskId, from: ProjectStatus, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::BroadcastStatus { status } => {
                    self.notify(StatusChange {
                        task_id: id,
                        from,
                        to: status,
                    })
                    .await;
                }
                Effect::AutoAssign { slot } => {
                    if !self.config.auto_assign {
                        continue;
                    }
                    // The transition itself already succeeded.
                    if let Err(e) = self.assign_project(id, slot).await {
                        warn!("Auto-assign of {} for project task {} failed: {}", slot, id, e);
                    }
                }
            }
        }
    }

    /// Delete a project task. Only its contributor or an admin may do this.
    pub async fn delete_project_task(&self, id: TaskId, actor: Actor) -> Result<()> {
        let task = self.require_project_task(id).await?;
        let allowed = match &actor {
            Actor::User {
                role: Role::Admin, ..
            } => true,
            Actor::User { id: user, .. } => *user == task.contributor_id,
            Actor::System => false,
        };
        if !allowed {
            return Err(EngineError::precondition(
                task.status.as_str(),
                format!("{} may not delete this project task", actor.role_name()),
            ));
        }

        if !self.repo.delete_project_task(id).await? {
            return Err(EngineError::not_found(format!("project task {}", id)));
        }
        info!("Deleted project task {}", id);
        self.record(
            ActivityEvent::new(
                ActivityAction::Delete,
                actor,
                format!("Project task \"{}\" deleted", task.title),
            )
            .with_target(Target::ProjectTask(id))
            .with_metadata(json!({ "status": task.status })),
        )
        .await;
        Ok(())
    }

    /// Statuses a user could request next for this task.
    pub async fn allowed_project_targets(&self, id: TaskId) -> Result<Vec<ProjectStatus>> {
        let task = self.require_project_task(id).await?;
        Ok(project_sm::allowed_targets(task.status))
    }
}

fn saved_feedback(task: &ProjectTask, to: ProjectStatus) -> Option<String> {
    match to {
        ProjectStatus::Rework => task.tester_feedback.clone(),
        ProjectStatus::ChangesRequested => task.reviewer_feedback.clone(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crowdreview_core::Worker;

    use super::*;
    use crate::config::EngineConfig;
    use crate::notifier::BroadcastNotifier;
    use crate::repository::InMemoryRepository;

    async fn worker(engine: &Engine, name: &str, role: Role) -> Worker {
        let mut worker = Worker::new(name, role);
        worker.eligible = true;
        worker.available = true;
        engine.repo.insert_worker(worker).await.unwrap()
    }

    fn extra_link() -> TransitionExtra {
        TransitionExtra {
            task_link: Some("https://platform.example/t/1".to_string()),
            ..TransitionExtra::default()
        }
    }

    #[tokio::test]
    async fn test_create_assigns_tester_and_starts_testing() {
        let engine = Engine::in_memory();
        let tester = worker(&engine, "Tess", Role::Tester).await;

        let task = engine
            .create_project_task(UserId::new(), NewProjectTask::default())
            .await
            .unwrap();
        assert_eq!(task.status, ProjectStatus::InTesting);
        assert_eq!(task.tester_id, Some(tester.id));
    }

    #[tokio::test]
    async fn test_create_without_testers_stays_submitted() {
        let engine = Engine::in_memory();
        let task = engine
            .create_project_task(UserId::new(), NewProjectTask::default())
            .await
            .unwrap();
        assert_eq!(task.status, ProjectStatus::TaskSubmitted);
        assert!(task.tester_id.is_none());
    }

    #[tokio::test]
    async fn test_handoff_to_review_auto_assigns_reviewer() {
        let engine = Engine::in_memory();
        let tester = worker(&engine, "Tess", Role::Tester).await;
        let reviewer = worker(&engine, "Rae", Role::Reviewer).await;
        let task = engine
            .create_project_task(UserId::new(), NewProjectTask::default())
            .await
            .unwrap();

        let saved = engine
            .transition_project(
                task.id,
                ProjectStatus::EligibleForManualReview,
                Actor::user(tester.id, Role::Tester),
                extra_link(),
            )
            .await
            .unwrap();
        assert_eq!(saved.task_link.as_deref(), Some("https://platform.example/t/1"));

        let after = engine.repo.get_project_task(task.id).await.unwrap().unwrap();
        assert_eq!(after.reviewer_id, Some(reviewer.id));
        assert_eq!(after.tester_id, Some(tester.id));
    }

    #[tokio::test]
    async fn test_other_tester_is_refused_with_current_status() {
        let engine = Engine::in_memory();
        worker(&engine, "Tess", Role::Tester).await;
        let other = worker(&engine, "Tom", Role::Tester).await;
        let task = engine
            .create_project_task(UserId::new(), NewProjectTask::default())
            .await
            .unwrap();

        let err = engine
            .transition_project(
                task.id,
                ProjectStatus::EligibleForManualReview,
                Actor::user(other.id, Role::Tester),
                extra_link(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.current_status(), Some("IN_TESTING"));
    }

    #[tokio::test]
    async fn test_transition_broadcasts_status_change() {
        let notifier = Arc::new(BroadcastNotifier::new(16));
        let mut rx = notifier.subscribe();
        let engine = Engine::with_store(
            Arc::new(InMemoryRepository::new()),
            notifier,
            EngineConfig::default(),
        );
        let tester = worker(&engine, "Tess", Role::Tester).await;
        let task = engine
            .create_project_task(UserId::new(), NewProjectTask::default())
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.from, ProjectStatus::TaskSubmitted);
        assert_eq!(first.to, ProjectStatus::InTesting);

        engine
            .transition_project(
                task.id,
                ProjectStatus::Rework,
                Actor::user(tester.id, Role::Tester),
                TransitionExtra {
                    feedback: Some("fix the tests".to_string()),
                    ..TransitionExtra::default()
                },
            )
            .await
            .unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(second.from, ProjectStatus::InTesting);
        assert_eq!(second.to, ProjectStatus::Rework);

        let log = engine.recent_activity(1).await.unwrap();
        assert_eq!(log[0].action, ActivityAction::ProjectTransition);
        assert_eq!(log[0].metadata["feedback"], "fix the tests");
    }

    #[tokio::test]
    async fn test_delete_project_task_requires_owner_or_admin() {
        let engine = Engine::in_memory();
        let owner = UserId::new();
        let task = engine
            .create_project_task(owner, NewProjectTask::default())
            .await
            .unwrap();

        let err = engine
            .delete_project_task(task.id, Actor::user(UserId::new(), Role::Tester))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PreconditionFailed { .. }));

        engine
            .delete_project_task(task.id, Actor::user(UserId::new(), Role::Admin))
            .await
            .unwrap();
        assert!(engine.repo.get_project_task(task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_allowed_targets_for_fresh_task() {
        let engine = Engine::in_memory();
        let task = engine
            .create_project_task(UserId::new(), NewProjectTask::default())
            .await
            .unwrap();
        // Only the system moves a fresh task.
        assert!(engine
            .allowed_project_targets(task.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_create_returns_stored_task_when_auto_assign_fails() {
        let store = Arc::new(crate::repository::testing::TaskWritesFail::new());
        let engine = Engine::with_store(
            store.clone(),
            Arc::new(crate::notifier::NoopNotifier),
            EngineConfig::default(),
        );
        worker(&engine, "Tess", Role::Tester).await;
        store.fail_task_saves();

        let task = engine
            .create_project_task(UserId::new(), NewProjectTask::default())
            .await
            .unwrap();
        assert_eq!(task.status, ProjectStatus::TaskSubmitted);
        assert!(engine.repo.get_project_task(task.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_actor_acts_under_stored_role() {
        let engine = Engine::in_memory();
        let tester = worker(&engine, "Tess", Role::Tester).await;
        let task = engine
            .create_project_task(UserId::new(), NewProjectTask::default())
            .await
            .unwrap();
        engine
            .transition_project(
                task.id,
                ProjectStatus::EligibleForManualReview,
                Actor::user(tester.id, Role::Tester),
                extra_link(),
            )
            .await
            .unwrap();

        // No reviewer exists, so the reviewer slot is open. A tester
        // claiming to be a reviewer must not take it.
        let err = engine
            .transition_project(
                task.id,
                ProjectStatus::FinalChecks,
                Actor::user(tester.id, Role::Reviewer),
                TransitionExtra::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.current_status(), Some("ELIGIBLE_FOR_MANUAL_REVIEW"));
        let after = engine.repo.get_project_task(task.id).await.unwrap().unwrap();
        assert!(after.reviewer_id.is_none());

        let err = engine
            .transition_project(
                task.id,
                ProjectStatus::FinalChecks,
                Actor::user(UserId::new(), Role::Admin),
                TransitionExtra::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
