//! Worker directory operations and the per-worker workload view.

use crowdreview_core::{
    ActivityAction, ActivityEvent, Actor, ProjectStatus, ProjectTask, Role, Slot, Submission,
    SubmissionStatus, Target, UserId, Worker,
};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::{require_admin, Engine};
use crate::directory::Pool;
use crate::error::{EngineError, Result};
use crate::state_machine::submission::{transition, SubmissionCommand};

/// Everything currently on a worker's plate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Workload {
    pub worker: Worker,
    /// Open simple submissions, most recently assigned first.
    pub submissions: Vec<Submission>,
    /// Project tasks bound to the worker as tester, in a tester-phase status.
    pub testing: Vec<ProjectTask>,
    /// Project tasks bound to the worker as reviewer, in a reviewer-phase status.
    pub reviewing: Vec<ProjectTask>,
}

impl Workload {
    pub fn total(&self) -> usize {
        self.submissions.len() + self.testing.len() + self.reviewing.len()
    }
}

/// Outcome of an availability change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityChange {
    pub worker: Worker,
    /// Tasks placed by the redistribution the change triggered, if any.
    pub tasks_redistributed: usize,
}

impl Engine {
    /// Create an account. Contributors and admins are eligible straight
    /// away; testers and reviewers wait for [`Engine::approve_worker`].
    pub async fn register_worker(&self, name: &str, role: Role) -> Result<Worker> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::precondition(
                "UNREGISTERED",
                "worker name must not be empty",
            ));
        }
        let worker = self.repo.insert_worker(Worker::new(name, role)).await?;
        info!("Registered {} {} ({})", role, worker.name, worker.id);

        self.record(
            ActivityEvent::new(
                ActivityAction::RegisterUser,
                Actor::user(worker.id, role),
                format!("{} registered as {}", worker.name, role),
            )
            .with_target(Target::User(worker.id))
            .with_metadata(json!({ "eligible": worker.eligible })),
        )
        .await;
        Ok(worker)
    }

    pub async fn list_workers(&self) -> Result<Vec<Worker>> {
        Ok(self.repo.list_workers().await?)
    }

    /// Admin approval of a tester or reviewer.
    pub async fn approve_worker(&self, id: UserId, actor: Actor) -> Result<Worker> {
        let worker = self
            .retrying("approve worker", || async move {
                let mut worker = self.require_worker(id).await?;
                if !worker.role.requires_approval() {
                    return Err(EngineError::precondition(
                        worker.role.as_str(),
                        format!("{} accounts do not need approval", worker.role),
                    ));
                }
                worker.eligible = true;
                Ok(self.repo.save_worker(&worker).await?)
            })
            .await?;

        info!("Approved {} {}", worker.role, worker.name);
        self.record(
            ActivityEvent::new(
                ActivityAction::ApproveWorker,
                actor,
                format!("{} approved as {}", worker.name, worker.role),
            )
            .with_target(Target::User(id)),
        )
        .await;
        Ok(worker)
    }

    /// Flip a worker's green light.
    pub async fn toggle_availability(&self, id: UserId) -> Result<AvailabilityChange> {
        let current = self.require_worker(id).await?;
        self.set_availability(id, !current.available).await
    }

    /// Turn a worker's green light on or off.
    ///
    /// Going from off to on rebalances every pool the worker belongs to, so
    /// the newcomer picks up a fair share straight away. Work already bound
    /// to a worker who goes off stays with them.
    pub async fn set_availability(&self, id: UserId, available: bool) -> Result<AvailabilityChange> {
        let (before, worker) = self
            .retrying("set availability", || async move {
                let mut worker = self.require_worker(id).await?;
                if !worker.role.can_hold_assignments() {
                    return Err(EngineError::precondition(
                        worker.role.as_str(),
                        format!("{} accounts have no green light", worker.role),
                    ));
                }
                let before = worker.available;
                worker.available = available;
                Ok((before, self.repo.save_worker(&worker).await?))
            })
            .await?;

        let mut tasks_redistributed = 0;
        if !before && worker.available && worker.eligible {
            for pool in Pool::for_role(worker.role) {
                let placed = match pool {
                    Pool::Submission => self.redistribute_all().await,
                    Pool::ProjectTester => self.assign_queued_for(Slot::Tester).await,
                    Pool::ProjectReviewer => self.assign_queued_for(Slot::Reviewer).await,
                };
                // The green light is already saved either way.
                match placed {
                    Ok(count) => tasks_redistributed += count,
                    Err(e) => warn!(
                        "Rebalancing the {} pool for {} failed: {}",
                        pool, worker.name, e
                    ),
                }
            }
        }

        info!(
            "{} is now {} ({} tasks redistributed)",
            worker.name,
            if worker.available { "available" } else { "unavailable" },
            tasks_redistributed
        );
        self.record(
            ActivityEvent::new(
                ActivityAction::ToggleGreenLight,
                Actor::user(worker.id, worker.role),
                format!(
                    "{} turned green light {}",
                    worker.name,
                    if worker.available { "on" } else { "off" }
                ),
            )
            .with_target(Target::User(worker.id))
            .with_metadata(json!({
                "available": worker.available,
                "tasksRedistributed": tasks_redistributed,
            })),
        )
        .await;

        Ok(AvailabilityChange {
            worker,
            tasks_redistributed,
        })
    }

    /// Admin change of an account's role.
    ///
    /// Open work bound to the worker in a slot the new role cannot hold goes
    /// back to the queue in the same write. Switching to contributor approves
    /// the account, switching to tester needs a fresh approval, and roles
    /// without a green light lose it.
    pub async fn switch_role(&self, id: UserId, new_role: Role, actor: Actor) -> Result<Worker> {
        require_admin(&actor, "switch roles")?;

        let (old_role, worker, released, unbound) = self
            .retrying("switch role", || async move {
                let mut worker = self.require_worker(id).await?;
                let old_role = worker.role;
                if old_role == new_role {
                    return Err(EngineError::precondition(
                        old_role.as_str(),
                        format!("{} already has role {}", worker.name, new_role),
                    ));
                }
                worker.role = new_role;
                match new_role {
                    Role::Contributor => worker.eligible = true,
                    Role::Tester => worker.eligible = false,
                    Role::Admin | Role::Reviewer => {}
                }
                if !new_role.can_hold_assignments() {
                    worker.available = false;
                }

                let mut submissions = Vec::new();
                if !new_role.can_hold_submission() {
                    for submission in self.repo.list_submissions(&SubmissionStatus::OPEN).await? {
                        if submission.claimed_by == Some(id) {
                            submissions.push(transition(&submission, &SubmissionCommand::Release)?);
                        }
                    }
                }

                let open: Vec<ProjectStatus> = ProjectStatus::ALL
                    .into_iter()
                    .filter(|status| status.is_open())
                    .collect();
                let mut projects = Vec::new();
                for mut task in self.repo.list_project_tasks(&open).await? {
                    let mut touched = false;
                    for slot in [Slot::Tester, Slot::Reviewer] {
                        if slot.role() != new_role && task.binding(slot) == Some(id) {
                            task.unbind(slot);
                            touched = true;
                        }
                    }
                    if touched {
                        projects.push(task);
                    }
                }

                let counts = (submissions.len(), projects.len());
                let saved = self
                    .repo
                    .save_worker_releasing(&worker, submissions, projects)
                    .await?;
                Ok((old_role, saved, counts.0, counts.1))
            })
            .await?;

        info!(
            "Switched {} from {} to {} ({} submissions released, {} project tasks unbound)",
            worker.name, old_role, new_role, released, unbound
        );
        self.record(
            ActivityEvent::new(
                ActivityAction::SwitchRole,
                actor,
                format!(
                    "{}'s role switched from {} to {}",
                    worker.name, old_role, new_role
                ),
            )
            .with_target(Target::User(id))
            .with_metadata(json!({
                "oldRole": old_role,
                "newRole": new_role,
                "releasedSubmissions": released,
                "unboundProjectTasks": unbound,
            })),
        )
        .await;
        Ok(worker)
    }

    /// Remove an account.
    ///
    /// Simple submissions bound to the worker go back to the queue, their
    /// project bindings are cleared, and tasks they contributed are deleted,
    /// all in the same write as the delete. Admin accounts cannot be deleted.
    pub async fn delete_worker(&self, id: UserId, actor: Actor) -> Result<()> {
        require_admin(&actor, "delete accounts")?;

        let (worker, released, unbound, removed) = self
            .retrying("delete worker", || async move {
                let worker = self.require_worker(id).await?;
                if worker.role == Role::Admin {
                    return Err(EngineError::precondition(
                        worker.role.as_str(),
                        "admin accounts cannot be deleted",
                    ));
                }

                let mut submissions = Vec::new();
                for submission in self.repo.list_submissions(&SubmissionStatus::ALL).await? {
                    if submission.claimed_by == Some(id) {
                        submissions.push(transition(&submission, &SubmissionCommand::Release)?);
                    }
                }

                let mut projects = Vec::new();
                for mut task in self.repo.list_project_tasks(&ProjectStatus::ALL).await? {
                    let mut touched = false;
                    for slot in [Slot::Tester, Slot::Reviewer] {
                        if task.binding(slot) == Some(id) {
                            task.unbind(slot);
                            touched = true;
                        }
                    }
                    if touched {
                        projects.push(task);
                    }
                }

                let counts = (submissions.len(), projects.len());
                let removed = self
                    .repo
                    .delete_worker(&worker, submissions, projects)
                    .await?;
                Ok((worker, counts.0, counts.1, removed))
            })
            .await?;

        info!(
            "Deleted {} {} ({} submissions released, {} project tasks unbound, {} own tasks removed)",
            worker.role,
            worker.name,
            released,
            unbound,
            removed.submissions + removed.project_tasks
        );
        self.record(
            ActivityEvent::new(
                ActivityAction::DeleteUser,
                actor,
                format!("{} account {} deleted", worker.role, worker.name),
            )
            .with_target(Target::User(id))
            .with_metadata(json!({
                "releasedSubmissions": released,
                "unboundProjectTasks": unbound,
                "submissionsDeleted": removed.submissions,
                "projectTasksDeleted": removed.project_tasks,
            })),
        )
        .await;
        Ok(())
    }

    /// Open work bound to `id`.
    pub async fn workload(&self, id: UserId) -> Result<Workload> {
        let worker = self.require_worker(id).await?;

        let mut submissions: Vec<_> = self
            .repo
            .list_submissions(&SubmissionStatus::OPEN)
            .await?
            .into_iter()
            .filter(|s| s.claimed_by == Some(id))
            .collect();
        // Stable sort keeps oldest-first among equal timestamps.
        submissions.sort_by(|a, b| b.assigned_at.cmp(&a.assigned_at));

        let tasks = self.repo.list_project_tasks(&ProjectStatus::ALL).await?;
        let mine = |slot: Slot| -> Vec<ProjectTask> {
            tasks
                .iter()
                .filter(|t| t.binding(slot) == Some(id) && slot.load_statuses().contains(&t.status))
                .cloned()
                .collect()
        };

        Ok(Workload {
            testing: mine(Slot::Tester),
            reviewing: mine(Slot::Reviewer),
            worker,
            submissions,
        })
    }

    /// Most recent activity, newest first.
    pub async fn recent_activity(&self, limit: usize) -> Result<Vec<ActivityEvent>> {
        Ok(self.activity.recent(limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use crowdreview_core::{NewProjectTask, NewSubmission};

    use super::*;

    fn admin() -> Actor {
        Actor::user(UserId::new(), Role::Admin)
    }

    async fn ready(engine: &Engine, name: &str, role: Role) -> Worker {
        let worker = engine.register_worker(name, role).await.unwrap();
        engine.approve_worker(worker.id, admin()).await.unwrap();
        engine.set_availability(worker.id, true).await.unwrap().worker
    }

    #[tokio::test]
    async fn test_register_sets_eligibility_by_role() {
        let engine = Engine::in_memory();
        let tester = engine.register_worker(" Tess ", Role::Tester).await.unwrap();
        let contributor = engine
            .register_worker("Cody", Role::Contributor)
            .await
            .unwrap();
        assert_eq!(tester.name, "Tess");
        assert!(!tester.eligible);
        assert!(contributor.eligible);

        let log = engine.recent_activity(1).await.unwrap();
        assert_eq!(log[0].action, ActivityAction::RegisterUser);
    }

    #[tokio::test]
    async fn test_register_rejects_blank_name() {
        let engine = Engine::in_memory();
        assert!(engine.register_worker("  ", Role::Reviewer).await.is_err());
    }

    #[tokio::test]
    async fn test_approve_only_testers_and_reviewers() {
        let engine = Engine::in_memory();
        let contributor = engine
            .register_worker("Cody", Role::Contributor)
            .await
            .unwrap();
        let err = engine
            .approve_worker(contributor.id, admin())
            .await
            .unwrap_err();
        assert_eq!(err.current_status(), Some("CONTRIBUTOR"));

        let reviewer = engine.register_worker("Rae", Role::Reviewer).await.unwrap();
        let approved = engine.approve_worker(reviewer.id, admin()).await.unwrap();
        assert!(approved.eligible);
        assert_eq!(approved.version, reviewer.version + 1);
    }

    #[tokio::test]
    async fn test_admin_has_no_green_light() {
        let engine = Engine::in_memory();
        let boss = engine.register_worker("Boss", Role::Admin).await.unwrap();
        let err = engine.toggle_availability(boss.id).await.unwrap_err();
        assert_eq!(err.current_status(), Some("ADMIN"));
    }

    #[tokio::test]
    async fn test_going_available_rebalances_submissions() {
        let engine = Engine::in_memory();
        let first = ready(&engine, "Rae", Role::Reviewer).await;
        for _ in 0..4 {
            engine
                .create_submission(UserId::new(), NewSubmission::default())
                .await
                .unwrap();
        }
        assert_eq!(engine.workload(first.id).await.unwrap().submissions.len(), 4);

        let second = engine.register_worker("Rob", Role::Reviewer).await.unwrap();
        engine.approve_worker(second.id, admin()).await.unwrap();
        let change = engine.toggle_availability(second.id).await.unwrap();
        assert!(change.worker.available);
        assert_eq!(change.tasks_redistributed, 4);

        assert_eq!(engine.workload(first.id).await.unwrap().submissions.len(), 2);
        assert_eq!(engine.workload(second.id).await.unwrap().submissions.len(), 2);

        let log = engine.recent_activity(1).await.unwrap();
        assert_eq!(log[0].action, ActivityAction::ToggleGreenLight);
        assert_eq!(log[0].metadata["tasksRedistributed"], 4);
    }

    #[tokio::test]
    async fn test_going_unavailable_keeps_bound_work() {
        let engine = Engine::in_memory();
        let rae = ready(&engine, "Rae", Role::Reviewer).await;
        engine
            .create_submission(UserId::new(), NewSubmission::default())
            .await
            .unwrap();

        let change = engine.set_availability(rae.id, false).await.unwrap();
        assert_eq!(change.tasks_redistributed, 0);
        assert_eq!(engine.workload(rae.id).await.unwrap().submissions.len(), 1);
    }

    #[tokio::test]
    async fn test_tester_coming_online_picks_up_queued_projects() {
        let engine = Engine::in_memory();
        let task = engine
            .create_project_task(UserId::new(), NewProjectTask::default())
            .await
            .unwrap();
        assert_eq!(task.status, ProjectStatus::TaskSubmitted);

        let tess = ready(&engine, "Tess", Role::Tester).await;
        let workload = engine.workload(tess.id).await.unwrap();
        assert_eq!(workload.testing.len(), 1);
        assert_eq!(workload.testing[0].status, ProjectStatus::InTesting);
        assert_eq!(workload.total(), 1);
    }

    #[tokio::test]
    async fn test_delete_worker_releases_work() {
        let engine = Engine::in_memory();
        let rae = ready(&engine, "Rae", Role::Reviewer).await;
        let tess = ready(&engine, "Tess", Role::Tester).await;
        let submission = engine
            .create_submission(UserId::new(), NewSubmission::default())
            .await
            .unwrap();
        let task = engine
            .create_project_task(UserId::new(), NewProjectTask::default())
            .await
            .unwrap();
        assert_eq!(task.tester_id, Some(tess.id));

        engine.delete_worker(rae.id, admin()).await.unwrap();
        engine.delete_worker(tess.id, admin()).await.unwrap();

        let after = engine
            .repository()
            .get_submission(submission.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.status, SubmissionStatus::Pending);
        assert!(after.claimed_by.is_none());

        let task = engine
            .repository()
            .get_project_task(task.id)
            .await
            .unwrap()
            .unwrap();
        assert!(task.tester_id.is_none());
        assert!(matches!(
            engine.workload(rae.id).await.unwrap_err(),
            EngineError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_admins_cannot_be_deleted_or_delete_as_non_admin() {
        let engine = Engine::in_memory();
        let boss = engine.register_worker("Boss", Role::Admin).await.unwrap();
        let rae = engine.register_worker("Rae", Role::Reviewer).await.unwrap();

        let err = engine.delete_worker(boss.id, admin()).await.unwrap_err();
        assert_eq!(err.current_status(), Some("ADMIN"));

        let err = engine
            .delete_worker(rae.id, Actor::user(UserId::new(), Role::Reviewer))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PreconditionFailed { .. }));
        assert!(engine.repository().get_worker(rae.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_workload_orders_by_most_recent_assignment() {
        let engine = Engine::in_memory();
        let rae = engine.register_worker("Rae", Role::Reviewer).await.unwrap();
        let now = Utc::now();
        let mut ids = Vec::new();
        for minutes in [30, 10, 20] {
            let mut s = Submission::new(UserId::new(), NewSubmission::default());
            s.status = SubmissionStatus::Claimed;
            s.claimed_by = Some(rae.id);
            s.assigned_at = Some(now - Duration::minutes(minutes));
            ids.push(engine.repository().insert_submission(s).await.unwrap().id);
        }

        let order: Vec<_> = engine
            .workload(rae.id)
            .await
            .unwrap()
            .submissions
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(order, vec![ids[1], ids[2], ids[0]]);
    }

    #[tokio::test]
    async fn test_green_light_is_saved_when_rebalance_fails() {
        let store = Arc::new(crate::repository::testing::TaskWritesFail::new());
        let engine = Engine::with_store(
            store.clone(),
            Arc::new(crate::notifier::NoopNotifier),
            crate::config::EngineConfig::default(),
        );
        let rae = ready(&engine, "Rae", Role::Reviewer).await;
        for _ in 0..2 {
            engine
                .create_submission(UserId::new(), NewSubmission::default())
                .await
                .unwrap();
        }
        let sam = engine.register_worker("Sam", Role::Reviewer).await.unwrap();
        engine.approve_worker(sam.id, admin()).await.unwrap();
        store.fail_task_saves();

        let change = engine.set_availability(sam.id, true).await.unwrap();
        assert!(change.worker.available);
        assert_eq!(change.tasks_redistributed, 0);
        assert_eq!(engine.workload(rae.id).await.unwrap().submissions.len(), 2);

        let log = engine.recent_activity(1).await.unwrap();
        assert_eq!(log[0].action, ActivityAction::ToggleGreenLight);
    }

    #[tokio::test]
    async fn test_delete_contributor_removes_their_tasks() {
        let engine = Engine::in_memory();
        let rae = ready(&engine, "Rae", Role::Reviewer).await;
        let cody = engine.register_worker("Cody", Role::Contributor).await.unwrap();
        let submission = engine
            .create_submission(cody.id, NewSubmission::default())
            .await
            .unwrap();
        engine
            .submit_feedback(submission.id, rae.id, "looks fine", false, None)
            .await
            .unwrap();
        let task = engine
            .create_project_task(cody.id, NewProjectTask::default())
            .await
            .unwrap();

        engine.delete_worker(cody.id, admin()).await.unwrap();

        let repo = engine.repository();
        assert!(repo.get_submission(submission.id).await.unwrap().is_none());
        assert!(repo.list_reviews(submission.id).await.unwrap().is_empty());
        assert!(repo.get_project_task(task.id).await.unwrap().is_none());
        assert!(engine.workload(rae.id).await.unwrap().submissions.is_empty());

        let log = engine.recent_activity(1).await.unwrap();
        assert_eq!(log[0].action, ActivityAction::DeleteUser);
        assert_eq!(log[0].metadata["submissionsDeleted"], 1);
        assert_eq!(log[0].metadata["projectTasksDeleted"], 1);
    }

    #[tokio::test]
    async fn test_switch_to_contributor_releases_reviews_and_approves() {
        let engine = Engine::in_memory();
        let rae = ready(&engine, "Rae", Role::Reviewer).await;
        let submission = engine
            .create_submission(UserId::new(), NewSubmission::default())
            .await
            .unwrap();
        assert_eq!(submission.claimed_by, Some(rae.id));

        let switched = engine
            .switch_role(rae.id, Role::Contributor, admin())
            .await
            .unwrap();
        assert_eq!(switched.role, Role::Contributor);
        assert!(switched.eligible);
        assert!(!switched.available);

        let after = engine
            .repository()
            .get_submission(submission.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.status, SubmissionStatus::Pending);
        assert!(after.claimed_by.is_none());

        let log = engine.recent_activity(1).await.unwrap();
        assert_eq!(log[0].action, ActivityAction::SwitchRole);
        assert_eq!(log[0].metadata["oldRole"], "REVIEWER");
        assert_eq!(log[0].metadata["newRole"], "CONTRIBUTOR");
        assert_eq!(log[0].metadata["releasedSubmissions"], 1);
    }

    #[tokio::test]
    async fn test_switch_to_tester_needs_fresh_approval() {
        let engine = Engine::in_memory();
        let rae = ready(&engine, "Rae", Role::Reviewer).await;
        let tess = ready(&engine, "Tess", Role::Tester).await;
        let task = engine
            .create_project_task(UserId::new(), NewProjectTask::default())
            .await
            .unwrap();
        assert_eq!(task.tester_id, Some(tess.id));

        let demoted = engine.switch_role(rae.id, Role::Tester, admin()).await.unwrap();
        assert!(!demoted.eligible);

        // The tester keeps their approval as a reviewer and loses the
        // tester slot they no longer fit.
        let promoted = engine.switch_role(tess.id, Role::Reviewer, admin()).await.unwrap();
        assert!(promoted.eligible);
        let task = engine
            .repository()
            .get_project_task(task.id)
            .await
            .unwrap()
            .unwrap();
        assert!(task.tester_id.is_none());
    }

    #[tokio::test]
    async fn test_switch_role_is_admin_only_and_refuses_same_role() {
        let engine = Engine::in_memory();
        let rae = engine.register_worker("Rae", Role::Reviewer).await.unwrap();

        let err = engine
            .switch_role(rae.id, Role::Admin, Actor::user(rae.id, Role::Reviewer))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PreconditionFailed { .. }));

        let err = engine
            .switch_role(rae.id, Role::Reviewer, admin())
            .await
            .unwrap_err();
        assert_eq!(err.current_status(), Some("REVIEWER"));
        assert_eq!(
            engine.repository().get_worker(rae.id).await.unwrap().unwrap().role,
            Role::Reviewer
        );
    }
}
