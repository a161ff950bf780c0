//! In-memory implementation of `Repository` and `ActivityLog`.
//!
//! All state is held in memory and lost on restart. A single lock covers
//! every table so multi-record writes are atomic.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use crowdreview_core::{
    ActivityEvent, ProjectStatus, ProjectTask, Review, Role, Slot, Submission, SubmissionStatus,
    TaskId, UserId, Worker,
};
use tokio::sync::RwLock;

use super::{ActivityLog, RemovedWork, Repository, RepositoryError};

const SLOTS: [Slot; 2] = [Slot::Tester, Slot::Reviewer];

#[derive(Default)]
struct Tables {
    next_seq: u64,
    workers: HashMap<UserId, Worker>,
    submissions: HashMap<TaskId, Submission>,
    reviews: Vec<Review>,
    projects: HashMap<TaskId, ProjectTask>,
    activity: Vec<ActivityEvent>,
}

impl Tables {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn check_worker(&self, worker: &Worker) -> Result<(), RepositoryError> {
        match self.workers.get(&worker.id) {
            Some(stored) if stored.version == worker.version => Ok(()),
            _ => Err(RepositoryError::conflict("worker", worker.id.0)),
        }
    }

    /// Whether `worker` exists with a role `allowed` accepts.
    fn can_bind(&self, worker: UserId, allowed: impl Fn(Role) -> bool) -> bool {
        self.workers
            .get(&worker)
            .is_some_and(|stored| allowed(stored.role))
    }

    fn check_submission(&self, submission: &Submission) -> Result<(), RepositoryError> {
        let stored = match self.submissions.get(&submission.id) {
            Some(stored) if stored.version == submission.version => stored,
            _ => return Err(RepositoryError::conflict("submission", submission.id.0)),
        };
        if let Some(worker) = submission.claimed_by {
            if stored.claimed_by != Some(worker)
                && !self.can_bind(worker, |role| role.can_hold_submission())
            {
                return Err(RepositoryError::conflict("submission", submission.id.0));
            }
        }
        Ok(())
    }

    fn check_project(&self, task: &ProjectTask) -> Result<(), RepositoryError> {
        let stored = match self.projects.get(&task.id) {
            Some(stored) if stored.version == task.version => stored,
            _ => return Err(RepositoryError::conflict("project task", task.id.0)),
        };
        for slot in SLOTS {
            if let Some(worker) = task.binding(slot) {
                if stored.binding(slot) != Some(worker)
                    && !self.can_bind(worker, |role| role == slot.role())
                {
                    return Err(RepositoryError::conflict("project task", task.id.0));
                }
            }
        }
        Ok(())
    }

    /// Submissions as they would be once `pending` is written.
    fn submissions_after<'a>(
        &'a self,
        pending: &'a [Submission],
    ) -> impl Iterator<Item = &'a Submission> + 'a {
        let replaced: HashSet<TaskId> = pending.iter().map(|s| s.id).collect();
        self.submissions
            .values()
            .filter(move |s| !replaced.contains(&s.id))
            .chain(pending)
    }

    fn projects_after<'a>(
        &'a self,
        pending: &'a [ProjectTask],
    ) -> impl Iterator<Item = &'a ProjectTask> + 'a {
        let replaced: HashSet<TaskId> = pending.iter().map(|t| t.id).collect();
        self.projects
            .values()
            .filter(move |t| !replaced.contains(&t.id))
            .chain(pending)
    }

    /// Whether a task would still bind `worker` once the pending records
    /// are written. With `role`, only open tasks that role cannot hold
    /// count; without, the worker is going away and every binding counts.
    fn strands(
        &self,
        worker: UserId,
        role: Option<Role>,
        submissions: &[Submission],
        projects: &[ProjectTask],
    ) -> bool {
        let submission_stranded = self.submissions_after(submissions).any(|s| {
            s.claimed_by == Some(worker)
                && role.map_or(true, |role| {
                    s.status.is_open() && !role.can_hold_submission()
                })
        });
        let project_stranded = self.projects_after(projects).any(|t| {
            SLOTS.into_iter().any(|slot| {
                t.binding(slot) == Some(worker)
                    && role.map_or(true, |role| t.status.is_open() && role != slot.role())
            })
        });
        submission_stranded || project_stranded
    }

    fn write_submissions(&mut self, submissions: Vec<Submission>) -> Vec<Submission> {
        submissions
            .into_iter()
            .map(|mut submission| {
                submission.version += 1;
                self.submissions.insert(submission.id, submission.clone());
                submission
            })
            .collect()
    }

    fn write_projects(&mut self, tasks: Vec<ProjectTask>) -> Vec<ProjectTask> {
        tasks
            .into_iter()
            .map(|mut task| {
                task.version += 1;
                self.projects.insert(task.id, task.clone());
                task
            })
            .collect()
    }
}

/// In-memory repository.
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_by_seq<T>(mut items: Vec<T>, seq: impl Fn(&T) -> u64) -> Vec<T> {
    items.sort_by_key(|item| seq(item));
    items
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn insert_worker(&self, mut worker: Worker) -> Result<Worker, RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.workers.contains_key(&worker.id) {
            return Err(RepositoryError::conflict("worker", worker.id.0));
        }
        worker.seq = tables.next_seq();
        worker.version = 0;
        tables.workers.insert(worker.id, worker.clone());
        Ok(worker)
    }

    async fn get_worker(&self, id: UserId) -> Result<Option<Worker>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.workers.get(&id).cloned())
    }

    async fn list_workers(&self) -> Result<Vec<Worker>, RepositoryError> {
        let tables = self.tables.read().await;
        let workers: Vec<Worker> = tables.workers.values().cloned().collect();
        Ok(sorted_by_seq(workers, |w| w.seq))
    }

    async fn save_worker(&self, worker: &Worker) -> Result<Worker, RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.check_worker(worker)?;
        let mut saved = worker.clone();
        saved.version += 1;
        tables.workers.insert(saved.id, saved.clone());
        Ok(saved)
    }

    async fn save_worker_releasing(
        &self,
        worker: &Worker,
        submissions: Vec<Submission>,
        projects: Vec<ProjectTask>,
    ) -> Result<Worker, RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.check_worker(worker)?;
        for submission in &submissions {
            tables.check_submission(submission)?;
        }
        for task in &projects {
            tables.check_project(task)?;
        }
        if tables.strands(worker.id, Some(worker.role), &submissions, &projects) {
            return Err(RepositoryError::conflict("worker", worker.id.0));
        }

        tables.write_submissions(submissions);
        tables.write_projects(projects);
        let mut saved = worker.clone();
        saved.version += 1;
        tables.workers.insert(saved.id, saved.clone());
        Ok(saved)
    }

    async fn delete_worker(
        &self,
        worker: &Worker,
        submissions: Vec<Submission>,
        projects: Vec<ProjectTask>,
    ) -> Result<RemovedWork, RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.check_worker(worker)?;
        for submission in &submissions {
            tables.check_submission(submission)?;
        }
        for task in &projects {
            tables.check_project(task)?;
        }
        if tables.strands(worker.id, None, &submissions, &projects) {
            return Err(RepositoryError::conflict("worker", worker.id.0));
        }

        tables.write_submissions(submissions);
        tables.write_projects(projects);

        let contributed: HashSet<TaskId> = tables
            .submissions
            .values()
            .filter(|s| s.contributor_id == worker.id)
            .map(|s| s.id)
            .collect();
        tables.submissions.retain(|id, _| !contributed.contains(id));
        tables
            .reviews
            .retain(|r| !contributed.contains(&r.submission_id));
        let projects_before = tables.projects.len();
        tables.projects.retain(|_, t| t.contributor_id != worker.id);
        let removed = RemovedWork {
            submissions: contributed.len(),
            project_tasks: projects_before - tables.projects.len(),
        };

        tables.workers.remove(&worker.id);
        Ok(removed)
    }

    async fn insert_submission(
        &self,
        mut submission: Submission,
    ) -> Result<Submission, RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.submissions.contains_key(&submission.id) {
            return Err(RepositoryError::conflict("submission", submission.id.0));
        }
        submission.seq = tables.next_seq();
        submission.version = 0;
        tables
            .submissions
            .insert(submission.id, submission.clone());
        Ok(submission)
    }

    async fn get_submission(&self, id: TaskId) -> Result<Option<Submission>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.submissions.get(&id).cloned())
    }

    async fn list_submissions(
        &self,
        statuses: &[SubmissionStatus],
    ) -> Result<Vec<Submission>, RepositoryError> {
        let tables = self.tables.read().await;
        let matching: Vec<Submission> = tables
            .submissions
            .values()
            .filter(|s| statuses.contains(&s.status))
            .cloned()
            .collect();
        Ok(sorted_by_seq(matching, |s| s.seq))
    }

    async fn count_submission_load(
        &self,
        worker: UserId,
        statuses: &[SubmissionStatus],
    ) -> Result<usize, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .submissions
            .values()
            .filter(|s| s.claimed_by == Some(worker) && statuses.contains(&s.status))
            .count())
    }

    async fn save_submissions(
        &self,
        submissions: Vec<Submission>,
    ) -> Result<Vec<Submission>, RepositoryError> {
        let mut tables = self.tables.write().await;
        for submission in &submissions {
            tables.check_submission(submission)?;
        }
        Ok(tables.write_submissions(submissions))
    }

    async fn commit_feedback(
        &self,
        review: Review,
        submission: Submission,
    ) -> Result<Submission, RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.check_submission(&submission)?;
        tables.reviews.push(review);
        let mut saved = tables.write_submissions(vec![submission]);
        saved
            .pop()
            .ok_or_else(|| RepositoryError::storage("commit feedback", "nothing written"))
    }

    async fn list_reviews(&self, submission: TaskId) -> Result<Vec<Review>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .reviews
            .iter()
            .filter(|r| r.submission_id == submission)
            .cloned()
            .collect())
    }

    async fn delete_submission(&self, id: TaskId) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.write().await;
        let existed = tables.submissions.remove(&id).is_some();
        if existed {
            tables.reviews.retain(|r| r.submission_id != id);
        }
        Ok(existed)
    }

    async fn insert_project_task(
        &self,
        mut task: ProjectTask,
    ) -> Result<ProjectTask, RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.projects.contains_key(&task.id) {
            return Err(RepositoryError::conflict("project task", task.id.0));
        }
        task.seq = tables.next_seq();
        task.version = 0;
        tables.projects.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_project_task(&self, id: TaskId) -> Result<Option<ProjectTask>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.projects.get(&id).cloned())
    }

    async fn list_project_tasks(
        &self,
        statuses: &[ProjectStatus],
    ) -> Result<Vec<ProjectTask>, RepositoryError> {
        let tables = self.tables.read().await;
        let matching: Vec<ProjectTask> = tables
            .projects
            .values()
            .filter(|t| statuses.contains(&t.status))
            .cloned()
            .collect();
        Ok(sorted_by_seq(matching, |t| t.seq))
    }

    async fn count_project_load(
        &self,
        worker: UserId,
        slot: Slot,
    ) -> Result<usize, RepositoryError> {
        let tables = self.tables.read().await;
        let statuses = slot.load_statuses();
        Ok(tables
            .projects
            .values()
            .filter(|t| t.binding(slot) == Some(worker) && statuses.contains(&t.status))
            .count())
    }

    async fn save_project_tasks(
        &self,
        tasks: Vec<ProjectTask>,
    ) -> Result<Vec<ProjectTask>, RepositoryError> {
        let mut tables = self.tables.write().await;
        for task in &tasks {
            tables.check_project(task)?;
        }
        Ok(tables.write_projects(tasks))
    }

    async fn delete_project_task(&self, id: TaskId) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.write().await;
        Ok(tables.projects.remove(&id).is_some())
    }
}

#[async_trait]
impl ActivityLog for InMemoryRepository {
    async fn record(&self, event: ActivityEvent) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.activity.push(event);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ActivityEvent>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.activity.iter().rev().take(limit).cloned().collect())
    }
}
