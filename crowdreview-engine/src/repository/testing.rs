//! In-memory store whose task writes can be switched off, for exercising
//! the paths that must survive a failed follow-up write.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use crowdreview_core::{
    ActivityEvent, ProjectStatus, ProjectTask, Review, Slot, Submission, SubmissionStatus, TaskId,
    UserId, Worker,
};

use super::{ActivityLog, InMemoryRepository, RemovedWork, Repository, RepositoryError};

#[derive(Default)]
pub(crate) struct TaskWritesFail {
    inner: InMemoryRepository,
    failing: AtomicBool,
}

impl TaskWritesFail {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// From now on, batch saves of submissions and project tasks fail with
    /// a storage error. Inserts and worker writes still go through.
    pub(crate) fn fail_task_saves(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn check(&self, operation: &'static str) -> Result<(), RepositoryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepositoryError::storage(operation, "disk I/O error"));
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for TaskWritesFail {
    async fn insert_worker(&self, worker: Worker) -> Result<Worker, RepositoryError> {
        self.inner.insert_worker(worker).await
    }

    async fn get_worker(&self, id: UserId) -> Result<Option<Worker>, RepositoryError> {
        self.inner.get_worker(id).await
    }

    async fn list_workers(&self) -> Result<Vec<Worker>, RepositoryError> {
        self.inner.list_workers().await
    }

    async fn save_worker(&self, worker: &Worker) -> Result<Worker, RepositoryError> {
        self.inner.save_worker(worker).await
    }

    async fn save_worker_releasing(
        &self,
        worker: &Worker,
        submissions: Vec<Submission>,
        projects: Vec<ProjectTask>,
    ) -> Result<Worker, RepositoryError> {
        self.inner
            .save_worker_releasing(worker, submissions, projects)
            .await
    }

    async fn delete_worker(
        &self,
        worker: &Worker,
        submissions: Vec<Submission>,
        projects: Vec<ProjectTask>,
    ) -> Result<RemovedWork, RepositoryError> {
        self.inner.delete_worker(worker, submissions, projects).await
    }

    async fn insert_submission(
        &self,
        submission: Submission,
    ) -> Result<Submission, RepositoryError> {
        self.inner.insert_submission(submission).await
    }

    async fn get_submission(&self, id: TaskId) -> Result<Option<Submission>, RepositoryError> {
        self.inner.get_submission(id).await
    }

    async fn list_submissions(
        &self,
        statuses: &[SubmissionStatus],
    ) -> Result<Vec<Submission>, RepositoryError> {
        self.inner.list_submissions(statuses).await
    }

    async fn count_submission_load(
        &self,
        worker: UserId,
        statuses: &[SubmissionStatus],
    ) -> Result<usize, RepositoryError> {
        self.inner.count_submission_load(worker, statuses).await
    }

    async fn save_submissions(
        &self,
        submissions: Vec<Submission>,
    ) -> Result<Vec<Submission>, RepositoryError> {
        self.check("save_submissions")?;
        self.inner.save_submissions(submissions).await
    }

    async fn commit_feedback(
        &self,
        review: Review,
        submission: Submission,
    ) -> Result<Submission, RepositoryError> {
        self.inner.commit_feedback(review, submission).await
    }

    async fn list_reviews(&self, submission: TaskId) -> Result<Vec<Review>, RepositoryError> {
        self.inner.list_reviews(submission).await
    }

    async fn delete_submission(&self, id: TaskId) -> Result<bool, RepositoryError> {
        self.inner.delete_submission(id).await
    }

    async fn insert_project_task(
        &self,
        task: ProjectTask,
    ) -> Result<ProjectTask, RepositoryError> {
        self.inner.insert_project_task(task).await
    }

    async fn get_project_task(&self, id: TaskId) -> Result<Option<ProjectTask>, RepositoryError> {
        self.inner.get_project_task(id).await
    }

    async fn list_project_tasks(
        &self,
        statuses: &[ProjectStatus],
    ) -> Result<Vec<ProjectTask>, RepositoryError> {
        self.inner.list_project_tasks(statuses).await
    }

    async fn count_project_load(
        &self,
        worker: UserId,
        slot: Slot,
    ) -> Result<usize, RepositoryError> {
        self.inner.count_project_load(worker, slot).await
    }

    async fn save_project_tasks(
        &self,
        tasks: Vec<ProjectTask>,
    ) -> Result<Vec<ProjectTask>, RepositoryError> {
        self.check("save_project_tasks")?;
        self.inner.save_project_tasks(tasks).await
    }

    async fn delete_project_task(&self, id: TaskId) -> Result<bool, RepositoryError> {
        self.inner.delete_project_task(id).await
    }
}

#[async_trait]
impl ActivityLog for TaskWritesFail {
    async fn record(&self, event: ActivityEvent) -> Result<(), RepositoryError> {
        self.inner.record(event).await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ActivityEvent>, RepositoryError> {
        self.inner.recent(limit).await
    }
}
