//! Worker pool directory.
//!
//! Answers "who can take work right now" and "how busy is each of them".
//! Nothing is cached; every call reads the store.

use std::fmt;
use std::sync::Arc;

use crowdreview_core::{Role, Slot, SubmissionStatus, UserId, Worker};
use tracing::debug;

use crate::allocation::LoadSnapshot;
use crate::repository::{Repository, RepositoryError};

/// A set of workers competing for the same kind of task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pool {
    /// Simple submissions: reviewers and admins.
    Submission,
    /// Project tasks, tester slot.
    ProjectTester,
    /// Project tasks, reviewer slot.
    ProjectReviewer,
}

impl Pool {
    pub fn roles(&self) -> &'static [Role] {
        match self {
            Self::Submission => &[Role::Reviewer, Role::Admin],
            Self::ProjectTester => &[Role::Tester],
            Self::ProjectReviewer => &[Role::Reviewer],
        }
    }

    pub fn for_slot(slot: Slot) -> Self {
        match slot {
            Slot::Tester => Self::ProjectTester,
            Slot::Reviewer => Self::ProjectReviewer,
        }
    }

    /// Pools a worker with this role belongs to.
    pub fn for_role(role: Role) -> Vec<Pool> {
        [Self::Submission, Self::ProjectTester, Self::ProjectReviewer]
            .into_iter()
            .filter(|pool| pool.roles().contains(&role))
            .collect()
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submission => f.write_str("submission"),
            Self::ProjectTester => f.write_str("project tester"),
            Self::ProjectReviewer => f.write_str("project reviewer"),
        }
    }
}

/// Read-only view over workers and their load.
#[derive(Clone)]
pub struct WorkerDirectory {
    repo: Arc<dyn Repository>,
}

impl WorkerDirectory {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Eligible and available workers in `pool`, in registration order.
    pub async fn eligible_available_workers(
        &self,
        pool: Pool,
    ) -> Result<Vec<Worker>, RepositoryError> {
        let roles = pool.roles();
        Ok(self
            .repo
            .list_workers()
            .await?
            .into_iter()
            .filter(|w| roles.contains(&w.role) && w.is_assignable())
            .collect())
    }

    /// Open tasks currently bound to `worker` in `pool`.
    pub async fn current_load(&self, worker: UserId, pool: Pool) -> Result<usize, RepositoryError> {
        match pool {
            Pool::Submission => {
                self.repo
                    .count_submission_load(worker, &SubmissionStatus::OPEN)
                    .await
            }
            Pool::ProjectTester => self.repo.count_project_load(worker, Slot::Tester).await,
            Pool::ProjectReviewer => self.repo.count_project_load(worker, Slot::Reviewer).await,
        }
    }

    /// Candidates and their loads, ready for selection.
    pub async fn load_snapshot(&self, pool: Pool) -> Result<LoadSnapshot, RepositoryError> {
        let workers = self.eligible_available_workers(pool).await?;
        let mut entries = Vec::with_capacity(workers.len());
        for worker in workers {
            let load = self.current_load(worker.id, pool).await?;
            entries.push((worker.id, load));
        }
        debug!("Load snapshot for {} pool: {:?}", pool, entries);
        Ok(LoadSnapshot::new(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use crowdreview_core::{NewSubmission, Submission};

    async fn add_worker(repo: &InMemoryRepository, role: Role, assignable: bool) -> Worker {
        let mut worker = Worker::new("w", role);
        worker.eligible = assignable;
        worker.available = assignable;
        repo.insert_worker(worker).await.unwrap()
    }

    #[test]
    fn test_pool_roles() {
        assert_eq!(Pool::for_role(Role::Reviewer), vec![Pool::Submission, Pool::ProjectReviewer]);
        assert_eq!(Pool::for_role(Role::Admin), vec![Pool::Submission]);
        assert_eq!(Pool::for_role(Role::Tester), vec![Pool::ProjectTester]);
        assert!(Pool::for_role(Role::Contributor).is_empty());
    }

    #[tokio::test]
    async fn test_only_eligible_and_available_workers_are_listed() {
        let repo = Arc::new(InMemoryRepository::new());
        let reviewer = add_worker(&repo, Role::Reviewer, true).await;
        let admin = add_worker(&repo, Role::Admin, true).await;
        add_worker(&repo, Role::Reviewer, false).await;
        add_worker(&repo, Role::Tester, true).await;

        let mut unapproved = Worker::new("u", Role::Reviewer);
        unapproved.available = true;
        repo.insert_worker(unapproved).await.unwrap();

        let directory = WorkerDirectory::new(repo);
        let ids: Vec<_> = directory
            .eligible_available_workers(Pool::Submission)
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.id)
            .collect();
        assert_eq!(ids, vec![reviewer.id, admin.id]);
    }

    #[tokio::test]
    async fn test_snapshot_counts_open_submissions() {
        let repo = Arc::new(InMemoryRepository::new());
        let busy = add_worker(&repo, Role::Reviewer, true).await;
        let idle = add_worker(&repo, Role::Reviewer, true).await;

        for status in [SubmissionStatus::Claimed, SubmissionStatus::Approved] {
            let mut s = Submission::new(UserId::new(), NewSubmission::default());
            s.status = status;
            s.claimed_by = Some(busy.id);
            repo.insert_submission(s).await.unwrap();
        }

        let directory = WorkerDirectory::new(repo);
        let snapshot = directory.load_snapshot(Pool::Submission).await.unwrap();
        assert_eq!(snapshot.load_of(busy.id), Some(1));
        assert_eq!(snapshot.load_of(idle.id), Some(0));
        assert_eq!(snapshot.least_loaded(), Some(idle.id));
    }
}
