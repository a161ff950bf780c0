//! Durable store for workers, tasks, reviews and the activity feed.
//!
//! # Layout
//!
//! Each record is stored as JSON next to the columns the engine filters on
//! (status, bindings, contributor, `seq`, `version`). The columns are
//! authoritative for ordering, version checks and binding guards; the JSON
//! carries everything else.
//!
//! # Migrations
//!
//! `schema_version` holds a single row. Opening a database applies every
//! step in `run_migrations()` between the stored number and
//! `CURRENT_SCHEMA_VERSION`, in order. A database stamped with a newer
//! number than this build knows is refused.
//!
//! # Old rows
//!
//! Fields added to `Worker`, `Submission` or `ProjectTask` carry
//! `#[serde(default)]`, so JSON written before the field existed still loads.

mod activity;
mod projects;
mod submissions;
mod workers;


use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use crowdreview_core::{
    ActivityEvent, ProjectStatus, ProjectTask, Review, Slot, Submission, SubmissionStatus, TaskId,
    UserId, Worker,
};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use super::{ActivityLog, RemovedWork, Repository, RepositoryError};

/// Highest migration step this build applies.
const CURRENT_SCHEMA_VERSION: i64 = 3;

/// Crowdreview store on a single SQLite connection.
///
/// Every call hops onto the blocking pool and takes the connection mutex,
/// so one process never has two writes in flight.
pub struct SqliteRepository {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open the crowdreview database at `path`, creating the file and its
    /// directory on first use, and migrate it to the current schema.
    ///
    /// Connections run with WAL journaling, `synchronous = FULL`, a five
    /// second busy timeout, and foreign keys on so a deleted submission
    /// takes its reviews with it.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";

        if !is_in_memory && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        RepositoryError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| RepositoryError::storage("open database", e.to_string()))?;

        // WAL is required. Test databases opened with ":memory:" report
        // "memory" instead.
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| RepositoryError::storage("set journal_mode", e.to_string()))?;
        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));
        if !journal_mode_ok {
            return Err(RepositoryError::storage(
                "configure journal_mode",
                format!("crowdreview needs WAL journaling, got '{}'", journal_mode),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
            "#,
        )
        .map_err(|e| RepositoryError::storage("configure pragmas", e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| RepositoryError::storage("create schema_version table", e.to_string()))?;

        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RepositoryError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Apply every migration step after `from_version`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), RepositoryError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(RepositoryError::storage(
                "schema version",
                format!(
                    "database is at schema {} but this build only knows up to {}",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS workers (
                    id TEXT PRIMARY KEY,
                    seq INTEGER NOT NULL UNIQUE,
                    role TEXT NOT NULL,
                    eligible INTEGER NOT NULL,
                    available INTEGER NOT NULL,
                    version INTEGER NOT NULL,
                    record_json TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS submissions (
                    id TEXT PRIMARY KEY,
                    seq INTEGER NOT NULL UNIQUE,
                    status TEXT NOT NULL,
                    claimed_by TEXT,
                    version INTEGER NOT NULL,
                    record_json TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_submissions_status
                    ON submissions(status, seq);
                CREATE INDEX IF NOT EXISTS idx_submissions_claimed_by
                    ON submissions(claimed_by) WHERE claimed_by IS NOT NULL;

                CREATE TABLE IF NOT EXISTS reviews (
                    rowid_seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL UNIQUE,
                    submission_id TEXT NOT NULL
                        REFERENCES submissions(id) ON DELETE CASCADE,
                    record_json TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_reviews_submission
                    ON reviews(submission_id);

                CREATE TABLE IF NOT EXISTS project_tasks (
                    id TEXT PRIMARY KEY,
                    seq INTEGER NOT NULL UNIQUE,
                    status TEXT NOT NULL,
                    tester_id TEXT,
                    reviewer_id TEXT,
                    version INTEGER NOT NULL,
                    record_json TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_project_tasks_status
                    ON project_tasks(status, seq);
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v1", e.to_string()))?;
        }

        // Migration from version 1 to version 2: activity feed.
        if from_version < 2 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS activity_log (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    action TEXT NOT NULL,
                    actor_id TEXT NOT NULL,
                    target_id TEXT,
                    event_json TEXT NOT NULL,
                    recorded_at INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_activity_recent
                    ON activity_log(id DESC);
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v2", e.to_string()))?;
        }

        // Contributor columns, so an account's own tasks go with it.
        if from_version < 3 {
            conn.execute_batch(
                r#"
                ALTER TABLE submissions ADD COLUMN contributor_id TEXT;
                UPDATE submissions
                    SET contributor_id = json_extract(record_json, '$.contributor_id');
                CREATE INDEX IF NOT EXISTS idx_submissions_contributor
                    ON submissions(contributor_id);

                ALTER TABLE project_tasks ADD COLUMN contributor_id TEXT;
                UPDATE project_tasks
                    SET contributor_id = json_extract(record_json, '$.contributor_id');
                CREATE INDEX IF NOT EXISTS idx_project_tasks_contributor
                    ON project_tasks(contributor_id);
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v3", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| RepositoryError::storage("update schema version", e.to_string()))?;

        Ok(())
    }

    /// Throwaway store for tests.
    pub fn new_in_memory() -> Result<Self, RepositoryError> {
        Self::new(":memory:")
    }

    /// Run `f` against the connection on the blocking pool.
    pub(super) async fn with_conn<T, F>(
        &self,
        operation: &'static str,
        f: F,
    ) -> Result<T, RepositoryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, RepositoryError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn, operation)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?
    }
}

fn lock<'a>(
    conn: &'a Mutex<Connection>,
    operation: &'static str,
) -> Result<MutexGuard<'a, Connection>, RepositoryError> {
    conn.lock()
        .map_err(|_| RepositoryError::storage(operation, "connection mutex poisoned"))
}

// =============================================================================
// Conversion helpers
// =============================================================================

/// `seq` and `version` are u64 in the records but INTEGER in SQLite.
pub(super) fn u64_to_i64(value: u64, operation: &'static str) -> Result<i64, RepositoryError> {
    i64::try_from(value).map_err(|_| {
        RepositoryError::storage(
            operation,
            format!("value {} exceeds maximum storable value ({})", value, i64::MAX),
        )
    })
}

/// Read a `seq` or `version` column back. Negative values are storage errors.
pub(super) fn i64_to_u64(value: i64, operation: &'static str) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| {
        RepositoryError::storage(
            operation,
            format!("invalid negative counter {} in database", value),
        )
    })
}

/// JSON array of status names, for `status IN (SELECT value FROM json_each(?))`.
pub(super) fn status_list<S: AsRef<str>>(
    statuses: impl IntoIterator<Item = S>,
    operation: &'static str,
) -> Result<String, RepositoryError> {
    let names: Vec<String> = statuses
        .into_iter()
        .map(|s| s.as_ref().to_string())
        .collect();
    serde_json::to_string(&names).map_err(|e| RepositoryError::storage(operation, e.to_string()))
}

/// Next insertion sequence for `table`.
pub(super) fn next_seq(conn: &Connection, table: &'static str) -> Result<i64, RepositoryError> {
    conn.query_row(
        &format!("SELECT COALESCE(MAX(seq), 0) + 1 FROM {}", table),
        [],
        |row| row.get(0),
    )
    .map_err(|e| RepositoryError::storage("next seq", e.to_string()))
}

/// Decode a record, logging and skipping it if the JSON is unreadable.
pub(super) fn decode_or_skip<T: serde::de::DeserializeOwned>(
    json: &str,
    what: &'static str,
    id: &str,
) -> Option<T> {
    match serde_json::from_str(json) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Skipping corrupt {} row {}: {}", what, id, e);
            None
        }
    }
}

// =============================================================================
// Trait implementations
// =============================================================================

#[async_trait]
impl Repository for SqliteRepository {
    async fn insert_worker(&self, worker: Worker) -> Result<Worker, RepositoryError> {
        self.insert_worker_impl(worker).await
    }

    async fn get_worker(&self, id: UserId) -> Result<Option<Worker>, RepositoryError> {
        self.get_worker_impl(id).await
    }

    async fn list_workers(&self) -> Result<Vec<Worker>, RepositoryError> {
        self.list_workers_impl().await
    }

    async fn save_worker(&self, worker: &Worker) -> Result<Worker, RepositoryError> {
        self.save_worker_impl(worker.clone()).await
    }

    async fn save_worker_releasing(
        &self,
        worker: &Worker,
        submissions: Vec<Submission>,
        projects: Vec<ProjectTask>,
    ) -> Result<Worker, RepositoryError> {
        self.save_worker_releasing_impl(worker.clone(), submissions, projects)
            .await
    }

    async fn delete_worker(
        &self,
        worker: &Worker,
        submissions: Vec<Submission>,
        projects: Vec<ProjectTask>,
    ) -> Result<RemovedWork, RepositoryError> {
        self.delete_worker_impl(worker.clone(), submissions, projects)
            .await
    }

    async fn insert_submission(
        &self,
        submission: Submission,
    ) -> Result<Submission, RepositoryError> {
        self.insert_submission_impl(submission).await
    }

    async fn get_submission(&self, id: TaskId) -> Result<Option<Submission>, RepositoryError> {
        self.get_submission_impl(id).await
    }

    async fn list_submissions(
        &self,
        statuses: &[SubmissionStatus],
    ) -> Result<Vec<Submission>, RepositoryError> {
        self.list_submissions_impl(statuses).await
    }

    async fn count_submission_load(
        &self,
        worker: UserId,
        statuses: &[SubmissionStatus],
    ) -> Result<usize, RepositoryError> {
        self.count_submission_load_impl(worker, statuses).await
    }

    async fn save_submissions(
        &self,
        submissions: Vec<Submission>,
    ) -> Result<Vec<Submission>, RepositoryError> {
        self.save_submissions_impl(submissions).await
    }

    async fn commit_feedback(
        &self,
        review: Review,
        submission: Submission,
    ) -> Result<Submission, RepositoryError> {
        self.commit_feedback_impl(review, submission).await
    }

    async fn list_reviews(&self, submission: TaskId) -> Result<Vec<Review>, RepositoryError> {
        self.list_reviews_impl(submission).await
    }

    async fn delete_submission(&self, id: TaskId) -> Result<bool, RepositoryError> {
        self.delete_submission_impl(id).await
    }

    async fn insert_project_task(
        &self,
        task: ProjectTask,
    ) -> Result<ProjectTask, RepositoryError> {
        self.insert_project_task_impl(task).await
    }

    async fn get_project_task(&self, id: TaskId) -> Result<Option<ProjectTask>, RepositoryError> {
        self.get_project_task_impl(id).await
    }

    async fn list_project_tasks(
        &self,
        statuses: &[ProjectStatus],
    ) -> Result<Vec<ProjectTask>, RepositoryError> {
        self.list_project_tasks_impl(statuses).await
    }

    async fn count_project_load(
        &self,
        worker: UserId,
        slot: Slot,
    ) -> Result<usize, RepositoryError> {
        self.count_project_load_impl(worker, slot).await
    }

    async fn save_project_tasks(
        &self,
        tasks: Vec<ProjectTask>,
    ) -> Result<Vec<ProjectTask>, RepositoryError> {
        self.save_project_tasks_impl(tasks).await
    }

    async fn delete_project_task(&self, id: TaskId) -> Result<bool, RepositoryError> {
        self.delete_project_task_impl(id).await
    }
}

#[async_trait]
impl ActivityLog for SqliteRepository {
    async fn record(&self, event: ActivityEvent) -> Result<(), RepositoryError> {
        self.record_impl(event).await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ActivityEvent>, RepositoryError> {
        self.recent_impl(limit).await
    }
}
