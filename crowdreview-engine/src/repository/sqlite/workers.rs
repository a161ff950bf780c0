//! Worker directory operations for the SQLite repository.

use crowdreview_core::{
    ProjectStatus, ProjectTask, Role, Slot, Submission, SubmissionStatus, UserId, Worker,
};
use rusqlite::{params, Connection, OptionalExtension};

use super::super::{RemovedWork, RepositoryError};
use super::projects::write_project;
use super::submissions::write_submission;
use super::{decode_or_skip, i64_to_u64, next_seq, status_list, u64_to_i64, SqliteRepository};

fn encode(worker: &Worker) -> Result<String, RepositoryError> {
    serde_json::to_string(worker)
        .map_err(|e| RepositoryError::storage("serialize worker", e.to_string()))
}

/// Restore the column-held counters onto a decoded record.
fn with_counters(mut worker: Worker, seq: i64, version: i64) -> Result<Worker, RepositoryError> {
    worker.seq = i64_to_u64(seq, "read worker seq")?;
    worker.version = i64_to_u64(version, "read worker version")?;
    Ok(worker)
}

/// Version-checked update inside an open transaction.
fn write_worker(conn: &Connection, worker: &Worker) -> Result<Worker, RepositoryError> {
    let mut saved = worker.clone();
    saved.version += 1;
    let json = encode(&saved)?;
    let changed = conn
        .execute(
            "UPDATE workers
             SET role = ?1, eligible = ?2, available = ?3, version = ?4, record_json = ?5
             WHERE id = ?6 AND version = ?7",
            params![
                saved.role.as_str(),
                saved.eligible,
                saved.available,
                u64_to_i64(saved.version, "save worker")?,
                json,
                saved.id.0.to_string(),
                u64_to_i64(worker.version, "save worker")?,
            ],
        )
        .map_err(|e| RepositoryError::storage("save worker", e.to_string()))?;
    if changed != 1 {
        return Err(RepositoryError::conflict("worker", worker.id.0));
    }
    Ok(saved)
}

fn exists(conn: &Connection, sql: &str, worker: &str, statuses: &str) -> Result<bool, RepositoryError> {
    conn.query_row(sql, params![worker, statuses], |row| row.get(0))
        .map_err(|e| RepositoryError::storage("check bindings", e.to_string()))
}

/// Whether a stored task still binds `worker`. With `role`, only open tasks
/// that role cannot hold count; without, every binding counts.
fn strands(conn: &Connection, worker: UserId, role: Option<Role>) -> Result<bool, RepositoryError> {
    let id = worker.0.to_string();
    let (submission_statuses, project_statuses) = match role {
        Some(_) => (
            status_list(SubmissionStatus::OPEN.iter().map(|s| s.as_str()), "check bindings")?,
            status_list(
                ProjectStatus::ALL
                    .iter()
                    .filter(|s| s.is_open())
                    .map(|s| s.as_str()),
                "check bindings",
            )?,
        ),
        None => (
            status_list(SubmissionStatus::ALL.iter().map(|s| s.as_str()), "check bindings")?,
            status_list(ProjectStatus::ALL.iter().map(|s| s.as_str()), "check bindings")?,
        ),
    };

    if role.map_or(true, |role| !role.can_hold_submission())
        && exists(
            conn,
            "SELECT EXISTS (SELECT 1 FROM submissions
             WHERE claimed_by = ?1 AND status IN (SELECT value FROM json_each(?2)))",
            &id,
            &submission_statuses,
        )?
    {
        return Ok(true);
    }
    for slot in [Slot::Tester, Slot::Reviewer] {
        if role.is_some_and(|role| role == slot.role()) {
            continue;
        }
        let column = match slot {
            Slot::Tester => "tester_id",
            Slot::Reviewer => "reviewer_id",
        };
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM project_tasks
             WHERE {} = ?1 AND status IN (SELECT value FROM json_each(?2)))",
            column
        );
        if exists(conn, &sql, &id, &project_statuses)? {
            return Ok(true);
        }
    }
    Ok(false)
}

impl SqliteRepository {
    pub(super) async fn insert_worker_impl(
        &self,
        mut worker: Worker,
    ) -> Result<Worker, RepositoryError> {
        self.with_conn("insert worker", move |conn| {
            let seq = next_seq(conn, "workers")?;
            worker.seq = i64_to_u64(seq, "insert worker")?;
            worker.version = 0;
            let json = encode(&worker)?;

            conn.execute(
                "INSERT INTO workers (id, seq, role, eligible, available, version, record_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
                params![
                    worker.id.0.to_string(),
                    seq,
                    worker.role.as_str(),
                    worker.eligible,
                    worker.available,
                    json
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    RepositoryError::conflict("worker", worker.id.0)
                }
                other => RepositoryError::storage("insert worker", other.to_string()),
            })?;

            Ok(worker)
        })
        .await
    }

    pub(super) async fn get_worker_impl(
        &self,
        id: UserId,
    ) -> Result<Option<Worker>, RepositoryError> {
        self.with_conn("get worker", move |conn| {
            let row: Option<(String, i64, i64)> = conn
                .query_row(
                    "SELECT record_json, seq, version FROM workers WHERE id = ?1",
                    params![id.0.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(|e| RepositoryError::storage("get worker", e.to_string()))?;

            match row {
                Some((json, seq, version)) => {
                    let worker: Worker = serde_json::from_str(&json)
                        .map_err(|_| RepositoryError::corruption("worker JSON"))?;
                    Ok(Some(with_counters(worker, seq, version)?))
                }
                None => Ok(None),
            }
        })
        .await
    }

    pub(super) async fn list_workers_impl(&self) -> Result<Vec<Worker>, RepositoryError> {
        self.with_conn("list workers", |conn| {
            let mut stmt = conn
                .prepare("SELECT id, record_json, seq, version FROM workers ORDER BY seq ASC")
                .map_err(|e| RepositoryError::storage("list workers", e.to_string()))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })
                .map_err(|e| RepositoryError::storage("list workers", e.to_string()))?;

            let mut workers = Vec::new();
            for row in rows {
                let (id, json, seq, version) =
                    row.map_err(|e| RepositoryError::storage("list workers", e.to_string()))?;
                if let Some(worker) = decode_or_skip::<Worker>(&json, "worker", &id) {
                    workers.push(with_counters(worker, seq, version)?);
                }
            }
            Ok(workers)
        })
        .await
    }

    pub(super) async fn save_worker_impl(&self, worker: Worker) -> Result<Worker, RepositoryError> {
        self.with_conn("save worker", move |conn| write_worker(conn, &worker))
            .await
    }

    pub(super) async fn save_worker_releasing_impl(
        &self,
        worker: Worker,
        submissions: Vec<Submission>,
        projects: Vec<ProjectTask>,
    ) -> Result<Worker, RepositoryError> {
        self.with_conn("switch role", move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| RepositoryError::storage("switch role", e.to_string()))?;

            for submission in &submissions {
                write_submission(&tx, submission)?;
            }
            for task in &projects {
                write_project(&tx, task)?;
            }
            let saved = write_worker(&tx, &worker)?;
            if strands(&tx, worker.id, Some(worker.role))? {
                return Err(RepositoryError::conflict("worker", worker.id.0));
            }

            tx.commit()
                .map_err(|e| RepositoryError::storage("switch role", e.to_string()))?;
            Ok(saved)
        })
        .await
    }

    pub(super) async fn delete_worker_impl(
        &self,
        worker: Worker,
        submissions: Vec<Submission>,
        projects: Vec<ProjectTask>,
    ) -> Result<RemovedWork, RepositoryError> {
        self.with_conn("delete worker", move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| RepositoryError::storage("delete worker", e.to_string()))?;

            for submission in &submissions {
                write_submission(&tx, submission)?;
            }
            for task in &projects {
                write_project(&tx, task)?;
            }
            if strands(&tx, worker.id, None)? {
                return Err(RepositoryError::conflict("worker", worker.id.0));
            }

            let id = worker.id.0.to_string();
            // Reviews go with their submissions via ON DELETE CASCADE.
            let removed = RemovedWork {
                submissions: tx
                    .execute(
                        "DELETE FROM submissions WHERE contributor_id = ?1",
                        params![id],
                    )
                    .map_err(|e| RepositoryError::storage("delete worker", e.to_string()))?,
                project_tasks: tx
                    .execute(
                        "DELETE FROM project_tasks WHERE contributor_id = ?1",
                        params![id],
                    )
                    .map_err(|e| RepositoryError::storage("delete worker", e.to_string()))?,
            };

            let deleted = tx
                .execute(
                    "DELETE FROM workers WHERE id = ?1 AND version = ?2",
                    params![
                        worker.id.0.to_string(),
                        u64_to_i64(worker.version, "delete worker")?
                    ],
                )
                .map_err(|e| RepositoryError::storage("delete worker", e.to_string()))?;
            if deleted != 1 {
                // Dropping the transaction rolls back the released tasks.
                return Err(RepositoryError::conflict("worker", worker.id.0));
            }

            tx.commit()
                .map_err(|e| RepositoryError::storage("delete worker", e.to_string()))?;
            Ok(removed)
        })
        .await
    }
}
