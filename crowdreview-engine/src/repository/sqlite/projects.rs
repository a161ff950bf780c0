//! Project task operations for the SQLite repository.

use crowdreview_core::{ProjectStatus, ProjectTask, Slot, TaskId, UserId};
use rusqlite::{params, Connection, OptionalExtension};

use super::super::RepositoryError;
use super::{decode_or_skip, i64_to_u64, next_seq, status_list, u64_to_i64, SqliteRepository};

fn encode(task: &ProjectTask) -> Result<String, RepositoryError> {
    serde_json::to_string(task)
        .map_err(|e| RepositoryError::storage("serialize project task", e.to_string()))
}

fn with_counters(
    mut task: ProjectTask,
    seq: i64,
    version: i64,
) -> Result<ProjectTask, RepositoryError> {
    task.seq = i64_to_u64(seq, "read project task seq")?;
    task.version = i64_to_u64(version, "read project task version")?;
    Ok(task)
}

/// Version-checked update. A changed binding must name a stored worker with
/// that slot's role.
pub(super) fn write_project(
    conn: &Connection,
    task: &ProjectTask,
) -> Result<ProjectTask, RepositoryError> {
    let mut saved = task.clone();
    saved.version += 1;
    let json = encode(&saved)?;
    let changed = conn
        .execute(
            "UPDATE project_tasks
             SET status = ?1, tester_id = ?2, reviewer_id = ?3, version = ?4, record_json = ?5
             WHERE id = ?6 AND version = ?7
               AND (?2 IS NULL OR tester_id IS ?2
                    OR EXISTS (SELECT 1 FROM workers WHERE id = ?2 AND role = ?8))
               AND (?3 IS NULL OR reviewer_id IS ?3
                    OR EXISTS (SELECT 1 FROM workers WHERE id = ?3 AND role = ?9))",
            params![
                saved.status.as_str(),
                saved.tester_id.map(|id| id.0.to_string()),
                saved.reviewer_id.map(|id| id.0.to_string()),
                u64_to_i64(saved.version, "save project task")?,
                json,
                saved.id.0.to_string(),
                u64_to_i64(task.version, "save project task")?,
                Slot::Tester.role().as_str(),
                Slot::Reviewer.role().as_str(),
            ],
        )
        .map_err(|e| RepositoryError::storage("save project task", e.to_string()))?;
    if changed != 1 {
        return Err(RepositoryError::conflict("project task", task.id.0));
    }
    Ok(saved)
}

impl SqliteRepository {
    pub(super) async fn insert_project_task_impl(
        &self,
        mut task: ProjectTask,
    ) -> Result<ProjectTask, RepositoryError> {
        self.with_conn("insert project task", move |conn| {
            let seq = next_seq(conn, "project_tasks")?;
            task.seq = i64_to_u64(seq, "insert project task")?;
            task.version = 0;
            let json = encode(&task)?;

            conn.execute(
                "INSERT INTO project_tasks
                    (id, seq, status, tester_id, reviewer_id, contributor_id, version, record_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                params![
                    task.id.0.to_string(),
                    seq,
                    task.status.as_str(),
                    task.tester_id.map(|id| id.0.to_string()),
                    task.reviewer_id.map(|id| id.0.to_string()),
                    task.contributor_id.0.to_string(),
                    json
                ],
            )
            .map_err(|e| RepositoryError::storage("insert project task", e.to_string()))?;

            Ok(task)
        })
        .await
    }

    pub(super) async fn get_project_task_impl(
        &self,
        id: TaskId,
    ) -> Result<Option<ProjectTask>, RepositoryError> {
        self.with_conn("get project task", move |conn| {
            let row: Option<(String, i64, i64)> = conn
                .query_row(
                    "SELECT record_json, seq, version FROM project_tasks WHERE id = ?1",
                    params![id.0.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(|e| RepositoryError::storage("get project task", e.to_string()))?;

            match row {
                Some((json, seq, version)) => {
                    let task: ProjectTask = serde_json::from_str(&json)
                        .map_err(|_| RepositoryError::corruption("project task JSON"))?;
                    Ok(Some(with_counters(task, seq, version)?))
                }
                None => Ok(None),
            }
        })
        .await
    }

    pub(super) async fn list_project_tasks_impl(
        &self,
        statuses: &[ProjectStatus],
    ) -> Result<Vec<ProjectTask>, RepositoryError> {
        let statuses = status_list(statuses.iter().map(|s| s.as_str()), "list project tasks")?;

        self.with_conn("list project tasks", move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, record_json, seq, version FROM project_tasks
                     WHERE status IN (SELECT value FROM json_each(?1))
                     ORDER BY seq ASC",
                )
                .map_err(|e| RepositoryError::storage("list project tasks", e.to_string()))?;
            let rows = stmt
                .query_map(params![statuses], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })
                .map_err(|e| RepositoryError::storage("list project tasks", e.to_string()))?;

            let mut tasks = Vec::new();
            for row in rows {
                let (id, json, seq, version) = row
                    .map_err(|e| RepositoryError::storage("list project tasks", e.to_string()))?;
                if let Some(task) = decode_or_skip::<ProjectTask>(&json, "project task", &id) {
                    tasks.push(with_counters(task, seq, version)?);
                }
            }
            Ok(tasks)
        })
        .await
    }

    pub(super) async fn count_project_load_impl(
        &self,
        worker: UserId,
        slot: Slot,
    ) -> Result<usize, RepositoryError> {
        let statuses = status_list(
            slot.load_statuses().iter().map(|s| s.as_str()),
            "count project load",
        )?;
        let sql = match slot {
            Slot::Tester => {
                "SELECT COUNT(*) FROM project_tasks
                 WHERE tester_id = ?1 AND status IN (SELECT value FROM json_each(?2))"
            }
            Slot::Reviewer => {
                "SELECT COUNT(*) FROM project_tasks
                 WHERE reviewer_id = ?1 AND status IN (SELECT value FROM json_each(?2))"
            }
        };

        self.with_conn("count project load", move |conn| {
            let count: i64 = conn
                .query_row(sql, params![worker.0.to_string(), statuses], |row| {
                    row.get(0)
                })
                .map_err(|e| RepositoryError::storage("count project load", e.to_string()))?;
            usize::try_from(count)
                .map_err(|_| RepositoryError::storage("count project load", "negative count"))
        })
        .await
    }

    pub(super) async fn save_project_tasks_impl(
        &self,
        tasks: Vec<ProjectTask>,
    ) -> Result<Vec<ProjectTask>, RepositoryError> {
        self.with_conn("save project tasks", move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| RepositoryError::storage("save project tasks", e.to_string()))?;
            let saved = tasks
                .iter()
                .map(|task| write_project(&tx, task))
                .collect::<Result<Vec<_>, _>>()?;
            tx.commit()
                .map_err(|e| RepositoryError::storage("save project tasks", e.to_string()))?;
            Ok(saved)
        })
        .await
    }

    pub(super) async fn delete_project_task_impl(
        &self,
        id: TaskId,
    ) -> Result<bool, RepositoryError> {
        self.with_conn("delete project task", move |conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM project_tasks WHERE id = ?1",
                    params![id.0.to_string()],
                )
                .map_err(|e| RepositoryError::storage("delete project task", e.to_string()))?;
            Ok(deleted > 0)
        })
        .await
    }
}
