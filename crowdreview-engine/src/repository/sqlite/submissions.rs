//! Submission and review operations for the SQLite repository.

use crowdreview_core::{Review, Role, Submission, SubmissionStatus, TaskId, UserId};
use rusqlite::{params, Connection, OptionalExtension};

use super::super::RepositoryError;
use super::{decode_or_skip, i64_to_u64, next_seq, status_list, u64_to_i64, SqliteRepository};

fn encode(submission: &Submission) -> Result<String, RepositoryError> {
    serde_json::to_string(submission)
        .map_err(|e| RepositoryError::storage("serialize submission", e.to_string()))
}

fn with_counters(
    mut submission: Submission,
    seq: i64,
    version: i64,
) -> Result<Submission, RepositoryError> {
    submission.seq = i64_to_u64(seq, "read submission seq")?;
    submission.version = i64_to_u64(version, "read submission version")?;
    Ok(submission)
}

/// Version-checked update. A changed binding must name a stored reviewer or
/// admin. Callers batching several writes pass an open transaction.
pub(super) fn write_submission(
    conn: &Connection,
    submission: &Submission,
) -> Result<Submission, RepositoryError> {
    let mut saved = submission.clone();
    saved.version += 1;
    let json = encode(&saved)?;
    let changed = conn
        .execute(
            "UPDATE submissions
             SET status = ?1, claimed_by = ?2, version = ?3, record_json = ?4
             WHERE id = ?5 AND version = ?6
               AND (?2 IS NULL OR claimed_by IS ?2
                    OR EXISTS (SELECT 1 FROM workers WHERE id = ?2 AND role IN (?7, ?8)))",
            params![
                saved.status.as_str(),
                saved.claimed_by.map(|id| id.0.to_string()),
                u64_to_i64(saved.version, "save submission")?,
                json,
                saved.id.0.to_string(),
                u64_to_i64(submission.version, "save submission")?,
                Role::Reviewer.as_str(),
                Role::Admin.as_str(),
            ],
        )
        .map_err(|e| RepositoryError::storage("save submission", e.to_string()))?;
    if changed != 1 {
        return Err(RepositoryError::conflict("submission", submission.id.0));
    }
    Ok(saved)
}

impl SqliteRepository {
    pub(super) async fn insert_submission_impl(
        &self,
        mut submission: Submission,
    ) -> Result<Submission, RepositoryError> {
        self.with_conn("insert submission", move |conn| {
            let seq = next_seq(conn, "submissions")?;
            submission.seq = i64_to_u64(seq, "insert submission")?;
            submission.version = 0;
            let json = encode(&submission)?;

            conn.execute(
                "INSERT INTO submissions
                    (id, seq, status, claimed_by, contributor_id, version, record_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
                params![
                    submission.id.0.to_string(),
                    seq,
                    submission.status.as_str(),
                    submission.claimed_by.map(|id| id.0.to_string()),
                    submission.contributor_id.0.to_string(),
                    json
                ],
            )
            .map_err(|e| RepositoryError::storage("insert submission", e.to_string()))?;

            Ok(submission)
        })
        .await
    }

    pub(super) async fn get_submission_impl(
        &self,
        id: TaskId,
    ) -> Result<Option<Submission>, RepositoryError> {
        self.with_conn("get submission", move |conn| {
            let row: Option<(String, i64, i64)> = conn
                .query_row(
                    "SELECT record_json, seq, version FROM submissions WHERE id = ?1",
                    params![id.0.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(|e| RepositoryError::storage("get submission", e.to_string()))?;

            match row {
                Some((json, seq, version)) => {
                    let submission: Submission = serde_json::from_str(&json)
                        .map_err(|_| RepositoryError::corruption("submission JSON"))?;
                    Ok(Some(with_counters(submission, seq, version)?))
                }
                None => Ok(None),
            }
        })
        .await
    }

    pub(super) async fn list_submissions_impl(
        &self,
        statuses: &[SubmissionStatus],
    ) -> Result<Vec<Submission>, RepositoryError> {
        let statuses = status_list(statuses.iter().map(|s| s.as_str()), "list submissions")?;

        self.with_conn("list submissions", move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, record_json, seq, version FROM submissions
                     WHERE status IN (SELECT value FROM json_each(?1))
                     ORDER BY seq ASC",
                )
                .map_err(|e| RepositoryError::storage("list submissions", e.to_string()))?;
            let rows = stmt
                .query_map(params![statuses], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })
                .map_err(|e| RepositoryError::storage("list submissions", e.to_string()))?;

            let mut submissions = Vec::new();
            for row in rows {
                let (id, json, seq, version) =
                    row.map_err(|e| RepositoryError::storage("list submissions", e.to_string()))?;
                if let Some(submission) = decode_or_skip::<Submission>(&json, "submission", &id) {
                    submissions.push(with_counters(submission, seq, version)?);
                }
            }
            Ok(submissions)
        })
        .await
    }

    pub(super) async fn count_submission_load_impl(
        &self,
        worker: UserId,
        statuses: &[SubmissionStatus],
    ) -> Result<usize, RepositoryError> {
        let statuses = status_list(statuses.iter().map(|s| s.as_str()), "count load")?;

        self.with_conn("count load", move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM submissions
                     WHERE claimed_by = ?1 AND status IN (SELECT value FROM json_each(?2))",
                    params![worker.0.to_string(), statuses],
                    |row| row.get(0),
                )
                .map_err(|e| RepositoryError::storage("count load", e.to_string()))?;
            usize::try_from(count)
                .map_err(|_| RepositoryError::storage("count load", "negative count"))
        })
        .await
    }

    pub(super) async fn save_submissions_impl(
        &self,
        submissions: Vec<Submission>,
    ) -> Result<Vec<Submission>, RepositoryError> {
        self.with_conn("save submissions", move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| RepositoryError::storage("save submissions", e.to_string()))?;
            let saved = submissions
                .iter()
                .map(|submission| write_submission(&tx, submission))
                .collect::<Result<Vec<_>, _>>()?;
            tx.commit()
                .map_err(|e| RepositoryError::storage("save submissions", e.to_string()))?;
            Ok(saved)
        })
        .await
    }

    pub(super) async fn commit_feedback_impl(
        &self,
        review: Review,
        submission: Submission,
    ) -> Result<Submission, RepositoryError> {
        let review_json = serde_json::to_string(&review)
            .map_err(|e| RepositoryError::storage("serialize review", e.to_string()))?;

        self.with_conn("commit feedback", move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| RepositoryError::storage("commit feedback", e.to_string()))?;
            let saved = write_submission(&tx, &submission)?;
            tx.execute(
                "INSERT INTO reviews (id, submission_id, record_json) VALUES (?1, ?2, ?3)",
                params![
                    review.id.0.to_string(),
                    review.submission_id.0.to_string(),
                    review_json
                ],
            )
            .map_err(|e| RepositoryError::storage("insert review", e.to_string()))?;
            tx.commit()
                .map_err(|e| RepositoryError::storage("commit feedback", e.to_string()))?;
            Ok(saved)
        })
        .await
    }

    pub(super) async fn list_reviews_impl(
        &self,
        submission: TaskId,
    ) -> Result<Vec<Review>, RepositoryError> {
        self.with_conn("list reviews", move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, record_json FROM reviews
                     WHERE submission_id = ?1 ORDER BY rowid_seq ASC",
                )
                .map_err(|e| RepositoryError::storage("list reviews", e.to_string()))?;
            let rows = stmt
                .query_map(params![submission.0.to_string()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(|e| RepositoryError::storage("list reviews", e.to_string()))?;

            let mut reviews = Vec::new();
            for row in rows {
                let (id, json) =
                    row.map_err(|e| RepositoryError::storage("list reviews", e.to_string()))?;
                if let Some(review) = decode_or_skip::<Review>(&json, "review", &id) {
                    reviews.push(review);
                }
            }
            Ok(reviews)
        })
        .await
    }

    pub(super) async fn delete_submission_impl(&self, id: TaskId) -> Result<bool, RepositoryError> {
        self.with_conn("delete submission", move |conn| {
            // Reviews go with it via ON DELETE CASCADE.
            let deleted = conn
                .execute(
                    "DELETE FROM submissions WHERE id = ?1",
                    params![id.0.to_string()],
                )
                .map_err(|e| RepositoryError::storage("delete submission", e.to_string()))?;
            Ok(deleted > 0)
        })
        .await
    }
}
