//! Activity feed storage for the SQLite repository.
//!
//! Events are append-only rows in `activity_log`. The full event is kept as
//! JSON; action, actor and target are copied into columns for ad-hoc queries.

use crowdreview_core::ActivityEvent;
use rusqlite::params;

use super::super::RepositoryError;
use super::{decode_or_skip, SqliteRepository};

impl SqliteRepository {
    pub(super) async fn record_impl(&self, event: ActivityEvent) -> Result<(), RepositoryError> {
        let event_json = serde_json::to_string(&event)
            .map_err(|e| RepositoryError::storage("record activity serialize", e.to_string()))?;
        let action = event.action.as_str();
        let actor_id = event.actor.id().to_string();
        let target_id = event.target.map(|t| t.id().to_string());
        let recorded_at = event.recorded_at.timestamp_millis();

        self.with_conn("record activity", move |conn| {
            conn.execute(
                "INSERT INTO activity_log (action, actor_id, target_id, event_json, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![action, actor_id, target_id, event_json, recorded_at],
            )
            .map_err(|e| RepositoryError::storage("record activity", e.to_string()))?;
            Ok(())
        })
        .await
    }

    pub(super) async fn recent_impl(
        &self,
        limit: usize,
    ) -> Result<Vec<ActivityEvent>, RepositoryError> {
        let limit = i64::try_from(limit).map_err(|_| {
            RepositoryError::storage(
                "recent activity",
                format!("limit {} exceeds maximum storable value ({})", limit, i64::MAX),
            )
        })?;

        self.with_conn("recent activity", move |conn| {
            let mut stmt = conn
                .prepare("SELECT id, event_json FROM activity_log ORDER BY id DESC LIMIT ?1")
                .map_err(|e| RepositoryError::storage("recent activity", e.to_string()))?;
            let rows = stmt
                .query_map(params![limit], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(|e| RepositoryError::storage("recent activity", e.to_string()))?;

            let mut events = Vec::new();
            for row in rows {
                let (id, json) =
                    row.map_err(|e| RepositoryError::storage("recent activity", e.to_string()))?;
                if let Some(event) =
                    decode_or_skip::<ActivityEvent>(&json, "activity", &id.to_string())
                {
                    events.push(event);
                }
            }
            Ok(events)
        })
        .await
    }
}
