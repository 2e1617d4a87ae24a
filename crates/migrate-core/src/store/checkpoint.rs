//! Typed CRUD over `checkpoints`, grounded in
//! `original_source/repository.py`'s `CheckpointRepository`. The one thing
//! the Python original left to callers — and that this store enforces
//! directly — is the monotonic-progress invariant: `rows_processed` and the
//! `(last_key, last_date)` resume pair may only move forward across
//! successive updates to the same checkpoint.

use super::models::{Checkpoint, CheckpointStatus, CheckpointUpdate, CopyMethod, NewCheckpoint};
use crate::error::{MigrateError, MigrateResult};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};

#[derive(Clone)]
pub struct CheckpointRepository {
    pool: Pool<SqliteConnectionManager>,
}

const SELECT_CHECKPOINT: &str =
    "SELECT id, history_id, partition_name, status, rows_processed, last_path_id, last_issued_date, \
     bytes_transferred, copy_method, error_message FROM checkpoints";

fn row_to_checkpoint(row: &Row) -> rusqlite::Result<Checkpoint> {
    Ok(Checkpoint {
        id: row.get("id")?,
        history_id: row.get("history_id")?,
        partition_name: row.get("partition_name")?,
        status: CheckpointStatus::parse(&row.get::<_, String>("status")?),
        rows_processed: row.get("rows_processed")?,
        last_key: row.get("last_path_id")?,
        last_date: row.get("last_issued_date")?,
        bytes_transferred: row.get("bytes_transferred")?,
        copy_method: CopyMethod::parse(&row.get::<_, String>("copy_method")?),
        error_message: row.get("error_message")?,
    })
}

fn fetch_by_id(conn: &rusqlite::Connection, id: i64) -> MigrateResult<Option<Checkpoint>> {
    let mut stmt = conn.prepare(&format!("{SELECT_CHECKPOINT} WHERE id = ?1"))?;
    stmt.query_row(params![id], row_to_checkpoint).optional().map_err(MigrateError::from)
}

/// Numeric values compare numerically, everything else falls back to
/// lexicographic string order — matches how the resume predicate in
/// [`crate::copy_engine`] orders keys that may be integers or quoted text.
fn is_regression(previous: &str, next: &str) -> bool {
    match (previous.parse::<i64>(), next.parse::<i64>()) {
        (Ok(p), Ok(n)) => n < p,
        _ => next < previous,
    }
}

impl CheckpointRepository {
    pub(super) fn new(pool: Pool<SqliteConnectionManager>) -> Self {
        Self { pool }
    }

    /// Create a `pending` checkpoint for `(history_id, partition_name)`.
    /// Fails rather than silently returning the existing row if one is
    /// already there — at most one checkpoint per `(history_id,
    /// partition_name)` is an invariant the caller is expected to check
    /// with [`Self::exists`] first.
    pub async fn create(&self, new: NewCheckpoint) -> MigrateResult<Checkpoint> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> MigrateResult<Checkpoint> {
            let conn = pool.get().map_err(MigrateError::from)?;
            conn.execute(
                "INSERT INTO checkpoints (history_id, partition_name, status, rows_processed, copy_method, bytes_transferred) \
                 VALUES (?1, ?2, ?3, 0, ?4, 0)",
                params![new.history_id, new.partition_name, CheckpointStatus::Pending.as_str(), CopyMethod::Insert.as_str()],
            )?;
            let id = conn.last_insert_rowid();
            fetch_by_id(&conn, id)?.ok_or_else(|| MigrateError::Other("checkpoint row vanished after insert".into()))
        })
        .await
        .map_err(|e| MigrateError::Other(format!("checkpoint create task panicked: {e}")))?
    }

    pub async fn get_by_id(&self, id: i64) -> MigrateResult<Option<Checkpoint>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> MigrateResult<Option<Checkpoint>> {
            let conn = pool.get().map_err(MigrateError::from)?;
            fetch_by_id(&conn, id)
        })
        .await
        .map_err(|e| MigrateError::Other(format!("checkpoint read task panicked: {e}")))?
    }

    pub async fn get_by_history_and_partition(
        &self,
        history_id: i64,
        partition_name: &str,
    ) -> MigrateResult<Option<Checkpoint>> {
        let pool = self.pool.clone();
        let partition_name = partition_name.to_string();
        tokio::task::spawn_blocking(move || -> MigrateResult<Option<Checkpoint>> {
            let conn = pool.get().map_err(MigrateError::from)?;
            let mut stmt = conn.prepare(&format!("{SELECT_CHECKPOINT} WHERE history_id = ?1 AND partition_name = ?2"))?;
            stmt.query_row(params![history_id, partition_name], row_to_checkpoint).optional().map_err(MigrateError::from)
        })
        .await
        .map_err(|e| MigrateError::Other(format!("checkpoint lookup task panicked: {e}")))?
    }

    /// All checkpoints for a history, ordered by partition name — the
    /// orchestrator loads these once per job into a `partition_name` map.
    pub async fn get_by_history(&self, history_id: i64) -> MigrateResult<Vec<Checkpoint>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> MigrateResult<Vec<Checkpoint>> {
            let conn = pool.get().map_err(MigrateError::from)?;
            let mut stmt = conn.prepare(&format!("{SELECT_CHECKPOINT} WHERE history_id = ?1 ORDER BY partition_name"))?;
            let rows = stmt.query_map(params![history_id], row_to_checkpoint)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(MigrateError::from)
        })
        .await
        .map_err(|e| MigrateError::Other(format!("checkpoint list task panicked: {e}")))?
    }

    /// Checkpoints for a history that are not yet `completed`.
    pub async fn get_pending_by_history(&self, history_id: i64) -> MigrateResult<Vec<Checkpoint>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> MigrateResult<Vec<Checkpoint>> {
            let conn = pool.get().map_err(MigrateError::from)?;
            let mut stmt = conn.prepare(&format!(
                "{SELECT_CHECKPOINT} WHERE history_id = ?1 AND status != 'completed' ORDER BY partition_name"
            ))?;
            let rows = stmt.query_map(params![history_id], row_to_checkpoint)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(MigrateError::from)
        })
        .await
        .map_err(|e| MigrateError::Other(format!("checkpoint pending-list task panicked: {e}")))?
    }

    pub async fn exists(&self, history_id: i64, partition_name: &str) -> MigrateResult<bool> {
        Ok(self.get_by_history_and_partition(history_id, partition_name).await?.is_some())
    }

    pub async fn count(&self, history_id: i64) -> MigrateResult<i64> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> MigrateResult<i64> {
            let conn = pool.get().map_err(MigrateError::from)?;
            conn.query_row("SELECT COUNT(*) FROM checkpoints WHERE history_id = ?1", params![history_id], |row| row.get(0))
                .map_err(MigrateError::from)
        })
        .await
        .map_err(|e| MigrateError::Other(format!("checkpoint count task panicked: {e}")))?
    }

    pub async fn delete_by_id(&self, id: i64) -> MigrateResult<bool> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> MigrateResult<bool> {
            let conn = pool.get().map_err(MigrateError::from)?;
            let affected = conn.execute("DELETE FROM checkpoints WHERE id = ?1", params![id])?;
            Ok(affected > 0)
        })
        .await
        .map_err(|e| MigrateError::Other(format!("checkpoint delete task panicked: {e}")))?
    }

    /// Apply a partial update, rejecting any attempt to move
    /// `rows_processed` or the `(last_key, last_date)` resume pair
    /// backwards relative to the stored row. `None` fields are left
    /// untouched.
    pub async fn update_by_id(&self, id: i64, update: CheckpointUpdate) -> MigrateResult<bool> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> MigrateResult<bool> {
            let conn = pool.get().map_err(MigrateError::from)?;
            let Some(current) = fetch_by_id(&conn, id)? else {
                return Ok(false);
            };

            if let Some(rows) = update.rows_processed {
                if rows < current.rows_processed {
                    return Err(MigrateError::transfer(format!(
                        "checkpoint {id}: rows_processed would regress from {} to {rows}",
                        current.rows_processed
                    )));
                }
            }
            if let (Some(next_key), Some(prev_key)) = (&update.last_key, &current.last_key) {
                if is_regression(prev_key, next_key) {
                    return Err(MigrateError::transfer(format!(
                        "checkpoint {id}: last_key would regress from {prev_key} to {next_key}"
                    )));
                }
                if prev_key == next_key {
                    if let (Some(next_date), Some(prev_date)) = (&update.last_date, &current.last_date) {
                        if is_regression(prev_date, next_date) {
                            return Err(MigrateError::transfer(format!(
                                "checkpoint {id}: last_date would regress from {prev_date} to {next_date} at unchanged last_key {next_key}"
                            )));
                        }
                    }
                }
            }

            if let Some(status) = update.status {
                conn.execute("UPDATE checkpoints SET status = ?1 WHERE id = ?2", params![status.as_str(), id])?;
            }
            if let Some(rows) = update.rows_processed {
                conn.execute("UPDATE checkpoints SET rows_processed = ?1 WHERE id = ?2", params![rows, id])?;
            }
            if let Some(key) = &update.last_key {
                conn.execute("UPDATE checkpoints SET last_path_id = ?1 WHERE id = ?2", params![key, id])?;
            }
            if let Some(date) = &update.last_date {
                conn.execute("UPDATE checkpoints SET last_issued_date = ?1 WHERE id = ?2", params![date, id])?;
            }
            if let Some(bytes) = update.bytes_transferred {
                conn.execute("UPDATE checkpoints SET bytes_transferred = ?1 WHERE id = ?2", params![bytes, id])?;
            }
            if let Some(method) = update.copy_method {
                conn.execute("UPDATE checkpoints SET copy_method = ?1 WHERE id = ?2", params![method.as_str(), id])?;
            }
            if let Some(message) = &update.error_message {
                conn.execute("UPDATE checkpoints SET error_message = ?1 WHERE id = ?2", params![message, id])?;
            }
            Ok(true)
        })
        .await
        .map_err(|e| MigrateError::Other(format!("checkpoint update task panicked: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    async fn seed_history(store: &Store) -> i64 {
        store
            .history()
            .create(super::super::models::NewMigrationHistory {
                profile_id: "p".to_string(),
                start_date: "2024-01-01".to_string(),
                end_date: "2024-01-31".to_string(),
                source_connection_status: None,
                target_connection_status: None,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = Store::memory().unwrap();
        let history_id = seed_history(&store).await;
        let cp = store
            .checkpoints()
            .create(NewCheckpoint { history_id, partition_name: "point_history_240115".to_string() })
            .await
            .unwrap();
        assert_eq!(cp.status, CheckpointStatus::Pending);
        assert!(store.checkpoints().exists(history_id, "point_history_240115").await.unwrap());
    }

    #[tokio::test]
    async fn update_advances_rows_processed_and_resume_key() {
        let store = Store::memory().unwrap();
        let history_id = seed_history(&store).await;
        let cp = store
            .checkpoints()
            .create(NewCheckpoint { history_id, partition_name: "trend_history_240102".to_string() })
            .await
            .unwrap();

        store
            .checkpoints()
            .update_by_id(
                cp.id,
                CheckpointUpdate {
                    status: Some(CheckpointStatus::Running),
                    rows_processed: Some(100_000),
                    last_key: Some("100000".to_string()),
                    last_date: Some("20240102".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let reloaded = store.checkpoints().get_by_id(cp.id).await.unwrap().unwrap();
        assert_eq!(reloaded.rows_processed, 100_000);
        assert_eq!(reloaded.last_key.as_deref(), Some("100000"));
    }

    #[tokio::test]
    async fn update_rejects_a_regression_in_rows_processed() {
        let store = Store::memory().unwrap();
        let history_id = seed_history(&store).await;
        let cp = store
            .checkpoints()
            .create(NewCheckpoint { history_id, partition_name: "trend_history_240102".to_string() })
            .await
            .unwrap();
        store
            .checkpoints()
            .update_by_id(cp.id, CheckpointUpdate { rows_processed: Some(200_000), ..Default::default() })
            .await
            .unwrap();

        let result = store
            .checkpoints()
            .update_by_id(cp.id, CheckpointUpdate { rows_processed: Some(100_000), ..Default::default() })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn update_rejects_a_date_regression_when_key_is_unchanged() {
        let store = Store::memory().unwrap();
        let history_id = seed_history(&store).await;
        let cp = store
            .checkpoints()
            .create(NewCheckpoint { history_id, partition_name: "trend_history_240102".to_string() })
            .await
            .unwrap();
        store
            .checkpoints()
            .update_by_id(
                cp.id,
                CheckpointUpdate { last_key: Some("100".to_string()), last_date: Some("20240115".to_string()), ..Default::default() },
            )
            .await
            .unwrap();

        let result = store
            .checkpoints()
            .update_by_id(
                cp.id,
                CheckpointUpdate { last_key: Some("100".to_string()), last_date: Some("20240102".to_string()), ..Default::default() },
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn at_most_one_checkpoint_per_history_and_partition() {
        let store = Store::memory().unwrap();
        let history_id = seed_history(&store).await;
        store
            .checkpoints()
            .create(NewCheckpoint { history_id, partition_name: "point_history_240115".to_string() })
            .await
            .unwrap();
        let all = store.checkpoints().get_by_history(history_id).await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
