//! Typed CRUD over `migration_history`, grounded in
//! `original_source/repository.py`'s `HistoryRepository` / `BaseRepository`
//! shape: `create`, `get_by_id`, `get_all_desc`, `get_incomplete_by_profile`,
//! `update_by_id`. Every call runs the blocking `rusqlite` work on
//! `spawn_blocking` since the rest of the crate is async.

use super::models::{HistoryStatus, HistoryUpdate, MigrationHistory, NewMigrationHistory};
use crate::error::{MigrateError, MigrateResult};
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};

#[derive(Clone)]
pub struct HistoryRepository {
    pool: Pool<SqliteConnectionManager>,
}

fn row_to_history(row: &Row) -> rusqlite::Result<MigrationHistory> {
    let started_at: String = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    let connection_check_time: Option<String> = row.get("connection_check_time")?;

    Ok(MigrationHistory {
        id: row.get("id")?,
        profile_id: row.get("profile_id")?,
        start_date: row.get("start_date")?,
        end_date: row.get("end_date")?,
        started_at: parse_timestamp(&started_at),
        completed_at: completed_at.as_deref().map(parse_timestamp),
        status: HistoryStatus::parse(&row.get::<_, String>("status")?),
        total_rows: row.get("total_rows")?,
        processed_rows: row.get("processed_rows")?,
        source_connection_status: row.get("source_connection_status")?,
        target_connection_status: row.get("target_connection_status")?,
        connection_check_time: connection_check_time.as_deref().map(parse_timestamp),
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

impl HistoryRepository {
    pub(super) fn new(pool: Pool<SqliteConnectionManager>) -> Self {
        Self { pool }
    }

    /// Create a new history row with `status = running` and `started_at =
    /// now`; a job's history is created once at job start and reused across
    /// resumes (see [`Self::get_incomplete_by_profile`]).
    pub async fn create(&self, new: NewMigrationHistory) -> MigrateResult<MigrationHistory> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> MigrateResult<MigrationHistory> {
            let conn = pool.get().map_err(MigrateError::from)?;
            let now = Utc::now();
            conn.execute(
                "INSERT INTO migration_history \
                 (profile_id, start_date, end_date, started_at, status, total_rows, processed_rows, \
                  source_connection_status, target_connection_status, connection_check_time) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6, ?7, ?8)",
                params![
                    new.profile_id,
                    new.start_date,
                    new.end_date,
                    now.to_rfc3339(),
                    HistoryStatus::Running.as_str(),
                    new.source_connection_status,
                    new.target_connection_status,
                    (new.source_connection_status.is_some() || new.target_connection_status.is_some())
                        .then(|| now.to_rfc3339()),
                ],
            )?;
            let id = conn.last_insert_rowid();
            fetch_by_id(&conn, id)?.ok_or_else(|| MigrateError::Other("history row vanished after insert".into()))
        })
        .await
        .map_err(|e| MigrateError::Other(format!("history create task panicked: {e}")))?
    }

    pub async fn get_by_id(&self, id: i64) -> MigrateResult<Option<MigrationHistory>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> MigrateResult<Option<MigrationHistory>> {
            let conn = pool.get().map_err(MigrateError::from)?;
            fetch_by_id(&conn, id)
        })
        .await
        .map_err(|e| MigrateError::Other(format!("history read task panicked: {e}")))?
    }

    /// All history rows, most recently started first.
    pub async fn get_all_desc(&self) -> MigrateResult<Vec<MigrationHistory>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> MigrateResult<Vec<MigrationHistory>> {
            let conn = pool.get().map_err(MigrateError::from)?;
            let mut stmt = conn.prepare(&format!("{SELECT_HISTORY} ORDER BY started_at DESC"))?;
            let rows = stmt.query_map([], row_to_history)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(MigrateError::from)
        })
        .await
        .map_err(|e| MigrateError::Other(format!("history list task panicked: {e}")))?
    }

    /// Most recent non-completed job for a profile (`running` or `failed`),
    /// used to resume instead of starting a fresh history.
    pub async fn get_incomplete_by_profile(&self, profile_id: &str) -> MigrateResult<Option<MigrationHistory>> {
        let pool = self.pool.clone();
        let profile_id = profile_id.to_string();
        tokio::task::spawn_blocking(move || -> MigrateResult<Option<MigrationHistory>> {
            let conn = pool.get().map_err(MigrateError::from)?;
            let mut stmt = conn.prepare(&format!(
                "{SELECT_HISTORY} WHERE profile_id = ?1 AND status IN ('running', 'failed') \
                 ORDER BY started_at DESC LIMIT 1"
            ))?;
            stmt.query_row(params![profile_id], row_to_history).optional().map_err(MigrateError::from)
        })
        .await
        .map_err(|e| MigrateError::Other(format!("history lookup task panicked: {e}")))?
    }

    /// Apply a partial update; `completed` stamps `completed_at = now`
    /// alongside whatever `status` is given (always one of the terminal
    /// statuses when `completed` is set).
    pub async fn update_by_id(&self, id: i64, update: HistoryUpdate) -> MigrateResult<bool> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> MigrateResult<bool> {
            let conn = pool.get().map_err(MigrateError::from)?;
            if fetch_by_id(&conn, id)?.is_none() {
                return Ok(false);
            }

            if let Some(status) = update.status {
                conn.execute("UPDATE migration_history SET status = ?1 WHERE id = ?2", params![status.as_str(), id])?;
            }
            if let Some(processed) = update.processed_rows {
                conn.execute(
                    "UPDATE migration_history SET processed_rows = ?1 WHERE id = ?2",
                    params![processed, id],
                )?;
            }
            if let Some(total) = update.total_rows {
                conn.execute("UPDATE migration_history SET total_rows = ?1 WHERE id = ?2", params![total, id])?;
            }
            if update.completed {
                conn.execute(
                    "UPDATE migration_history SET completed_at = ?1 WHERE id = ?2",
                    params![Utc::now().to_rfc3339(), id],
                )?;
            }
            Ok(true)
        })
        .await
        .map_err(|e| MigrateError::Other(format!("history update task panicked: {e}")))?
    }
}

const SELECT_HISTORY: &str = "SELECT id, profile_id, start_date, end_date, started_at, completed_at, status, \
     total_rows, processed_rows, source_connection_status, target_connection_status, connection_check_time \
     FROM migration_history";

fn fetch_by_id(conn: &rusqlite::Connection, id: i64) -> MigrateResult<Option<MigrationHistory>> {
    let mut stmt = conn.prepare(&format!("{SELECT_HISTORY} WHERE id = ?1"))?;
    stmt.query_row(params![id], row_to_history).optional().map_err(MigrateError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn new_history(profile_id: &str) -> NewMigrationHistory {
        NewMigrationHistory {
            profile_id: profile_id.to_string(),
            start_date: "2024-01-01".to_string(),
            end_date: "2024-01-31".to_string(),
            source_connection_status: None,
            target_connection_status: None,
        }
    }

    #[tokio::test]
    async fn create_then_get_by_id_round_trips() {
        let store = Store::memory().unwrap();
        let created = store.history().create(new_history("profile-a")).await.unwrap();
        let fetched = store.history().get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.profile_id, "profile-a");
        assert_eq!(fetched.status, HistoryStatus::Running);
    }

    #[tokio::test]
    async fn get_incomplete_by_profile_ignores_completed_jobs() {
        let store = Store::memory().unwrap();
        let done = store.history().create(new_history("profile-b")).await.unwrap();
        store
            .history()
            .update_by_id(done.id, HistoryUpdate { status: Some(HistoryStatus::Completed), completed: true, ..Default::default() })
            .await
            .unwrap();
        let running = store.history().create(new_history("profile-b")).await.unwrap();

        let incomplete = store.history().get_incomplete_by_profile("profile-b").await.unwrap().unwrap();
        assert_eq!(incomplete.id, running.id);
    }

    #[tokio::test]
    async fn get_all_desc_orders_most_recent_first() {
        let store = Store::memory().unwrap();
        let first = store.history().create(new_history("profile-c")).await.unwrap();
        let second = store.history().create(new_history("profile-c")).await.unwrap();
        let all = store.history().get_all_desc().await.unwrap();
        assert_eq!(all.first().unwrap().id, second.id);
        assert_eq!(all.last().unwrap().id, first.id);
    }

    #[tokio::test]
    async fn update_by_id_returns_false_for_an_unknown_id() {
        let store = Store::memory().unwrap();
        let updated = store.history().update_by_id(9999, HistoryUpdate::default()).await.unwrap();
        assert!(!updated);
    }
}
