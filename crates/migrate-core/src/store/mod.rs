//! Embedded checkpoint and history store, grounded in
//! `var-che-spacepanda`'s `core_space/storage` module: a `Store` wrapping an
//! `r2d2`-pooled `rusqlite` connection, schema evolution run once at open,
//! and typed repositories handed out per aggregate.

mod checkpoint;
mod history;
mod migrations;
mod models;

pub use checkpoint::CheckpointRepository;
pub use history::HistoryRepository;
pub use models::{
    Checkpoint, CheckpointStatus, CheckpointUpdate, CopyMethod, HistoryStatus, HistoryUpdate,
    MigrationHistory, NewCheckpoint, NewMigrationHistory,
};

use crate::error::{MigrateError, MigrateResult};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

/// Handle to the on-disk (or in-memory) SQLite store backing job history and
/// checkpoint state. Cheap to clone — the pool itself is reference-counted.
#[derive(Clone)]
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
}

impl Store {
    /// Open (creating if absent) the store file at `path`, running any
    /// pending schema migrations before returning.
    pub fn open(path: impl AsRef<Path>) -> MigrateResult<Store> {
        let manager = SqliteConnectionManager::file(path.as_ref());
        let pool = Pool::new(manager).map_err(MigrateError::from)?;
        migrations::migrate(&pool).map_err(MigrateError::from)?;
        Ok(Store { pool })
    }

    /// In-memory store for tests: each call gets its own isolated database.
    #[cfg(test)]
    pub fn memory() -> MigrateResult<Store> {
        let pool = Pool::new(SqliteConnectionManager::memory()).map_err(MigrateError::from)?;
        migrations::migrate(&pool).map_err(MigrateError::from)?;
        Ok(Store { pool })
    }

    pub fn history(&self) -> HistoryRepository {
        HistoryRepository::new(self.pool.clone())
    }

    pub fn checkpoints(&self) -> CheckpointRepository {
        CheckpointRepository::new(self.pool.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_opens_and_runs_migrations() {
        let store = Store::memory().unwrap();
        let all = store.history().get_all_desc().await.unwrap();
        assert!(all.is_empty());
    }

    #[test]
    fn open_creates_a_file_backed_store() {
        let dir = std::env::temp_dir().join(format!("migrate-store-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("store.sqlite3");
        let store = Store::open(&path).unwrap();
        drop(store);
        assert!(path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
