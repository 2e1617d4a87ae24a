//! Versioned, idempotent SQLite schema migrations for the checkpoint and
//! history store: a `Migration { version, description, up_sql }` list
//! applied in order and recorded in a `schema_version` table.
//!
//! `profiles` is created here too (the store file is a complete,
//! self-consistent database a future GUI binding could extend) but nothing
//! in this crate reads or writes it — that repository lives outside the core.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up_sql: &'static str,
}

/// `v1` lays down the historical shape of the three tables this core owns
/// (plus `profiles`, out of scope for reads/writes here). `v2` adds the
/// columns the legacy tool grew over time — modeled as a separate
/// migration rather than folded into `v1` so the "additive migration on an
/// existing store" path is real code, not just a comment.
pub fn get_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "base schema: profiles, migration_history, checkpoints, logs",
            up_sql: r#"
                CREATE TABLE IF NOT EXISTS profiles (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    source_config TEXT NOT NULL,
                    target_config TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS migration_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    profile_id TEXT NOT NULL,
                    start_date TEXT NOT NULL,
                    end_date TEXT NOT NULL,
                    started_at TEXT NOT NULL,
                    completed_at TEXT,
                    status TEXT NOT NULL,
                    total_rows INTEGER NOT NULL DEFAULT 0,
                    processed_rows INTEGER NOT NULL DEFAULT 0
                );

                CREATE INDEX IF NOT EXISTS idx_history_profile ON migration_history(profile_id);
                CREATE INDEX IF NOT EXISTS idx_history_status ON migration_history(status);

                CREATE TABLE IF NOT EXISTS checkpoints (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    history_id INTEGER NOT NULL,
                    partition_name TEXT NOT NULL,
                    status TEXT NOT NULL,
                    rows_processed INTEGER NOT NULL DEFAULT 0,
                    error_message TEXT
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_checkpoints_history_partition
                    ON checkpoints(history_id, partition_name);

                CREATE TABLE IF NOT EXISTS logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    timestamp TEXT NOT NULL,
                    session_id TEXT,
                    level TEXT NOT NULL,
                    logger_name TEXT,
                    message TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);
                CREATE INDEX IF NOT EXISTS idx_logs_session ON logs(session_id);
            "#,
        },
        Migration {
            version: 2,
            description: "add resume-key and connection-status columns",
            up_sql: r#"
                ALTER TABLE checkpoints ADD COLUMN last_path_id TEXT;
                ALTER TABLE checkpoints ADD COLUMN last_issued_date TEXT;
                ALTER TABLE checkpoints ADD COLUMN copy_method TEXT NOT NULL DEFAULT 'INSERT';
                ALTER TABLE checkpoints ADD COLUMN bytes_transferred INTEGER NOT NULL DEFAULT 0;
                ALTER TABLE migration_history ADD COLUMN source_connection_status TEXT;
                ALTER TABLE migration_history ADD COLUMN target_connection_status TEXT;
                ALTER TABLE migration_history ADD COLUMN connection_check_time TEXT;
            "#,
        },
    ]
}

fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY, applied_at TEXT NOT NULL)",
        [],
    )?;
    let version: Option<i32> =
        conn.query_row("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1", [], |row| row.get(0)).ok();
    Ok(version.unwrap_or(0))
}

/// Apply every pending migration in order. Each `up_sql` statement runs
/// individually (not as one `execute_batch`) so that a column addition which
/// fails only because the column already exists — the one error SQLite's
/// `ALTER TABLE ADD COLUMN` can raise idempotently — is swallowed rather
/// than aborting the whole migration; any other failure still propagates.
pub fn migrate(pool: &Pool<SqliteConnectionManager>) -> rusqlite::Result<()> {
    let conn = pool.get().map_err(|e| {
        rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(e.to_string())))
    })?;

    let current_version = get_current_version(&conn)?;
    let pending: Vec<_> = get_migrations().into_iter().filter(|m| m.version > current_version).collect();

    for migration in pending {
        for stmt in migration.up_sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            if let Err(e) = conn.execute_batch(stmt) {
                let message = e.to_string();
                if message.contains("duplicate column name") {
                    continue;
                }
                return Err(e);
            }
        }
        conn.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![migration.version, chrono::Utc::now().to_rfc3339()],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_pool() -> Pool<SqliteConnectionManager> {
        Pool::new(SqliteConnectionManager::memory()).expect("in-memory pool")
    }

    #[test]
    fn migrate_creates_every_table() {
        let pool = memory_pool();
        migrate(&pool).unwrap();
        let conn = pool.get().unwrap();
        let mut names: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        names.retain(|n| n != "schema_version" && n != "sqlite_sequence");
        assert_eq!(names, vec!["checkpoints", "logs", "migration_history", "profiles"]);
    }

    #[test]
    fn migrate_is_idempotent() {
        let pool = memory_pool();
        migrate(&pool).unwrap();
        migrate(&pool).unwrap();
        let conn = pool.get().unwrap();
        let version: i32 = conn.query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, 2);
    }

    #[test]
    fn v2_columns_are_present_after_migration() {
        let pool = memory_pool();
        migrate(&pool).unwrap();
        let conn = pool.get().unwrap();
        let mut stmt = conn.prepare("SELECT copy_method, bytes_transferred FROM checkpoints").unwrap();
        stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))).unwrap();
    }
}
