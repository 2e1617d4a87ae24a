//! Connection opening, version detection, session tuning, and COPY
//! permission probing.

use crate::config::ConnectionConfig;
use crate::error::{MigrateError, MigrateResult};
use crate::version::{self, PgFamily, PgVersionInfo};
use std::time::Duration;
use tokio_postgres::{Client, NoTls};
use tracing::{info, warn};

/// Which side of a migration a connection belongs to; purely for logging and
/// error messages, never changes behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Source,
    Target,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Role::Source => "source",
            Role::Target => "target",
        })
    }
}

/// A live connection plus the version info detected on it.
pub struct OptimizedConnection {
    pub client: Client,
    pub version: PgVersionInfo,
}

/// Open a connection, detect its version, and apply the session parameters
/// for that version (or for a forced compat mode). Unsupported parameters
/// are logged and skipped rather than failing the connection, matching the
/// legacy tool this core continues.
pub async fn open(config: &ConnectionConfig, role: Role) -> MigrateResult<OptimizedConnection> {
    let pg_config = config.to_pg_config();

    let (client, connection) = pg_config
        .connect(NoTls)
        .await
        .map_err(|e| MigrateError::Connectivity(format!("{role} connection failed: {e}")))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            warn!("{role} connection task ended with error: {e}");
        }
    });

    let detected = detect_version(&client).await;
    let family = version::CompatMode::from(config.compat_mode).resolve(detected.family);
    let effective = PgVersionInfo { family, ..detected.clone() };

    apply_session_params(&client, family).await;

    info!("{role} connected: {effective}");

    Ok(OptimizedConnection { client, version: effective })
}

/// `SELECT version()` parsed into a [`PgVersionInfo`]. Falls back to an
/// `Unknown` family rather than failing the caller if the query itself
/// errors (mirrors [`crate::version::parse_version_string`]'s totality).
pub async fn detect_version(client: &Client) -> PgVersionInfo {
    match client.query_one("SELECT version()", &[]).await {
        Ok(row) => {
            let raw: String = row.get(0);
            version::parse_version_string(&raw)
        }
        Err(e) => {
            warn!("version detection failed, treating as unknown: {e}");
            version::parse_version_string("")
        }
    }
}

/// Apply this family's bulk-operation session parameters. Each `SET` is
/// attempted independently; a rejected parameter (e.g. `checkpoint_segments`
/// on a server where it no longer exists) is logged and skipped, it never
/// aborts the connection.
pub async fn apply_session_params(client: &Client, family: PgFamily) {
    for param in version::session_params(family) {
        let stmt = format!("SET {} = '{}'", param.key, param.value);
        match client.batch_execute(&stmt).await {
            Ok(_) => info!("session parameter set: {} = {}", param.key, param.value),
            Err(e) => warn!("session parameter rejected (ignored): {} = {}: {e}", param.key, param.value),
        }
    }
}

/// Probe whether the current user can run `COPY ... FROM STDIN` (write) or
/// `COPY ... TO STDOUT` (read) against this server, using the cheapest
/// available signal first: superuser status, then (on 16) role membership,
/// then an actual probe against a temp table.
pub async fn probe_copy_privilege(
    client: &Client,
    for_write: bool,
    version_info: &PgVersionInfo,
) -> MigrateResult<()> {
    let current_user: String = client
        .query_one("SELECT current_user", &[])
        .await
        .map_err(MigrateError::from_db_error)?
        .get(0);

    let templates = version::templates_for(version_info.family);
    let is_superuser: bool = client
        .query_one(templates.check_permission_sql, &[])
        .await
        .map(|row| row.get::<_, bool>(0))
        .unwrap_or(false);

    if is_superuser {
        return Ok(());
    }

    if version_info.supports_pg_server_files_role() {
        let role = if for_write { "pg_write_server_files" } else { "pg_read_server_files" };
        let has_role: bool = client
            .query_one(
                "SELECT pg_has_role(current_user, $1, 'MEMBER') OR rolsuper FROM pg_roles WHERE rolname = current_user",
                &[&role],
            )
            .await
            .map(|row| row.get(0))
            .unwrap_or(false);
        if has_role {
            return Ok(());
        }
    }

    match quick_probe_copy(client, for_write).await {
        Ok(()) => Ok(()),
        Err(probe_err) => {
            let required = if version_info.supports_pg_server_files_role() {
                format!(
                    "{} or SUPERUSER",
                    if for_write { "pg_write_server_files" } else { "pg_read_server_files" }
                )
            } else {
                "SUPERUSER".to_string()
            };
            Err(MigrateError::Permission(format!(
                "no COPY privilege for user {current_user}; required: {required}; probe error: {probe_err}"
            )))
        }
    }
}

/// Directly exercise `COPY ... FROM STDIN` / `COPY ... TO STDOUT` against a
/// scratch temp table, the last-resort signal when role introspection is
/// inconclusive (true on 9.3, and whenever the 16 role check comes back
/// false due to a custom grant setup).
async fn quick_probe_copy(client: &Client, for_write: bool) -> MigrateResult<()> {
    client
        .batch_execute("CREATE TEMP TABLE IF NOT EXISTS migrate_copy_probe (id int)")
        .await
        .map_err(MigrateError::from_db_error)?;

    let result: Result<(), MigrateError> = if for_write {
        use futures_util::SinkExt;
        let sink = client
            .copy_in::<_, bytes::Bytes>("COPY migrate_copy_probe FROM STDIN WITH (FORMAT CSV)")
            .await
            .map_err(MigrateError::from_db_error)?;
        futures_util::pin_mut!(sink);
        sink.send(bytes::Bytes::from_static(b"1\n"))
            .await
            .map_err(MigrateError::from_db_error)?;
        sink.close().await.map_err(MigrateError::from_db_error)?;
        Ok(())
    } else {
        use futures_util::StreamExt;
        let stream = client
            .copy_out("COPY migrate_copy_probe TO STDOUT WITH (FORMAT CSV)")
            .await
            .map_err(MigrateError::from_db_error)?;
        futures_util::pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            chunk.map_err(MigrateError::from_db_error)?;
        }
        Ok(())
    };

    client
        .batch_execute("DROP TABLE IF EXISTS migrate_copy_probe")
        .await
        .map_err(MigrateError::from_db_error)?;

    result
}

/// Estimate a table's row count and on-disk size using the version-specific
/// template (`pg_table_size` on 9.3, `pg_total_relation_size` on 16).
/// Returns `exists = false` rather than erroring when the table is absent.
#[derive(Debug, Clone, Default)]
pub struct TableSizeEstimate {
    pub exists: bool,
    pub row_count: i64,
    pub total_size_bytes: i64,
}

pub async fn estimate_table_size(
    client: &Client,
    table_name: &str,
    version_info: &PgVersionInfo,
) -> MigrateResult<TableSizeEstimate> {
    let exists: bool = client
        .query_one(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_schema = 'public' AND table_name = $1)",
            &[&table_name],
        )
        .await
        .map_err(MigrateError::from_db_error)?
        .get(0);

    if !exists {
        return Ok(TableSizeEstimate::default());
    }

    let templates = version::templates_for(version_info.family);
    let row = client
        .query_one(templates.estimate_size_sql, &[&table_name, &table_name])
        .await
        .map_err(MigrateError::from_db_error)?;

    Ok(TableSizeEstimate {
        exists: true,
        row_count: row.get::<_, Option<i64>>(0).unwrap_or(0),
        total_size_bytes: row.get::<_, Option<i64>>(1).unwrap_or(0),
    })
}

/// 5-second-timeout connectivity check used by validators and the CLI's
/// `status` command, independent of the optimized long-lived connection.
pub async fn quick_probe(config: &ConnectionConfig) -> MigrateResult<()> {
    let pg_config = config.to_pg_config();
    let connect = pg_config.connect(NoTls);

    match tokio::time::timeout(Duration::from_secs(5), connect).await {
        Ok(Ok((client, connection))) => {
            tokio::spawn(async move {
                let _ = connection.await;
            });
            client
                .query_one("SELECT 1", &[])
                .await
                .map_err(MigrateError::from_db_error)?;
            Ok(())
        }
        Ok(Err(e)) => Err(classify_connect_error(e)),
        Err(_) => Err(MigrateError::Connectivity("network timeout".to_string())),
    }
}

/// Turn a raw connect error into a message matching the categories the
/// legacy tool distinguished (host unreachable, auth failure, missing
/// database) rather than a generic driver message.
fn classify_connect_error(err: tokio_postgres::Error) -> MigrateError {
    let text = err.to_string();
    let lower = text.to_lowercase();
    if lower.contains("could not translate host") || lower.contains("name or service not known") {
        MigrateError::Connectivity(format!("host not found: {text}"))
    } else if lower.contains("password authentication failed") || lower.contains("authentication failed") {
        MigrateError::Connectivity(format!("authentication failed: {text}"))
    } else if lower.contains("database") && lower.contains("does not exist") {
        MigrateError::Connectivity(format!("database does not exist: {text}"))
    } else {
        MigrateError::Connectivity(text)
    }
}
