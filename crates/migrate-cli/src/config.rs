//! Job configuration: source/target connections and default job parameters
//! loaded from a TOML file, with password fields optionally supplied via
//! environment variables loaded through `dotenvy` rather than committed to
//! the file.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use migrate_core::config::{ConnectionConfig, ErrorStrategy, MigrationJobConfig, TransferMode, TruncateMode};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub source: ConnectionConfig,
    pub target: ConnectionConfig,
    #[serde(default = "default_store_path")]
    pub store_path: String,
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub job: JobDefaults,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobDefaults {
    pub batch_size: u32,
    pub max_queue_size: usize,
    pub truncate_mode: String,
    pub error_strategy: String,
    pub transfer_mode: String,
}

impl Default for JobDefaults {
    fn default() -> Self {
        let defaults = MigrationJobConfig::default();
        Self {
            batch_size: defaults.batch_size,
            max_queue_size: defaults.max_queue_size,
            truncate_mode: "auto".to_string(),
            error_strategy: "stop".to_string(),
            transfer_mode: "copy".to_string(),
        }
    }
}

fn default_store_path() -> String {
    "pg-migrate.sqlite3".to_string()
}

/// Load `path` as TOML, then let `MIGRATE_SOURCE_PASSWORD`/`MIGRATE_TARGET_PASSWORD`
/// override whatever password (if any) the file itself carries. Call
/// `dotenvy::dotenv()` before this so a `.env` file counts as part of the
/// environment.
pub fn load(path: &Path) -> Result<AppConfig> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading config file {}", path.display()))?;
    let mut config: AppConfig = toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?;

    if let Ok(password) = std::env::var("MIGRATE_SOURCE_PASSWORD") {
        config.source.password = password;
    }
    if let Ok(password) = std::env::var("MIGRATE_TARGET_PASSWORD") {
        config.target.password = password;
    }

    Ok(config)
}

pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").with_context(|| format!("invalid date {raw:?}, expected YYYY-MM-DD"))
}

fn parse_truncate_mode(raw: &str) -> Result<TruncateMode> {
    match raw {
        "auto" => Ok(TruncateMode::Auto),
        "ask" => Ok(TruncateMode::Ask),
        other => anyhow::bail!("invalid job.truncate_mode: {other} (expected \"auto\" or \"ask\")"),
    }
}

fn parse_error_strategy(raw: &str) -> Result<ErrorStrategy> {
    match raw {
        "stop" => Ok(ErrorStrategy::StopOnError),
        "skip" => Ok(ErrorStrategy::SkipPartitionOnError),
        other => anyhow::bail!("invalid job.error_strategy: {other} (expected \"stop\" or \"skip\")"),
    }
}

fn parse_transfer_mode(raw: &str) -> Result<TransferMode> {
    match raw {
        "copy" => Ok(TransferMode::Copy),
        "insert" => Ok(TransferMode::Insert),
        other => anyhow::bail!("invalid job.transfer_mode: {other} (expected \"copy\" or \"insert\")"),
    }
}

/// Assemble a [`MigrationJobConfig`] from the file's `[job]` defaults plus
/// the per-run arguments the CLI collected.
pub fn build_job_config(
    app: &AppConfig,
    profile_id: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    table_codes: Vec<String>,
) -> Result<MigrationJobConfig> {
    Ok(MigrationJobConfig {
        profile_id,
        start_date,
        end_date,
        table_codes,
        batch_size: app.job.batch_size,
        max_queue_size: app.job.max_queue_size,
        truncate_mode: parse_truncate_mode(&app.job.truncate_mode)?,
        error_strategy: parse_error_strategy(&app.job.error_strategy)?,
        transfer_mode: parse_transfer_mode(&app.job.transfer_mode)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_date_accepts_iso_form() {
        assert_eq!(parse_date("2024-01-15").unwrap(), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    }

    #[test]
    fn parse_date_rejects_other_forms() {
        assert!(parse_date("01/15/2024").is_err());
    }

    #[test]
    fn job_defaults_match_the_core_defaults() {
        let defaults = JobDefaults::default();
        let core_defaults = MigrationJobConfig::default();
        assert_eq!(defaults.batch_size, core_defaults.batch_size);
        assert_eq!(defaults.max_queue_size, core_defaults.max_queue_size);
    }

    #[test]
    fn load_parses_a_minimal_toml_file() {
        let dir = std::env::temp_dir().join(format!("migrate-cli-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(
            &path,
            r#"
            [source]
            host = "localhost"
            port = 5432
            database = "legacy"
            username = "svc"
            password = "secret"

            [target]
            host = "localhost"
            port = 5433
            database = "modern"
            username = "svc"
            password = "secret"
            "#,
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.source.host, "localhost");
        assert_eq!(config.target.port, 5433);
        assert_eq!(config.store_path, "pg-migrate.sqlite3");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
