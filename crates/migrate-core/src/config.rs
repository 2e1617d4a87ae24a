//! Connection and job configuration consumed by the core.

use crate::version::CompatMode;
use serde::{Deserialize, Serialize};

/// Connection config consumed by the core. Credential persistence and
/// encryption-at-rest are out of scope here; the core only ever sees a
/// decrypted value of this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub compat_mode: CompatModeConfig,
}

/// Serde-friendly mirror of [`CompatMode`]; `"auto" | "9.3" | "16"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompatModeConfig {
    #[default]
    Auto,
    #[serde(rename = "9.3")]
    Pg93,
    #[serde(rename = "16")]
    Pg16,
}

impl From<CompatModeConfig> for CompatMode {
    fn from(value: CompatModeConfig) -> Self {
        match value {
            CompatModeConfig::Auto => CompatMode::Auto,
            CompatModeConfig::Pg93 => CompatMode::Pg93,
            CompatModeConfig::Pg16 => CompatMode::Pg16,
        }
    }
}

impl ConnectionConfig {
    /// Build a `tokio_postgres::Config` from this value. Does not apply
    /// session parameters; that happens post-connect in `connection::open`.
    pub fn to_pg_config(&self) -> tokio_postgres::Config {
        let mut cfg = tokio_postgres::Config::new();
        cfg.host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&self.username)
            .password(&self.password);
        if self.ssl {
            // NoTls callers that need real TLS should construct their own
            // MakeTlsConnect and ignore this flag; it's surfaced so callers
            // building a libpq-style URL can still set `sslmode=require`.
            cfg.ssl_mode(tokio_postgres::config::SslMode::Require);
        }
        cfg
    }
}

/// How an existing, non-empty destination partition is handled before COPY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TruncateMode {
    /// TRUNCATE automatically and proceed.
    #[default]
    Auto,
    /// Ask the caller via a `TruncateRequested` event/reply round-trip; cancel on refusal.
    Ask,
}

/// What to do when a partition fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorStrategy {
    #[default]
    StopOnError,
    SkipPartitionOnError,
}

/// Which wire protocol moves rows for a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    #[default]
    Copy,
    Insert,
}

/// Per-job configuration driving the orchestrator.
#[derive(Debug, Clone)]
pub struct MigrationJobConfig {
    pub profile_id: String,
    pub start_date: chrono::NaiveDate,
    pub end_date: chrono::NaiveDate,
    pub table_codes: Vec<String>,
    pub batch_size: u32,
    pub max_queue_size: usize,
    pub truncate_mode: TruncateMode,
    pub error_strategy: ErrorStrategy,
    pub transfer_mode: TransferMode,
}

impl Default for MigrationJobConfig {
    fn default() -> Self {
        Self {
            profile_id: String::new(),
            start_date: chrono::NaiveDate::from_ymd_opt(1970, 1, 1).unwrap(),
            end_date: chrono::NaiveDate::from_ymd_opt(1970, 1, 1).unwrap(),
            table_codes: Vec::new(),
            batch_size: 100_000,
            max_queue_size: 8,
            truncate_mode: TruncateMode::default(),
            error_strategy: ErrorStrategy::default(),
            transfer_mode: TransferMode::default(),
        }
    }
}
