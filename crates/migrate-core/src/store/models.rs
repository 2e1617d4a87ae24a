//! Value types persisted by the checkpoint and history store. Rows are
//! always copied out of the SQLite connection before being handed back to
//! the caller — there is no detached-entity lifecycle to manage the way an
//! ORM session would need, since every read already returns an owned value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl HistoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryStatus::Running => "running",
            HistoryStatus::Completed => "completed",
            HistoryStatus::Failed => "failed",
            HistoryStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "completed" => HistoryStatus::Completed,
            "failed" => HistoryStatus::Failed,
            "cancelled" => HistoryStatus::Cancelled,
            _ => HistoryStatus::Running,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, HistoryStatus::Completed | HistoryStatus::Failed | HistoryStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl CheckpointStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckpointStatus::Pending => "pending",
            CheckpointStatus::Running => "running",
            CheckpointStatus::Completed => "completed",
            CheckpointStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "running" => CheckpointStatus::Running,
            "completed" => CheckpointStatus::Completed,
            "failed" => CheckpointStatus::Failed,
            _ => CheckpointStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CopyMethod {
    Copy,
    Insert,
}

impl CopyMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            CopyMethod::Copy => "COPY",
            CopyMethod::Insert => "INSERT",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "COPY" => CopyMethod::Copy,
            _ => CopyMethod::Insert,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MigrationHistory {
    pub id: i64,
    pub profile_id: String,
    pub start_date: String,
    pub end_date: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: HistoryStatus,
    pub total_rows: i64,
    pub processed_rows: i64,
    pub source_connection_status: Option<String>,
    pub target_connection_status: Option<String>,
    pub connection_check_time: Option<DateTime<Utc>>,
}

/// Fields accepted by [`super::history::HistoryRepository::create`]; the
/// store fills in `id`, `started_at` and the initial `running` status.
#[derive(Debug, Clone)]
pub struct NewMigrationHistory {
    pub profile_id: String,
    pub start_date: String,
    pub end_date: String,
    pub source_connection_status: Option<String>,
    pub target_connection_status: Option<String>,
}

/// Partial update applied to an existing history row; `None` fields are
/// left untouched.
#[derive(Debug, Clone, Default)]
pub struct HistoryUpdate {
    pub status: Option<HistoryStatus>,
    pub processed_rows: Option<i64>,
    pub total_rows: Option<i64>,
    pub completed: bool,
}

#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub id: i64,
    pub history_id: i64,
    pub partition_name: String,
    pub status: CheckpointStatus,
    pub rows_processed: i64,
    /// Dedicated resume-key columns (`last_path_id`/`last_issued_date` in
    /// the schema). Writers always use these; see [`Checkpoint::resume_key`]
    /// for the read-side JSON fallback.
    pub last_key: Option<String>,
    pub last_date: Option<String>,
    pub bytes_transferred: i64,
    pub copy_method: CopyMethod,
    pub error_message: Option<String>,
}

impl Checkpoint {
    /// Resume position for this checkpoint: the dedicated `(last_key,
    /// last_date)` columns when present, otherwise a best-effort parse of
    /// `error_message` as the legacy JSON envelope
    /// (`{"last_path_id": ..., "last_issued_date": ...}`). Only a read-side
    /// fallback — nothing in this crate writes resume state into
    /// `error_message` anymore.
    pub fn resume_key(&self) -> Option<(String, String)> {
        if let (Some(key), Some(date)) = (&self.last_key, &self.last_date) {
            return Some((key.clone(), date.clone()));
        }

        let raw = self.error_message.as_ref()?;
        let value: serde_json::Value = serde_json::from_str(raw).ok()?;
        let key = value.get("last_path_id")?;
        let date = value.get("last_issued_date")?;
        Some((json_scalar_to_string(key)?, json_scalar_to_string(date)?))
    }
}

fn json_scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Fields accepted by [`super::checkpoint::CheckpointRepository::create`].
#[derive(Debug, Clone)]
pub struct NewCheckpoint {
    pub history_id: i64,
    pub partition_name: String,
}

/// Partial update applied to an existing checkpoint; `None` fields are left
/// untouched. `rows_processed`/`last_key`/`last_date` are enforced
/// monotonically non-decreasing by the repository, not by this type.
#[derive(Debug, Clone, Default)]
pub struct CheckpointUpdate {
    pub status: Option<CheckpointStatus>,
    pub rows_processed: Option<i64>,
    pub last_key: Option<String>,
    pub last_date: Option<String>,
    pub bytes_transferred: Option<i64>,
    pub copy_method: Option<CopyMethod>,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(last_key: Option<&str>, last_date: Option<&str>, error_message: Option<&str>) -> Checkpoint {
        Checkpoint {
            id: 1,
            history_id: 1,
            partition_name: "point_history_240115".to_string(),
            status: CheckpointStatus::Running,
            rows_processed: 100_000,
            last_key: last_key.map(str::to_string),
            last_date: last_date.map(str::to_string),
            bytes_transferred: 0,
            copy_method: CopyMethod::Copy,
            error_message: error_message.map(str::to_string),
        }
    }

    #[test]
    fn resume_key_prefers_dedicated_columns() {
        let cp = checkpoint(Some("200000"), Some("20240103"), Some(r#"{"last_path_id": 1, "last_issued_date": 2}"#));
        assert_eq!(cp.resume_key(), Some(("200000".to_string(), "20240103".to_string())));
    }

    #[test]
    fn resume_key_falls_back_to_legacy_json_envelope() {
        let cp = checkpoint(None, None, Some(r#"{"last_path_id": 200000, "last_issued_date": 1704240000000}"#));
        assert_eq!(cp.resume_key(), Some(("200000".to_string(), "1704240000000".to_string())));
    }

    #[test]
    fn resume_key_is_none_without_either_source() {
        let cp = checkpoint(None, None, Some("transfer failed: connection reset"));
        assert_eq!(cp.resume_key(), None);
    }
}
