//! Static registry mapping parent-table name / code to its column layout,
//! date column, and routing strategy.

use crate::error::{MigrateError, MigrateResult};

/// How INSERTs on the parent table are redirected to the correct child
/// partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    /// A `BEFORE INSERT` trigger computes the child name and re-inserts.
    TriggerBased,
    /// A per-partition `RULE ... DO INSTEAD` redirects matching inserts.
    RuleBased,
}

/// Static, per-parent-table configuration. CSV column order for COPY always
/// comes from here, never inferred from the target's `information_schema` at
/// copy time (see the column-order round-trip invariant).
#[derive(Debug, Clone)]
pub struct TableTypeConfig {
    pub parent_name: &'static str,
    pub code: &'static str,
    pub columns: &'static [&'static str],
    pub date_column: &'static str,
    pub date_is_timestamp: bool,
    pub routing: Routing,
}

impl TableTypeConfig {
    /// `columns[0]` by invariant: the resume-ordering key column.
    pub fn key_column(&self) -> &'static str {
        self.columns[0]
    }

    pub fn column_list(&self) -> String {
        self.columns.join(", ")
    }
}

const POINT_HISTORY: TableTypeConfig = TableTypeConfig {
    parent_name: "point_history",
    code: "PH",
    columns: &["path_id", "issued_date", "changed_value", "connection_status"],
    date_column: "issued_date",
    date_is_timestamp: false,
    routing: Routing::TriggerBased,
};

const TREND_HISTORY: TableTypeConfig = TableTypeConfig {
    parent_name: "trend_history",
    code: "TH",
    columns: &["path_id", "issued_date", "value", "min_value", "max_value"],
    date_column: "issued_date",
    date_is_timestamp: false,
    routing: Routing::RuleBased,
};

const ENERGY_DISPLAY: TableTypeConfig = TableTypeConfig {
    parent_name: "energy_display",
    code: "ED",
    columns: &["sensor_id", "issued_date", "value", "station_id"],
    date_column: "issued_date",
    date_is_timestamp: true,
    routing: Routing::RuleBased,
};

const RUNNING_TIME_HISTORY: TableTypeConfig = TableTypeConfig {
    parent_name: "running_time_history",
    code: "RT",
    columns: &["path_id", "issued_date", "running_time", "status"],
    date_column: "issued_date",
    date_is_timestamp: false,
    routing: Routing::RuleBased,
};

const ALL: &[TableTypeConfig] = &[POINT_HISTORY, TREND_HISTORY, ENERGY_DISPLAY, RUNNING_TIME_HISTORY];

/// Static, total lookup over the supported table types.
pub struct TableTypeRegistry;

impl TableTypeRegistry {
    pub fn all() -> &'static [TableTypeConfig] {
        ALL
    }

    pub fn by_parent_name(parent_name: &str) -> MigrateResult<&'static TableTypeConfig> {
        ALL.iter()
            .find(|t| t.parent_name == parent_name)
            .ok_or_else(|| MigrateError::config(format!("unknown parent table: {parent_name}")))
    }

    pub fn by_code(code: &str) -> MigrateResult<&'static TableTypeConfig> {
        ALL.iter()
            .find(|t| t.code == code)
            .ok_or_else(|| MigrateError::config(format!("unknown table type code: {code}")))
    }

    /// Given a partition child name (e.g. `point_history_240115`), strip the
    /// last underscore-delimited segment and look up the remainder as a
    /// parent name.
    pub fn for_partition_name(partition_name: &str) -> MigrateResult<&'static TableTypeConfig> {
        let parent = parent_name_of(partition_name);
        Self::by_parent_name(&parent)
    }
}

/// `point_history_240115` -> `point_history`.
pub fn parent_name_of(partition_name: &str) -> String {
    match partition_name.rfind('_') {
        Some(idx) => partition_name[..idx].to_string(),
        None => partition_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_config_per_code() {
        let mut codes: Vec<&str> = ALL.iter().map(|t| t.code).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), ALL.len());
    }

    #[test]
    fn key_column_is_first_column() {
        for t in ALL {
            assert_eq!(t.key_column(), t.columns[0]);
        }
    }

    #[test]
    fn partition_name_strips_trailing_segment() {
        assert_eq!(parent_name_of("point_history_240115"), "point_history");
        assert_eq!(parent_name_of("energy_display_240105"), "energy_display");
    }

    #[test]
    fn lookup_by_partition_name_resolves_registry_entry() {
        let cfg = TableTypeRegistry::for_partition_name("trend_history_240102").unwrap();
        assert_eq!(cfg.code, "TH");
        assert_eq!(cfg.routing, Routing::RuleBased);
    }

    #[test]
    fn unknown_parent_is_an_error() {
        assert!(TableTypeRegistry::by_parent_name("not_a_real_table").is_err());
    }

    #[test]
    fn point_history_is_trigger_based_others_are_rule_based() {
        assert_eq!(POINT_HISTORY.routing, Routing::TriggerBased);
        for t in [&TREND_HISTORY, &ENERGY_DISPLAY, &RUNNING_TIME_HISTORY] {
            assert_eq!(t.routing, Routing::RuleBased);
        }
    }
}
