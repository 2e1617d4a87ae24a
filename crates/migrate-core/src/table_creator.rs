//! Target-side parent/partition table creation and routing attachment.

use crate::config::TruncateMode;
use crate::discovery::{self, PartitionInfo};
use crate::error::{MigrateError, MigrateResult};
use crate::table_types::{self, Routing, TableTypeConfig, TableTypeRegistry};
use crate::version::PgFamily;
use tokio_postgres::Client;
use tracing::{info, warn};

/// Outcome of [`ensure_partition_ready`]: either the partition is
/// immediately usable, or it exists with rows in it and `TruncateMode::Ask`
/// requires the caller to confirm before anything is touched.
pub enum PartitionReadiness {
    Ready,
    AwaitingTruncateConfirmation { existing_rows: i64 },
}

/// Make `partition_name` ready to receive a COPY IN: create the parent and
/// child tables if the child doesn't exist yet, truncate a pre-existing
/// non-empty one in [`TruncateMode::Auto`], or hand the decision back to the
/// caller in [`TruncateMode::Ask`] via [`PartitionReadiness::AwaitingTruncateConfirmation`]
/// — see [`truncate_existing`] for completing that confirmation.
pub async fn ensure_partition_ready(
    source: &Client,
    target: &Client,
    partition_name: &str,
    target_family: PgFamily,
    truncate_mode: TruncateMode,
) -> MigrateResult<PartitionReadiness> {
    if !table_exists_on_target(target, partition_name).await? {
        create_partition_table(source, target, partition_name, target_family).await?;
        return Ok(PartitionReadiness::Ready);
    }

    let existing_rows = row_count_on(target, partition_name).await?;
    if existing_rows == 0 {
        return Ok(PartitionReadiness::Ready);
    }

    match truncate_mode {
        TruncateMode::Auto => {
            truncate_partition(target, partition_name).await?;
            Ok(PartitionReadiness::Ready)
        }
        TruncateMode::Ask => Ok(PartitionReadiness::AwaitingTruncateConfirmation { existing_rows }),
    }
}

/// Truncate a partition the caller has already confirmed (or decided not
/// to, in which case this is never called) in response to
/// [`PartitionReadiness::AwaitingTruncateConfirmation`].
pub async fn truncate_existing(target: &Client, partition_name: &str) -> MigrateResult<()> {
    truncate_partition(target, partition_name).await
}

async fn row_count_on(target: &Client, table_name: &str) -> MigrateResult<i64> {
    let quoted = discovery::quote_ident(table_name);
    let row = target
        .query_one(&format!("SELECT COUNT(*) FROM {quoted}"), &[])
        .await
        .map_err(MigrateError::from_db_error)?;
    Ok(row.get(0))
}

async fn truncate_partition(target: &Client, partition_name: &str) -> MigrateResult<()> {
    let quoted = discovery::quote_ident(partition_name);
    target
        .batch_execute(&format!("TRUNCATE TABLE {quoted} RESTART IDENTITY"))
        .await
        .map_err(MigrateError::from_db_error)
}

/// Create (if missing) the parent table, the child partition, and its
/// routing (TRIGGER for `point_history`, RULE for everything else), then
/// register the partition in `partition_table_info` on the target.
///
/// Idempotent: every DDL statement is `IF NOT EXISTS`/`CREATE OR REPLACE`, and
/// the catalog insert is skipped if a row already exists. `target_family`
/// governs whether index DDL can rely on `IF NOT EXISTS` (absent on 9.3).
pub async fn create_partition_table(
    source: &Client,
    target: &Client,
    partition_name: &str,
    target_family: PgFamily,
) -> MigrateResult<()> {
    let parent_name = table_types::parent_name_of(partition_name);
    let table_type = TableTypeRegistry::by_parent_name(&parent_name)?;

    let partition_info = resolve_partition_info(source, partition_name, table_type).await?;

    if !table_exists_on_target(target, &parent_name).await? {
        info!("parent table {parent_name} missing on target, creating");
        create_parent_table(source, target, table_type, target_family).await?;
    }

    info!("creating partition table {partition_name}");
    create_partition(target, partition_name, table_type, partition_info.as_ref()).await?;

    if let Some(info) = &partition_info {
        add_partition_info(target, partition_name, table_type, info).await?;
    } else {
        warn!("skipping partition_table_info upsert for {partition_name}: date range unknown");
    }

    Ok(())
}

/// Source data needed to build the CHECK constraint: prefer the catalog row,
/// fall back to deriving the `[from, to]` range from the `YYMMDD` suffix when
/// the catalog has no entry yet. When neither source yields a range, return
/// `None` rather than failing outright: per the legacy tool's own fallback,
/// a partition with an undeterminable range still gets created (bare
/// `INHERITS`, no CHECK), it just can't be routed by RULE (and the catalog
/// can't be upserted without a `from_date`/`to_date`).
async fn resolve_partition_info(
    source: &Client,
    partition_name: &str,
    table_type: &TableTypeConfig,
) -> MigrateResult<Option<PartitionInfo>> {
    if let Some(info) = crate::discovery::get_partition_info(source, partition_name).await? {
        return Ok(Some(info));
    }

    warn!("no partition_table_info row for {partition_name}, deriving range from name suffix");
    match derive_partition_info_from_suffix(partition_name, table_type) {
        Some(info) => Ok(Some(info)),
        None => {
            warn!(
                "cannot determine date range for {partition_name} (no catalog row, suffix is not YYMMDD): \
                 creating without a CHECK constraint and without RULE routing"
            );
            Ok(None)
        }
    }
}

fn derive_partition_info_from_suffix(partition_name: &str, table_type: &TableTypeConfig) -> Option<PartitionInfo> {
    let suffix = partition_name.rsplit('_').next()?;
    if suffix.len() != 6 || !suffix.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let year = 2000 + suffix[0..2].parse::<i32>().ok()?;
    let month = suffix[2..4].parse::<u32>().ok()?;
    let day = suffix[4..6].parse::<u32>().ok()?;
    let date = chrono::NaiveDate::from_ymd_opt(year, month, day)?;

    Some(PartitionInfo {
        table_name: partition_name.to_string(),
        table_type_code: table_type.code.to_string(),
        start_date: date,
        end_date: date,
        row_count: 0,
        exists: false,
    })
}

async fn table_exists_on_target(target: &Client, table_name: &str) -> MigrateResult<bool> {
    let row = target
        .query_one(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_schema = 'public' AND table_name = $1)",
            &[&table_name],
        )
        .await
        .map_err(MigrateError::from_db_error)?;
    Ok(row.get(0))
}

struct SourceColumn {
    name: String,
    data_type: String,
    max_length: Option<i32>,
    nullable: bool,
    default: Option<String>,
}

async fn create_parent_table(
    source: &Client,
    target: &Client,
    table_type: &TableTypeConfig,
    target_family: PgFamily,
) -> MigrateResult<()> {
    let rows = source
        .query(
            "SELECT column_name, data_type, character_maximum_length, is_nullable, column_default \
             FROM information_schema.columns WHERE table_name = $1 ORDER BY ordinal_position",
            &[&table_type.parent_name],
        )
        .await
        .map_err(MigrateError::from_db_error)?;

    if rows.is_empty() {
        return Err(MigrateError::schema(format!(
            "source table structure not found: {}",
            table_type.parent_name
        )));
    }

    let columns: Vec<SourceColumn> = rows
        .into_iter()
        .map(|row| SourceColumn {
            name: row.get(0),
            data_type: row.get(1),
            max_length: row.get(2),
            nullable: row.get::<_, String>(3) != "NO",
            default: row.get(4),
        })
        .collect();

    let mut column_defs = Vec::with_capacity(columns.len());
    for col in &columns {
        let mut def = format!("    {} {}", col.name, col.data_type);
        if let Some(len) = col.max_length {
            def.push_str(&format!("({len})"));
        }
        if !col.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &col.default {
            def.push_str(&format!(" DEFAULT {default}"));
        }
        column_defs.push(def);
    }

    let create_sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
        table_type.parent_name,
        column_defs.join(",\n")
    );
    target.batch_execute(&create_sql).await.map_err(MigrateError::from_db_error)?;

    match table_type.routing {
        Routing::TriggerBased => attach_trigger_routing(target, table_type, target_family).await?,
        Routing::RuleBased => attach_rule_parent_indexes(target, table_type, target_family).await?,
    }

    Ok(())
}

/// Build a `CREATE INDEX [IF NOT EXISTS] <name> ON <table> USING btree (<cols>)`
/// statement, omitting `IF NOT EXISTS` on 9.3 (added in 9.5) — the caller
/// swallows a resulting "duplicate object" error on retry.
fn create_index_stmt(name: &str, table: &str, cols: &str, family: PgFamily) -> String {
    let if_not_exists = if family.effective() == PgFamily::Pg16 { "IF NOT EXISTS " } else { "" };
    format!("CREATE INDEX {if_not_exists}{name} ON {table} USING btree ({cols});")
}

/// Run each `CREATE INDEX` statement independently so a "duplicate object"
/// failure on one (expected, repeatedly, on 9.3) doesn't block the others.
async fn run_index_statements(target: &Client, statements: &[String]) -> MigrateResult<()> {
    for stmt in statements {
        if let Err(e) = target.batch_execute(stmt).await {
            warn!("index creation failed (ignored if duplicate object): {stmt}: {e}");
        }
    }
    Ok(())
}

/// RULE_BASED parent tables still get indexes sized to their query shape:
/// `(key_column, date_column)` for resume-ordered scans, and one on the
/// table's trailing column (the secondary lookup column for that type, e.g.
/// `station_id` on `energy_display`).
async fn attach_rule_parent_indexes(target: &Client, table_type: &TableTypeConfig, family: PgFamily) -> MigrateResult<()> {
    let parent = table_type.parent_name;
    let key = table_type.key_column();
    let date_col = table_type.date_column;
    let trailing = table_type.columns.last().copied().unwrap_or(key);

    let statements = vec![
        create_index_stmt(&format!("{parent}_{key}_date"), parent, &format!("{key}, {date_col}"), family),
        create_index_stmt(&format!("{parent}_{trailing}_idx"), parent, trailing, family),
    ];
    run_index_statements(target, &statements).await
}

/// `point_history`-style routing: a `BEFORE INSERT` trigger derives the
/// target child name from `issued_date` and re-inserts into it.
async fn attach_trigger_routing(target: &Client, table_type: &TableTypeConfig, family: PgFamily) -> MigrateResult<()> {
    let parent = table_type.parent_name;
    let key = table_type.key_column();
    let date_col = table_type.date_column;
    let statements = vec![
        create_index_stmt(&format!("{parent}_{key}_date"), parent, &format!("{key}, {date_col}"), family),
        create_index_stmt(&format!("{parent}_{key}_idx"), parent, key, family),
    ];
    run_index_statements(target, &statements).await?;

    let function_sql = format!(
        "CREATE OR REPLACE FUNCTION {parent}_partition_insert()\n\
         RETURNS trigger\n\
         LANGUAGE plpgsql\n\
         AS $function$\n\
         DECLARE\n\
         _insert_time bigint;\n\
         _insert_date text;\n\
         BEGIN\n\
             _insert_time := (NEW.{date_col}/1000)::bigint;\n\
             _insert_date := to_char(to_timestamp(_insert_time), 'YYMMDD');\n\
             EXECUTE 'INSERT INTO {parent}_'||_insert_date||' VALUES ($1.*)' USING NEW;\n\
             RETURN NULL;\n\
         END;\n\
         $function$",
        parent = parent,
        date_col = table_type.date_column,
    );
    target.batch_execute(&function_sql).await.map_err(MigrateError::from_db_error)?;

    let trigger_sql = format!(
        "DROP TRIGGER IF EXISTS insert_{parent}_trigger ON {parent};\n\
         CREATE TRIGGER insert_{parent}_trigger\n\
         BEFORE INSERT ON {parent}\n\
         FOR EACH ROW EXECUTE PROCEDURE {parent}_partition_insert();",
        parent = parent,
    );
    target.batch_execute(&trigger_sql).await.map_err(MigrateError::from_db_error)?;

    Ok(())
}

/// `trend_history`/`energy_display`/`running_time_history`-style routing: a
/// per-partition `RULE` redirects inserts matching the CHECK bounds.
async fn attach_rule_routing(
    target: &Client,
    partition_name: &str,
    table_type: &TableTypeConfig,
    info: &PartitionInfo,
) -> MigrateResult<()> {
    let bound_low = check_literal(table_type, info.start_date, true);
    let bound_high = check_literal(table_type, info.end_date, false);
    let rule_name = format!("rule_{partition_name}");

    let rule_sql = format!(
        "DROP RULE IF EXISTS {rule_name} ON {parent};\n\
         CREATE RULE {rule_name} AS\n\
         ON INSERT TO {parent}\n\
         WHERE ({date_col} >= {low} AND {date_col} <= {high})\n\
         DO INSTEAD INSERT INTO {partition} ({columns}) VALUES ({values})",
        rule_name = rule_name,
        parent = table_type.parent_name,
        date_col = table_type.date_column,
        low = bound_low,
        high = bound_high,
        partition = partition_name,
        columns = table_type.column_list(),
        values = table_type.columns.iter().map(|c| format!("new.{c}")).collect::<Vec<_>>().join(", "),
    );
    target.batch_execute(&rule_sql).await.map_err(MigrateError::from_db_error)?;
    Ok(())
}

/// CHECK/RULE bound literal: bigint millisecond epoch for integer date
/// columns, `timestamp without time zone` literal when
/// `date_is_timestamp` is set (energy_display).
fn check_literal(table_type: &TableTypeConfig, date: chrono::NaiveDate, is_lower_bound: bool) -> String {
    if table_type.date_is_timestamp {
        let time = if is_lower_bound {
            date.and_hms_opt(0, 0, 0).unwrap()
        } else {
            date.and_hms_milli_opt(23, 59, 59, 999).unwrap()
        };
        format!("'{}'::timestamp", time.format("%Y-%m-%d %H:%M:%S%.3f"))
    } else {
        let millis = if is_lower_bound {
            date.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp_millis()
        } else {
            date.and_hms_milli_opt(23, 59, 59, 999).unwrap().and_utc().timestamp_millis()
        };
        millis.to_string()
    }
}

async fn create_partition(
    target: &Client,
    partition_name: &str,
    table_type: &TableTypeConfig,
    info: Option<&PartitionInfo>,
) -> MigrateResult<()> {
    let check_clause = info.map(|info| {
        let low = check_literal(table_type, info.start_date, true);
        let high = check_literal(table_type, info.end_date, false);
        (low, high)
    });

    let create_sql = match table_type.routing {
        Routing::TriggerBased => match &check_clause {
            Some((low, high)) => format!(
                "CREATE TABLE IF NOT EXISTS {partition} (\n\
                     CONSTRAINT {partition}_pkey PRIMARY KEY({key}, {date_col}),\n\
                     CONSTRAINT {partition}_{date_col}_check CHECK({date_col} >= {low} AND {date_col} <= {high})\n\
                 ) INHERITS ({parent})",
                partition = partition_name,
                key = table_type.key_column(),
                date_col = table_type.date_column,
                low = low,
                high = high,
                parent = table_type.parent_name,
            ),
            None => format!(
                "CREATE TABLE IF NOT EXISTS {partition} (\n\
                     CONSTRAINT {partition}_pkey PRIMARY KEY({key}, {date_col})\n\
                 ) INHERITS ({parent})",
                partition = partition_name,
                key = table_type.key_column(),
                parent = table_type.parent_name,
            ),
        },
        Routing::RuleBased => match &check_clause {
            Some((low, high)) => format!(
                "CREATE TABLE IF NOT EXISTS {partition} (\n\
                     CHECK({date_col} >= {low} AND {date_col} <= {high})\n\
                 ) INHERITS ({parent})",
                partition = partition_name,
                date_col = table_type.date_column,
                low = low,
                high = high,
                parent = table_type.parent_name,
            ),
            None => format!(
                "CREATE TABLE IF NOT EXISTS {partition} () INHERITS ({parent})",
                partition = partition_name,
                parent = table_type.parent_name,
            ),
        },
    };
    target.batch_execute(&create_sql).await.map_err(MigrateError::from_db_error)?;

    if matches!(table_type.routing, Routing::TriggerBased) {
        let cluster_sql = format!("CLUSTER {partition_name} USING {partition_name}_pkey");
        if let Err(e) = target.batch_execute(&cluster_sql).await {
            warn!("CLUSTER failed for {partition_name} (ignored, table is still empty): {e}");
        }
    } else if let Some(info) = info {
        attach_rule_routing(target, partition_name, table_type, info).await?;
    } else {
        warn!("skipping RULE creation for {partition_name}: date range unknown");
    }

    Ok(())
}

async fn add_partition_info(
    target: &Client,
    partition_name: &str,
    table_type: &TableTypeConfig,
    info: &PartitionInfo,
) -> MigrateResult<()> {
    target
        .batch_execute(
            "CREATE TABLE IF NOT EXISTS partition_table_info (\n\
                 table_name varchar(100) NOT NULL,\n\
                 table_data varchar(10) NOT NULL,\n\
                 from_date bigint NOT NULL,\n\
                 to_date bigint NOT NULL,\n\
                 use_flag boolean NOT NULL,\n\
                 save_date timestamp NOT NULL,\n\
                 cluster_index boolean DEFAULT false\n\
             )",
        )
        .await
        .map_err(MigrateError::from_db_error)?;

    let exists: bool = target
        .query_one("SELECT EXISTS (SELECT 1 FROM partition_table_info WHERE table_name = $1)", &[&partition_name])
        .await
        .map_err(MigrateError::from_db_error)?
        .get(0);

    if exists {
        return Ok(());
    }

    let from_ms = info.start_date.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp_millis();
    let to_ms = info.end_date.and_hms_milli_opt(23, 59, 59, 999).unwrap().and_utc().timestamp_millis();
    let cluster_index = matches!(table_type.routing, Routing::TriggerBased);

    target
        .execute(
            "INSERT INTO partition_table_info \
             (table_name, table_data, from_date, to_date, use_flag, save_date, cluster_index) \
             VALUES ($1, $2, $3, $4, true, now(), $5)",
            &[&partition_name, &table_type.code, &from_ms, &to_ms, &cluster_index],
        )
        .await
        .map_err(MigrateError::from_db_error)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_types::TableTypeRegistry;

    #[test]
    fn suffix_derivation_parses_yymmdd() {
        let ph = TableTypeRegistry::by_code("PH").unwrap();
        let info = derive_partition_info_from_suffix("point_history_240115", ph).unwrap();
        assert_eq!(info.start_date, chrono::NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(info.table_type_code, "PH");
    }

    #[test]
    fn suffix_derivation_rejects_non_date_suffix() {
        let ph = TableTypeRegistry::by_code("PH").unwrap();
        assert!(derive_partition_info_from_suffix("point_history_archive", ph).is_none());
    }

    #[test]
    fn check_literal_is_bigint_for_integer_date_columns() {
        let ph = TableTypeRegistry::by_code("PH").unwrap();
        let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let low = check_literal(ph, date, true);
        assert!(low.parse::<i64>().is_ok());
    }

    #[test]
    fn check_literal_is_timestamp_for_energy_display() {
        let ed = TableTypeRegistry::by_code("ED").unwrap();
        let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let low = check_literal(ed, date, true);
        assert!(low.starts_with('\'') && low.ends_with("::timestamp"));
    }
}
