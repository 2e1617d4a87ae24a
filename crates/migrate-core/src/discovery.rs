//! Partition discovery: resolve which child partitions fall inside a date
//! range by querying the catalog table `partition_table_info`.

use crate::error::{MigrateError, MigrateResult};
use chrono::NaiveDate;
use tokio_postgres::Client;

/// One row of `partition_table_info` joined with liveness facts from the
/// actual catalog (existence, row count).
#[derive(Debug, Clone)]
pub struct PartitionInfo {
    pub table_name: String,
    pub table_type_code: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub row_count: i64,
    pub exists: bool,
}

/// `from_date`/`to_date` in `partition_table_info` are millisecond epoch
/// timestamps over a date-only value (midnight UTC).
fn date_to_millis(d: NaiveDate) -> i64 {
    d.and_hms_opt(0, 0, 0).expect("valid midnight").and_utc().timestamp_millis()
}

fn millis_to_date(ms: i64) -> NaiveDate {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.date_naive())
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(1970, 1, 1).unwrap())
}

/// Find every registered, active partition of the given table type codes
/// whose `[from_date, to_date]` interval overlaps `[start_date, end_date]`,
/// ordered by `(table_data, from_date)`. Skips rows whose table no longer
/// exists in the catalog rather than failing the whole scan.
pub async fn discover_partitions(
    client: &Client,
    start_date: NaiveDate,
    end_date: NaiveDate,
    table_type_codes: &[String],
) -> MigrateResult<Vec<PartitionInfo>> {
    if table_type_codes.is_empty() {
        return Err(MigrateError::config("at least one table type must be specified"));
    }

    let start_ms = date_to_millis(start_date);
    let end_ms = date_to_millis(end_date);

    let rows = client
        .query(
            "SELECT table_name, table_data, from_date, to_date \
             FROM partition_table_info \
             WHERE table_data = ANY($1) \
             AND use_flag = true \
             AND from_date <= $2 \
             AND to_date >= $3 \
             ORDER BY table_data, from_date",
            &[&table_type_codes, &end_ms, &start_ms],
        )
        .await
        .map_err(MigrateError::from_db_error)?;

    let mut partitions = Vec::with_capacity(rows.len());
    for row in rows {
        let table_name: String = row.get(0);
        let table_type_code: String = row.get(1);
        let from_ms: i64 = row.get(2);
        let to_ms: i64 = row.get(3);

        let partition_start = millis_to_date(from_ms);
        let partition_end = millis_to_date(to_ms);

        if partition_start > end_date || partition_end < start_date {
            continue;
        }

        if !table_exists(client, &table_name).await? {
            continue;
        }

        let row_count = row_count_of(client, &table_name).await;

        partitions.push(PartitionInfo {
            table_name,
            table_type_code,
            start_date: partition_start,
            end_date: partition_end,
            row_count,
            exists: true,
        });
    }

    Ok(partitions)
}

/// Look up a single registered partition by its exact table name, whether or
/// not it has a live table backing it.
pub async fn get_partition_info(client: &Client, table_name: &str) -> MigrateResult<Option<PartitionInfo>> {
    let row = client
        .query_opt(
            "SELECT table_name, table_data, from_date, to_date FROM partition_table_info WHERE table_name = $1",
            &[&table_name],
        )
        .await
        .map_err(MigrateError::from_db_error)?;

    let Some(row) = row else {
        return Ok(None);
    };

    let table_name: String = row.get(0);
    let table_type_code: String = row.get(1);
    let from_ms: i64 = row.get(2);
    let to_ms: i64 = row.get(3);
    let exists = table_exists(client, &table_name).await?;
    let row_count = if exists { row_count_of(client, &table_name).await } else { 0 };

    Ok(Some(PartitionInfo {
        table_name,
        table_type_code,
        start_date: millis_to_date(from_ms),
        end_date: millis_to_date(to_ms),
        row_count,
        exists,
    }))
}

async fn table_exists(client: &Client, table_name: &str) -> MigrateResult<bool> {
    let row = client
        .query_one(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_schema = 'public' AND table_name = $1)",
            &[&table_name],
        )
        .await
        .map_err(MigrateError::from_db_error)?;
    Ok(row.get(0))
}

/// `COUNT(*)` against a dynamically-named table. The name always comes from
/// `partition_table_info`, never user input, but is still quoted as an
/// identifier rather than interpolated as a literal.
async fn row_count_of(client: &Client, table_name: &str) -> i64 {
    let quoted = quote_ident(table_name);
    let sql = format!("SELECT COUNT(*) FROM {quoted}");
    match client.query_one(&sql, &[]).await {
        Ok(row) => row.get(0),
        Err(_) => 0,
    }
}

pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_round_trips_through_date() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(millis_to_date(date_to_millis(d)), d);
    }

    #[test]
    fn quote_ident_escapes_embedded_quotes() {
        assert_eq!(quote_ident("point_history_240115"), "\"point_history_240115\"");
        assert_eq!(quote_ident("weird\"name"), "\"weird\"\"name\"");
    }
}
