//! Legacy row-at-a-time `INSERT` transfer, kept for targets where `COPY`
//! privilege isn't available (see [`crate::connection::probe_copy_privilege`]).
//! Slower than [`super::copy_chunk`] by a wide margin; batch size adapts to
//! the target's apparent resource pressure rather than staying fixed.

use crate::error::{MigrateError, MigrateResult};
use crate::table_types::TableTypeConfig;
use tokio_postgres::Client;

/// Grows 10% per successful batch (legacy tool's own ratio), halves on a
/// resource-exhaustion error, and never leaves this range.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveBatchSize {
    current: u32,
    min: u32,
    max: u32,
}

impl AdaptiveBatchSize {
    pub fn new(initial: u32, min: u32, max: u32) -> Self {
        Self { current: initial.clamp(min, max), min, max }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn grow(&mut self) {
        let grown = (self.current as f64 * 1.1) as u32;
        self.current = grown.min(self.max).max(self.min);
    }

    pub fn shrink(&mut self) {
        let shrunk = (self.current as f64 * 0.5) as u32;
        self.current = shrunk.max(self.min).min(self.max);
    }
}

impl Default for AdaptiveBatchSize {
    fn default() -> Self {
        Self::new(100_000, 1_000, 500_000)
    }
}

/// One `SELECT ... LIMIT/OFFSET` + `INSERT ... VALUES` round trip. Returns
/// the number of rows moved (0 means the offset has reached the end of the
/// partition).
///
/// Every value crosses the wire as `text`: the source projects each column
/// with an explicit `::text` cast, and the `INSERT` relies on Postgres's
/// normal assignment cast from text back into the target column's real
/// type. That sidesteps needing to know the target's column types at
/// compile time, at the cost of `COPY`'s binary throughput — acceptable
/// for a privilege-denied fallback path, not for the primary transfer.
pub async fn insert_batch(
    source: &Client,
    target: &Client,
    table_type: &TableTypeConfig,
    partition_name: &str,
    offset: i64,
    limit: u32,
) -> MigrateResult<u64> {
    let key_col = table_type.key_column();
    let date_col = table_type.date_column;
    let projection: Vec<String> = table_type.columns.iter().map(|c| format!("{c}::text AS {c}")).collect();

    let select_sql = format!(
        "SELECT {} FROM {partition_name} ORDER BY {key_col}, {date_col} LIMIT {limit} OFFSET {offset}",
        projection.join(", ")
    );

    let rows = source.query(&select_sql, &[]).await.map_err(classify_insert_error)?;
    if rows.is_empty() {
        return Ok(0);
    }

    let target_order = target_column_order(target, partition_name).await?;
    let matched_columns: Vec<&'static str> =
        target_order.iter().filter_map(|name| table_type.columns.iter().find(|&&c| c == name).copied()).collect();

    if matched_columns.is_empty() {
        return Err(MigrateError::schema(format!(
            "no overlap between known columns and target table {partition_name}'s catalog columns"
        )));
    }

    let placeholders: Vec<String> = (1..=matched_columns.len()).map(|i| format!("${i}")).collect();
    let insert_sql = format!(
        "INSERT INTO {partition_name} ({}) VALUES ({})",
        matched_columns.join(", "),
        placeholders.join(", ")
    );
    let stmt = target.prepare(&insert_sql).await.map_err(MigrateError::from_db_error)?;

    let transferred = rows.len() as u64;
    for row in &rows {
        let by_name: Vec<Option<String>> =
            table_type.columns.iter().enumerate().map(|(i, _)| row.get::<_, Option<String>>(i)).collect();
        let values: Vec<Option<String>> = matched_columns
            .iter()
            .map(|col| {
                let idx = table_type.columns.iter().position(|c| c == col).expect("matched column is known");
                by_name[idx].clone()
            })
            .collect();
        let params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
            values.iter().map(|v| v as &(dyn tokio_postgres::types::ToSql + Sync)).collect();
        target.execute(&stmt, &params).await.map_err(classify_insert_error)?;
    }

    Ok(transferred)
}

/// Column order for the `INSERT` statement always comes from the target's
/// live catalog, not the static [`TableTypeConfig`] layout, because a
/// legacy target table may have columns in a different physical order.
async fn target_column_order(target: &Client, partition_name: &str) -> MigrateResult<Vec<String>> {
    let rows = target
        .query(
            "SELECT column_name FROM information_schema.columns WHERE table_name = $1 ORDER BY ordinal_position",
            &[&partition_name],
        )
        .await
        .map_err(MigrateError::from_db_error)?;

    if rows.is_empty() {
        return Err(MigrateError::schema(format!("target table {partition_name} has no columns")));
    }

    Ok(rows.iter().map(|row| row.get(0)).collect())
}

/// Resource-exhaustion errors (SQLSTATE class 53) are the signal the batch
/// sizer reacts to; everything else keeps its normal classification.
fn classify_insert_error(err: tokio_postgres::Error) -> MigrateError {
    if let Some(db_err) = err.as_db_error() {
        if db_err.code().code().starts_with("53") {
            return MigrateError::transfer(format!("insufficient resources: {}", db_err.message()));
        }
    }
    MigrateError::from_db_error(err)
}

pub fn is_resource_exhaustion(err: &MigrateError) -> bool {
    matches!(err, MigrateError::Transfer(msg) if msg.starts_with("insufficient resources"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_grows_by_ten_percent_up_to_the_cap() {
        let mut size = AdaptiveBatchSize::new(100_000, 1_000, 500_000);
        size.grow();
        assert_eq!(size.current(), 110_000);
    }

    #[test]
    fn batch_size_growth_is_capped_at_max() {
        let mut size = AdaptiveBatchSize::new(480_000, 1_000, 500_000);
        size.grow();
        assert_eq!(size.current(), 500_000);
    }

    #[test]
    fn batch_size_halves_on_shrink_down_to_the_floor() {
        let mut size = AdaptiveBatchSize::new(1_500, 1_000, 500_000);
        size.shrink();
        assert_eq!(size.current(), 1_000);
    }

    #[test]
    fn new_clamps_an_out_of_range_initial_value() {
        let size = AdaptiveBatchSize::new(10, 1_000, 500_000);
        assert_eq!(size.current(), 1_000);
    }
}
