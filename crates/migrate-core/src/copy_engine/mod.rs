//! Streaming bulk transfer: one partition, one chunk at a time, source
//! `COPY ... TO STDOUT` piped through a bounded queue into target
//! `COPY ... FROM STDIN`.
//!
//! The producer (source `copy_out`) and consumer (target `copy_in`) run
//! concurrently: the producer is spawned onto its own task so it keeps
//! reading while the consumer is still writing the previous batch, and the
//! bounded channel between them is the back-pressure mechanism — a slow
//! target stalls the producer's `send` rather than the two racing ahead of
//! each other. The channel carries `Result` values so a source-side error
//! crosses the task boundary and surfaces from the consumer's `recv` loop
//! instead of being lost when the producer task is dropped.

mod chunk;
pub mod insert_fallback;

pub use chunk::ChunkProgress;

use crate::error::{MigrateError, MigrateResult};
use crate::table_types::TableTypeConfig;
use bytes::Bytes;
use chunk::LineTracker;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_postgres::Client;

/// Default depth of the bounded channel between producer and consumer, in
/// COPY frames (not rows), when a caller doesn't override it: enough to
/// absorb one slow consumer write without the producer blocking on every
/// frame, small enough that a stalled consumer stops the producer within a
/// few frames rather than buffering the whole chunk in memory.
pub const DEFAULT_QUEUE_DEPTH: usize = 8;

/// Resume position carried between chunks and persisted in a checkpoint.
#[derive(Debug, Clone)]
pub struct ResumePosition {
    pub last_key: String,
    pub last_date: String,
}

/// Copy up to `batch_size` rows of `partition_name` from `source` to
/// `target`, ordered by `(key_column, date_column)`, optionally resuming
/// after a previous position. Returns the rows/bytes moved and the new
/// resume position (`None` when the chunk was empty, meaning the partition
/// is fully migrated).
pub async fn copy_chunk(
    source: &Arc<Client>,
    target: &Client,
    table_type: &TableTypeConfig,
    partition_name: &str,
    resume: Option<&ResumePosition>,
    batch_size: u32,
    queue_depth: usize,
) -> MigrateResult<ChunkProgress> {
    let select_sql = build_copy_out_sql(table_type, partition_name, resume, batch_size);
    let insert_sql = build_copy_in_sql(table_type, partition_name);

    let (tx, mut rx) = mpsc::channel::<Result<Bytes, MigrateError>>(queue_depth.max(1));

    let producer_source = Arc::clone(source);
    let producer = tokio::spawn(async move {
        let stream = match producer_source.copy_out(&select_sql).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = tx.send(Err(MigrateError::from_db_error(e))).await;
                return;
            }
        };
        futures_util::pin_mut!(stream);
        while let Some(item) = stream.next().await {
            match item {
                Ok(bytes) => {
                    if tx.send(Ok(bytes)).await.is_err() {
                        // consumer already gave up; nothing left to do
                        return;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(MigrateError::from_db_error(e))).await;
                    return;
                }
            }
        }
        // tx dropped here: EOF sentinel for the consumer's recv loop
    });

    let sink = target.copy_in::<_, Bytes>(&insert_sql).await.map_err(MigrateError::from_db_error)?;
    futures_util::pin_mut!(sink);

    let mut tracker = LineTracker::new();
    let mut failure: Option<MigrateError> = None;

    while let Some(item) = rx.recv().await {
        match item {
            Ok(bytes) => {
                tracker.feed(&bytes);
                if let Err(e) = sink.send(bytes).await {
                    failure = Some(MigrateError::from_db_error(e));
                    break;
                }
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    // Always join the producer task: on the happy path it's already done by
    // the time rx.recv() returns None, on the error path this drops its
    // sender side (if still held) and reclaims the task.
    let _ = producer.await;

    if let Some(err) = failure {
        let _ = sink.close().await;
        return Err(err);
    }

    tracker.finish();
    sink.close().await.map_err(MigrateError::from_db_error)?;

    let progress = tracker.into_progress();
    if progress.rows == 0 {
        return Ok(progress);
    }
    Ok(progress)
}

/// Parse a complete in-memory CSV payload the way [`copy_chunk`] parses its
/// streamed frames, in one call. Exists so the line-tracking hot path can be
/// benchmarked without a live connection.
pub fn parse_copy_bytes(data: &[u8]) -> ChunkProgress {
    let mut tracker = LineTracker::new();
    tracker.feed(data);
    tracker.finish();
    tracker.into_progress()
}

/// Project a resume position into the next [`ResumePosition`], or `None` if
/// the chunk was empty (signals the caller that the partition is done).
pub fn next_resume_position(progress: &ChunkProgress) -> Option<ResumePosition> {
    match (&progress.last_key, &progress.last_date) {
        (Some(key), Some(date)) => Some(ResumePosition { last_key: key.clone(), last_date: date.clone() }),
        _ => None,
    }
}

fn build_copy_out_sql(
    table_type: &TableTypeConfig,
    partition_name: &str,
    resume: Option<&ResumePosition>,
    batch_size: u32,
) -> String {
    let projection = project_columns(table_type);
    let key_col = table_type.key_column();
    let date_col = table_type.date_column;

    let where_clause = match resume {
        Some(pos) => format!(" WHERE {}", resume_predicate(table_type, pos)),
        None => String::new(),
    };

    format!(
        "COPY (SELECT {projection} FROM {partition_name}{where_clause} ORDER BY {key_col}, {date_col} LIMIT {batch_size}) TO STDOUT WITH (FORMAT CSV, HEADER FALSE, NULL 'NULL')"
    )
}

fn build_copy_in_sql(table_type: &TableTypeConfig, partition_name: &str) -> String {
    format!(
        "COPY {partition_name} ({}) FROM STDIN WITH (FORMAT CSV, HEADER FALSE, NULL 'NULL')",
        table_type.column_list()
    )
}

/// `point_history.connection_status` is `boolean` upstream but `text` on some
/// legacy targets; project it through `COALESCE(connection_status::text,
/// 'true')` on COPY OUT so a null reads as the historical default instead of
/// `\N` landing on a target column that forbids it.
fn project_columns(table_type: &TableTypeConfig) -> String {
    table_type
        .columns
        .iter()
        .map(|&col| {
            if table_type.code == "PH" && col == "connection_status" {
                "COALESCE(connection_status::text, 'true') AS connection_status".to_string()
            } else {
                col.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `key > :last_key OR (key = :last_key AND date > :last_date)`, with the
/// key embedded as an integer literal when it parses as one (it always does
/// for these table types) and the date embedded as a bigint or a quoted
/// `timestamp` literal depending on the table's date representation.
fn resume_predicate(table_type: &TableTypeConfig, pos: &ResumePosition) -> String {
    let key_col = table_type.key_column();
    let date_col = table_type.date_column;
    let key_lit = key_literal(&pos.last_key);
    let date_lit = date_literal(table_type, &pos.last_date);
    format!("({key_col} > {key_lit} OR ({key_col} = {key_lit} AND {date_col} > {date_lit}))")
}

fn key_literal(raw: &str) -> String {
    if raw.parse::<i64>().is_ok() {
        raw.to_string()
    } else {
        format!("'{}'", raw.replace('\'', "''"))
    }
}

fn date_literal(table_type: &TableTypeConfig, raw: &str) -> String {
    if table_type.date_is_timestamp {
        format!("'{}'::timestamp", raw.replace('\'', "''"))
    } else {
        raw.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_types::TableTypeRegistry;

    #[test]
    fn copy_out_without_resume_has_no_where_clause() {
        let table_type = TableTypeRegistry::by_code("PH").unwrap();
        let sql = build_copy_out_sql(table_type, "point_history_240115", None, 50_000);
        assert!(sql.contains("FROM point_history_240115 ORDER BY path_id, issued_date LIMIT 50000"));
        assert!(!sql.contains("WHERE"));
    }

    #[test]
    fn copy_out_projects_connection_status_only_for_point_history() {
        let ph = TableTypeRegistry::by_code("PH").unwrap();
        let sql = build_copy_out_sql(ph, "point_history_240115", None, 1000);
        assert!(sql.contains("COALESCE(connection_status::text, 'true') AS connection_status"));

        let th = TableTypeRegistry::by_code("TH").unwrap();
        let sql = build_copy_out_sql(th, "trend_history_240115", None, 1000);
        assert!(!sql.contains("COALESCE"));
    }

    #[test]
    fn resume_predicate_uses_bigint_literal_for_integer_date_columns() {
        let table_type = TableTypeRegistry::by_code("TH").unwrap();
        let pos = ResumePosition { last_key: "42".to_string(), last_date: "1700000000000".to_string() };
        let pred = resume_predicate(table_type, &pos);
        assert_eq!(
            pred,
            "(path_id > 42 OR (path_id = 42 AND issued_date > 1700000000000))"
        );
    }

    #[test]
    fn resume_predicate_uses_timestamp_literal_for_energy_display() {
        let table_type = TableTypeRegistry::by_code("ED").unwrap();
        let pos = ResumePosition { last_key: "7".to_string(), last_date: "2024-01-15 10:00:00".to_string() };
        let pred = resume_predicate(table_type, &pos);
        assert_eq!(
            pred,
            "(sensor_id > 7 OR (sensor_id = 7 AND issued_date > '2024-01-15 10:00:00'::timestamp))"
        );
    }

    #[test]
    fn key_literal_quotes_non_numeric_keys() {
        assert_eq!(key_literal("42"), "42");
        assert_eq!(key_literal("o'brien"), "'o''brien'");
    }

    #[test]
    fn next_resume_position_is_none_for_an_empty_chunk() {
        let progress = ChunkProgress::default();
        assert!(next_resume_position(&progress).is_none());
    }

    #[test]
    fn next_resume_position_carries_forward_the_last_row() {
        let progress = ChunkProgress { rows: 3, bytes: 120, last_key: Some("9".into()), last_date: Some("1700000000000".into()) };
        let pos = next_resume_position(&progress).unwrap();
        assert_eq!(pos.last_key, "9");
        assert_eq!(pos.last_date, "1700000000000");
    }
}
