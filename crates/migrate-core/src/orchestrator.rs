//! Per-job driving loop: connect both sides, probe COPY privileges,
//! discover partitions, then migrate each one while persisting checkpoint
//! progress and forwarding `Event`s. Grounded in
//! `original_source/copy_migration_worker.py::run`'s connect → probe →
//! iterate → finalize shape, generalized from a caller-supplied partition
//! list to discovery-driven iteration.

use crate::config::{ConnectionConfig, ErrorStrategy, MigrationJobConfig, TransferMode};
use crate::connection::{self, OptimizedConnection, Role};
use crate::copy_engine::{self, insert_fallback, ResumePosition};
use crate::discovery::{self, PartitionInfo};
use crate::error::{MigrateError, MigrateResult};
use crate::events::{mask, ConnectionRole, Event, LogLevel};
use crate::metrics::PerformanceMetrics;
use crate::store::{
    Checkpoint, CheckpointStatus, CheckpointUpdate, CopyMethod, HistoryStatus, HistoryUpdate,
    NewCheckpoint, NewMigrationHistory, Store,
};
use crate::table_types::TableTypeRegistry;
use crate::version::PgFamily;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tokio_postgres::Client;

/// Shared pause/stop flags for a running job. Cheap to clone; a CLI or GUI
/// binding keeps one of these around to steer a job running on another task.
#[derive(Clone)]
pub struct JobControl {
    paused: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl JobControl {
    fn new() -> Self {
        Self { paused: Arc::new(AtomicBool::new(false)), stopped: Arc::new(AtomicBool::new(false)), notify: Arc::new(Notify::new()) }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Checked once per chunk, between partitions too: blocks in 100ms steps
    /// while paused, wakes early on `resume`/`stop`.
    async fn wait_while_paused(&self) {
        while self.is_paused() && !self.is_stopped() {
            let notified = self.notify.notified();
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }
    }
}

impl Default for JobControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives one migration job at a time over the checkpoint/history store,
/// forwarding `Event`s to whatever binding is listening.
pub struct Orchestrator {
    store: Store,
    events: mpsc::Sender<Event>,
    control: JobControl,
}

impl Orchestrator {
    /// Build an orchestrator plus the receiving end of its event channel.
    /// Capacity 64: enough to absorb a burst of log lines between a slow
    /// consumer's polls without the core ever blocking on bookkeeping.
    pub fn new(store: Store) -> (Orchestrator, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(64);
        (Orchestrator { store, events: tx, control: JobControl::new() }, rx)
    }

    pub fn control(&self) -> JobControl {
        self.control.clone()
    }

    async fn emit(&self, event: Event) {
        let _ = self.events.send(event).await;
    }

    async fn emit_log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(Event::Log { level, message: mask(&message.into()) }).await;
    }

    async fn mark_failed(&self, history_id: i64, err: MigrateError) -> MigrateError {
        let _ = self
            .store
            .history()
            .update_by_id(history_id, HistoryUpdate { status: Some(HistoryStatus::Failed), completed: true, ..Default::default() })
            .await;
        self.emit(Event::Error { message: mask(&err.to_string()) }).await;
        err
    }

    /// Run one migration job end to end: resumes the profile's most recent
    /// incomplete history if one exists, otherwise starts a new one. Returns
    /// the history id on success (including a clean user-requested stop,
    /// which surfaces as `Err(MigrateError::Cancelled)` after the history row
    /// is marked `cancelled`).
    pub async fn run_job(
        &self,
        source_config: &ConnectionConfig,
        target_config: &ConnectionConfig,
        job: &MigrationJobConfig,
    ) -> MigrateResult<i64> {
        let session_id = uuid::Uuid::new_v4();
        self.emit_log(LogLevel::Info, format!("starting migration job for profile {} (session {session_id})", job.profile_id)).await;

        let source_result = connection::open(source_config, Role::Source).await;
        let target_result = connection::open(target_config, Role::Target).await;

        let source_status = describe_connect_result(&source_result);
        let target_status = describe_connect_result(&target_result);
        self.emit(Event::ConnectionStatus { db: ConnectionRole::Source, ok: source_result.is_ok(), message: source_status.clone() }).await;
        self.emit(Event::ConnectionStatus { db: ConnectionRole::Target, ok: target_result.is_ok(), message: target_status.clone() }).await;

        let history = match self.store.history().get_incomplete_by_profile(&job.profile_id).await? {
            Some(existing) => existing,
            None => {
                self.store
                    .history()
                    .create(NewMigrationHistory {
                        profile_id: job.profile_id.clone(),
                        start_date: job.start_date.to_string(),
                        end_date: job.end_date.to_string(),
                        source_connection_status: Some(source_status.clone()),
                        target_connection_status: Some(target_status.clone()),
                    })
                    .await?
            }
        };

        let (source_conn, target_conn) = match (source_result, target_result) {
            (Ok(s), Ok(t)) => (s, t),
            _ => {
                let detail = format!("source: {source_status}; target: {target_status}");
                return Err(self.mark_failed(history.id, MigrateError::Connectivity(detail)).await);
            }
        };

        if let Err(e) = connection::probe_copy_privilege(&source_conn.client, false, &source_conn.version).await {
            return Err(self.mark_failed(history.id, e).await);
        }
        if let Err(e) = connection::probe_copy_privilege(&target_conn.client, true, &target_conn.version).await {
            return Err(self.mark_failed(history.id, e).await);
        }

        let partitions = match discovery::discover_partitions(&source_conn.client, job.start_date, job.end_date, &job.table_codes).await {
            Ok(p) => p,
            Err(e) => return Err(self.mark_failed(history.id, e).await),
        };

        let total_rows: i64 = partitions.iter().map(|p| p.row_count).sum();
        self.store.history().update_by_id(history.id, HistoryUpdate { total_rows: Some(total_rows), ..Default::default() }).await?;
        self.emit_log(LogLevel::Info, format!("discovered {} partition(s), {total_rows} row(s) estimated", partitions.len())).await;

        let mut existing_checkpoints: HashMap<String, Checkpoint> = self
            .store
            .checkpoints()
            .get_by_history(history.id)
            .await?
            .into_iter()
            .map(|c| (c.partition_name.clone(), c))
            .collect();

        let mut metrics = PerformanceMetrics::new(partitions.len() as u32);
        let mut last_emit = Instant::now() - Duration::from_secs(2);
        let source_client = Arc::new(source_conn.client);
        let target_family = target_conn.version.family;

        let mut job_failure: Option<MigrateError> = None;

        for partition in &partitions {
            if self.control.is_stopped() {
                job_failure = Some(MigrateError::Cancelled);
                break;
            }
            self.control.wait_while_paused().await;
            if self.control.is_stopped() {
                job_failure = Some(MigrateError::Cancelled);
                break;
            }

            let checkpoint = match existing_checkpoints.remove(&partition.table_name) {
                Some(cp) => cp,
                None => {
                    self.store
                        .checkpoints()
                        .create(NewCheckpoint { history_id: history.id, partition_name: partition.table_name.clone() })
                        .await?
                }
            };

            if checkpoint.status == CheckpointStatus::Completed {
                self.emit_log(LogLevel::Info, format!("skipping already completed partition {}", partition.table_name)).await;
                metrics.start_partition(partition.table_name.clone(), 0);
                metrics.complete_partition();
                continue;
            }

            let result = self
                .migrate_partition(&source_client, &target_conn.client, target_family, job, partition, &checkpoint, &mut metrics, &mut last_emit)
                .await;

            match result {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {
                    job_failure = Some(e);
                    break;
                }
                Err(e) => match job.error_strategy {
                    ErrorStrategy::StopOnError => {
                        job_failure = Some(e);
                        break;
                    }
                    ErrorStrategy::SkipPartitionOnError => {
                        self.emit_log(LogLevel::Error, format!("partition {} failed, skipping: {e}", partition.table_name)).await;
                        self.store
                            .checkpoints()
                            .update_by_id(
                                checkpoint.id,
                                CheckpointUpdate { status: Some(CheckpointStatus::Failed), error_message: Some(e.to_string()), ..Default::default() },
                            )
                            .await?;
                    }
                },
            }

            self.store
                .history()
                .update_by_id(history.id, HistoryUpdate { processed_rows: Some(metrics.total_rows() as i64), ..Default::default() })
                .await?;
        }

        let final_status = match &job_failure {
            None => HistoryStatus::Completed,
            Some(e) if e.is_cancelled() => HistoryStatus::Cancelled,
            Some(_) => HistoryStatus::Failed,
        };
        self.store
            .history()
            .update_by_id(
                history.id,
                HistoryUpdate { status: Some(final_status), processed_rows: Some(metrics.total_rows() as i64), completed: true, ..Default::default() },
            )
            .await?;
        self.emit(Event::Finished).await;

        if let Some(err) = job_failure {
            return Err(err);
        }
        Ok(history.id)
    }

    /// Migrate a single partition: make the target side ready, then move
    /// chunks (COPY or legacy INSERT, per `job.transfer_mode`) until the
    /// source side reports no more rows.
    #[allow(clippy::too_many_arguments)]
    async fn migrate_partition(
        &self,
        source_client: &Arc<Client>,
        target_client: &Client,
        target_family: PgFamily,
        job: &MigrationJobConfig,
        partition: &PartitionInfo,
        checkpoint: &Checkpoint,
        metrics: &mut PerformanceMetrics,
        last_emit: &mut Instant,
    ) -> MigrateResult<()> {
        let table_type = TableTypeRegistry::by_code(&partition.table_type_code)?;

        match crate::table_creator::ensure_partition_ready(source_client, target_client, &partition.table_name, target_family, job.truncate_mode)
            .await?
        {
            crate::table_creator::PartitionReadiness::Ready => {}
            crate::table_creator::PartitionReadiness::AwaitingTruncateConfirmation { existing_rows } => {
                let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
                self.emit(Event::TruncateRequested { partition: partition.table_name.clone(), existing_rows, reply: reply_tx }).await;
                let proceed = reply_rx.await.unwrap_or(false);
                if !proceed {
                    return Err(MigrateError::Cancelled);
                }
                crate::table_creator::truncate_existing(target_client, &partition.table_name).await?;
            }
        }

        metrics.start_partition(partition.table_name.clone(), partition.row_count.max(0) as u64);

        let copy_method = match job.transfer_mode {
            TransferMode::Copy => CopyMethod::Copy,
            TransferMode::Insert => CopyMethod::Insert,
        };
        self.store
            .checkpoints()
            .update_by_id(checkpoint.id, CheckpointUpdate { status: Some(CheckpointStatus::Running), copy_method: Some(copy_method), ..Default::default() })
            .await?;

        let mut rows_processed = checkpoint.rows_processed;
        let mut bytes_transferred = checkpoint.bytes_transferred;
        let mut resume = checkpoint.resume_key().map(|(last_key, last_date)| ResumePosition { last_key, last_date });
        let mut insert_batch_size = insert_fallback::AdaptiveBatchSize::new(job.batch_size, 1_000, 500_000);

        loop {
            self.control.wait_while_paused().await;
            if self.control.is_stopped() {
                return Err(MigrateError::Cancelled);
            }

            match job.transfer_mode {
                TransferMode::Copy => {
                    let progress = copy_engine::copy_chunk(
                        source_client,
                        target_client,
                        table_type,
                        &partition.table_name,
                        resume.as_ref(),
                        job.batch_size,
                        job.max_queue_size,
                    )
                    .await?;
                    if progress.rows == 0 {
                        break;
                    }
                    rows_processed += progress.rows as i64;
                    bytes_transferred += progress.bytes as i64;
                    metrics.update(progress.rows, progress.bytes);
                    resume = copy_engine::next_resume_position(&progress);

                    self.store
                        .checkpoints()
                        .update_by_id(
                            checkpoint.id,
                            CheckpointUpdate {
                                rows_processed: Some(rows_processed),
                                bytes_transferred: Some(bytes_transferred),
                                last_key: resume.as_ref().map(|r| r.last_key.clone()),
                                last_date: resume.as_ref().map(|r| r.last_date.clone()),
                                ..Default::default()
                            },
                        )
                        .await?;
                }
                TransferMode::Insert => {
                    let moved = loop {
                        match insert_fallback::insert_batch(
                            source_client,
                            target_client,
                            table_type,
                            &partition.table_name,
                            rows_processed,
                            insert_batch_size.current(),
                        )
                        .await
                        {
                            Ok(moved) => break moved,
                            Err(e) if insert_fallback::is_resource_exhaustion(&e) => {
                                insert_batch_size.shrink();
                                self.emit_log(
                                    LogLevel::Warning,
                                    format!(
                                        "insert batch on {} hit resource exhaustion, retrying at batch size {}",
                                        partition.table_name,
                                        insert_batch_size.current()
                                    ),
                                )
                                .await;
                            }
                            Err(e) => return Err(e),
                        }
                    };
                    if moved == 0 {
                        break;
                    }
                    insert_batch_size.grow();
                    rows_processed += moved as i64;
                    metrics.update(moved, 0);

                    self.store
                        .checkpoints()
                        .update_by_id(checkpoint.id, CheckpointUpdate { rows_processed: Some(rows_processed), ..Default::default() })
                        .await?;
                }
            }

            self.maybe_emit_progress(metrics, last_emit).await;
        }

        self.store
            .checkpoints()
            .update_by_id(checkpoint.id, CheckpointUpdate { status: Some(CheckpointStatus::Completed), ..Default::default() })
            .await?;
        metrics.complete_partition();
        Ok(())
    }

    /// Forward progress/performance snapshots at most once per second — the
    /// same rate the legacy tool's own UI-facing worker throttled itself to,
    /// since nothing downstream needs finer-grained updates than a human can
    /// read.
    async fn maybe_emit_progress(&self, metrics: &PerformanceMetrics, last_emit: &mut Instant) {
        if last_emit.elapsed() < Duration::from_secs(1) {
            return;
        }
        *last_emit = Instant::now();
        self.emit(Event::Progress(metrics.progress())).await;
        self.emit(Event::Performance(metrics.snapshot())).await;
    }
}

fn describe_connect_result(result: &MigrateResult<OptimizedConnection>) -> String {
    match result {
        Ok(conn) => format!("ok: {}", conn.version),
        Err(e) => format!("failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_control_starts_neither_paused_nor_stopped() {
        let control = JobControl::new();
        assert!(!control.is_paused());
        assert!(!control.is_stopped());
    }

    #[test]
    fn pause_then_resume_clears_the_flag() {
        let control = JobControl::new();
        control.pause();
        assert!(control.is_paused());
        control.resume();
        assert!(!control.is_paused());
    }

    #[test]
    fn stop_is_observable_independent_of_pause() {
        let control = JobControl::new();
        control.stop();
        assert!(control.is_stopped());
        assert!(!control.is_paused());
    }

    #[tokio::test]
    async fn wait_while_paused_returns_immediately_when_not_paused() {
        let control = JobControl::new();
        tokio::time::timeout(Duration::from_millis(50), control.wait_while_paused()).await.expect("should not block");
    }

    #[tokio::test]
    async fn wait_while_paused_unblocks_on_resume() {
        let control = JobControl::new();
        control.pause();
        let waiter = control.clone();
        let handle = tokio::spawn(async move { waiter.wait_while_paused().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        control.resume();
        tokio::time::timeout(Duration::from_millis(500), handle).await.expect("resume should unblock the waiter").unwrap();
    }
}
