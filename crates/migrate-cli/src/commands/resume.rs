use crate::cli::ResumeArgs;
use crate::config;
use anyhow::{Context, Result};
use migrate_core::store::CheckpointStatus;
use migrate_core::table_types::TableTypeRegistry;
use migrate_core::{Orchestrator, Store};
use std::collections::BTreeSet;

/// Resume a job by its history id: table codes are re-derived from whichever
/// partitions already have a checkpoint, and the date range comes back from
/// the stored history row, so a resume needs nothing beyond `--history-id`.
pub async fn run(args: ResumeArgs) -> Result<()> {
    let app = config::load(&args.config)?;
    let store = Store::open(&app.store_path).with_context(|| format!("opening store at {}", app.store_path))?;

    let history = store
        .history()
        .get_by_id(args.history_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no history row with id {}", args.history_id))?;

    if history.status.is_terminal() && !matches!(history.status, migrate_core::store::HistoryStatus::Failed) {
        anyhow::bail!("history {} is already {:?}, nothing to resume", history.id, history.status);
    }

    let start = config::parse_date(&history.start_date)?;
    let end = config::parse_date(&history.end_date)?;

    let checkpoints = store.checkpoints().get_by_history(history.id).await?;
    if checkpoints.is_empty() {
        anyhow::bail!("history {} has no checkpoints yet; nothing to resume from", history.id);
    }

    let mut table_codes: BTreeSet<String> = BTreeSet::new();
    for checkpoint in &checkpoints {
        if checkpoint.status != CheckpointStatus::Completed {
            table_codes.insert(TableTypeRegistry::for_partition_name(&checkpoint.partition_name)?.code.to_string());
        }
    }
    if table_codes.is_empty() {
        println!("every partition in history {} is already completed", history.id);
        return Ok(());
    }

    let job = config::build_job_config(&app, history.profile_id.clone(), start, end, table_codes.into_iter().collect())?;

    let (orchestrator, mut events) = Orchestrator::new(store);
    let control = orchestrator.control();
    let ctrlc_control = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("[signal] stop requested, finishing current chunk...");
            ctrlc_control.stop();
        }
    });

    let source = app.source.clone();
    let target = app.target.clone();
    let handle = tokio::spawn(async move { orchestrator.run_job(&source, &target, &job).await });

    while let Some(event) = events.recv().await {
        super::render_event(event);
    }

    match handle.await.context("migration job task panicked")? {
        Ok(history_id) => {
            println!("migration resumed and completed: history id {history_id}");
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!(e)),
    }
}
