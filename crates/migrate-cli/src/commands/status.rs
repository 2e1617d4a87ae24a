use crate::cli::StatusArgs;
use crate::config;
use anyhow::{Context, Result};
use migrate_core::Store;

pub async fn run(args: StatusArgs) -> Result<()> {
    let app = config::load(&args.config)?;
    let store = Store::open(&app.store_path).with_context(|| format!("opening store at {}", app.store_path))?;

    let history = store
        .history()
        .get_by_id(args.history_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no history row with id {}", args.history_id))?;

    println!(
        "history {}: profile={} status={:?} range=[{}, {}] rows={}/{}",
        history.id, history.profile_id, history.status, history.start_date, history.end_date, history.processed_rows, history.total_rows
    );
    if let Some(started) = history.completed_at {
        println!("completed at {started}");
    }

    let checkpoints = store.checkpoints().get_by_history(history.id).await?;
    if checkpoints.is_empty() {
        println!("no partitions recorded yet");
        return Ok(());
    }

    println!("{:<28} {:<10} {:>12} {:>14} {:<12} {}", "partition", "status", "rows", "bytes", "method", "resume key");
    for checkpoint in checkpoints {
        let resume = checkpoint
            .resume_key()
            .map(|(key, date)| format!("{key}@{date}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<28} {:<10?} {:>12} {:>14} {:<12?} {resume}",
            checkpoint.partition_name, checkpoint.status, checkpoint.rows_processed, checkpoint.bytes_transferred, checkpoint.copy_method
        );
    }

    Ok(())
}
