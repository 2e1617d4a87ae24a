use crate::cli::RunArgs;
use crate::config;
use anyhow::{Context, Result};
use migrate_core::{Orchestrator, Store};

pub async fn run(args: RunArgs) -> Result<()> {
    let app = config::load(&args.config)?;
    let start = config::parse_date(&args.start)?;
    let end = config::parse_date(&args.end)?;
    let profile_id = app.profile_id.clone().unwrap_or_else(|| "default".to_string());
    let job = config::build_job_config(&app, profile_id, start, end, args.tables)?;

    let store = Store::open(&app.store_path).with_context(|| format!("opening store at {}", app.store_path))?;
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
            println!("migration completed: history id {history_id}");
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!(e)),
    }
}
