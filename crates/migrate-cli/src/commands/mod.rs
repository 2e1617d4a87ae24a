//! One driver module per subcommand, wiring `migrate_core` to the terminal.

mod inspect;
mod resume;
mod run;
mod status;

pub use inspect::run as inspect;
pub use resume::run as resume;
pub use run::run;
pub use status::run as status;

use migrate_core::events::{ConnectionRole, Event, LogLevel, PerformanceSnapshot, Progress};

/// Render one event as a single line of human-readable output. Shared by the
/// `run` and `resume` drivers, which both stream a job's events to stdout.
fn render_event(event: Event) {
    match event {
        Event::Log { level, message } => println!("[{}] {message}", level_label(level)),
        Event::Progress(progress) => println!("{}", format_progress(&progress)),
        Event::Performance(snapshot) => println!("{}", format_performance(&snapshot)),
        Event::ConnectionStatus { db, ok, message } => {
            let role = match db {
                ConnectionRole::Source => "source",
                ConnectionRole::Target => "target",
            };
            let status = if ok { "ok" } else { "failed" };
            println!("[connection] {role}: {status} ({message})");
        }
        Event::TruncateRequested { partition, existing_rows, reply } => {
            let proceed = prompt_truncate_confirmation(&partition, existing_rows);
            let _ = reply.send(proceed);
        }
        Event::Finished => println!("[done] job finished"),
        Event::Error { message } => eprintln!("[error] {message}"),
    }
}

/// Ask on stdin/stdout whether to truncate `partition`'s `existing_rows`
/// rows. A non-interactive terminal (no stdin to read a line from) answers
/// `false`, the same safe-refusal default `ensure_partition_ready` itself
/// fell back to before this event/reply wiring existed.
fn prompt_truncate_confirmation(partition: &str, existing_rows: i64) -> bool {
    use std::io::Write;

    print!("[truncate] {partition} has {existing_rows} existing row(s); truncate and continue? [y/N] ");
    if std::io::stdout().flush().is_err() {
        return false;
    }

    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}

fn level_label(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Success => "success",
        LogLevel::Warning => "warn",
        LogLevel::Error => "error",
        LogLevel::Critical => "critical",
    }
}

fn format_progress(progress: &Progress) -> String {
    let partition = progress.current_partition.as_deref().unwrap_or("-");
    format!(
        "[progress] {:.1}% total, {:.1}% partition ({}/{}) current={partition} rows={} speed={:.0} rows/s",
        progress.total_progress * 100.0,
        progress.partition_progress * 100.0,
        progress.completed_partitions,
        progress.total_partitions,
        progress.current_rows,
        progress.speed,
    )
}

fn format_performance(snapshot: &PerformanceSnapshot) -> String {
    format!(
        "[performance] {:.0} rows/s ({:.1} MB/s), avg {:.0} rows/s, eta {:.0}s, {} rows / {:.1} MB total",
        snapshot.instant_rows_per_sec,
        snapshot.instant_mb_per_sec,
        snapshot.avg_rows_per_sec,
        snapshot.eta_seconds,
        snapshot.total_rows,
        snapshot.total_mb,
    )
}
