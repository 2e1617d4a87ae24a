//! Thin CLI binding over `migrate-core`: argument parsing, config loading,
//! and rendering the core's events to the terminal.

mod cli;
mod commands;
mod config;

pub use cli::{parse_args, print_help, Command};

pub async fn run(args: Vec<String>) -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    match cli::parse_args(&args)? {
        Command::Help(topic) => {
            cli::print_help(topic);
            Ok(())
        }
        Command::Run(run_args) => commands::run(run_args).await,
        Command::Resume(resume_args) => commands::resume(resume_args).await,
        Command::Status(status_args) => commands::status(status_args).await,
        Command::Inspect(inspect_args) => commands::inspect(inspect_args).await,
    }
}
