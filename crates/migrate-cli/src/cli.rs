//! Hand-rolled argument parsing: a small manual tokenizer over
//! `std::env::args()` feeding per-subcommand arg structs, no external
//! CLI-parsing crate.

use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelpTopic {
    Root,
    Run,
    Resume,
    Status,
    Inspect,
}

#[derive(Debug, Clone)]
pub enum Command {
    Help(HelpTopic),
    Run(RunArgs),
    Resume(ResumeArgs),
    Status(StatusArgs),
    Inspect(InspectArgs),
}

#[derive(Debug, Clone)]
pub struct RunArgs {
    pub config: PathBuf,
    pub start: String,
    pub end: String,
    pub tables: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ResumeArgs {
    pub config: PathBuf,
    pub history_id: i64,
}

#[derive(Debug, Clone)]
pub struct StatusArgs {
    pub config: PathBuf,
    pub history_id: i64,
}

#[derive(Debug, Clone)]
pub struct InspectArgs {
    pub config: PathBuf,
    pub partition: String,
}

pub fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    let mut it = args.iter().skip(1);
    let Some(first) = it.next() else {
        return Ok(Command::Help(HelpTopic::Root));
    };

    match first.as_str() {
        "-h" | "--help" => Ok(Command::Help(HelpTopic::Root)),
        "run" => parse_run(it.map(|s| s.as_str())),
        "resume" => parse_resume(it.map(|s| s.as_str())),
        "status" => parse_status(it.map(|s| s.as_str())),
        "inspect" => parse_inspect(it.map(|s| s.as_str())),
        other => anyhow::bail!("unknown command: {other}"),
    }
}

fn split_csv(v: &str) -> Vec<String> {
    v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

fn parse_run<'a>(mut it: impl Iterator<Item = &'a str>) -> anyhow::Result<Command> {
    let mut config = PathBuf::from("pg-migrate.toml");
    let mut start: Option<String> = None;
    let mut end: Option<String> = None;
    let mut tables: Option<Vec<String>> = None;

    while let Some(token) = it.next() {
        match token {
            "-h" | "--help" => return Ok(Command::Help(HelpTopic::Run)),
            "--config" => config = PathBuf::from(require_value(&mut it, "--config")?),
            _ if token.starts_with("--config=") => config = PathBuf::from(token.trim_start_matches("--config=")),
            "--start" => start = Some(require_value(&mut it, "--start")?.to_string()),
            _ if token.starts_with("--start=") => start = Some(token.trim_start_matches("--start=").to_string()),
            "--end" => end = Some(require_value(&mut it, "--end")?.to_string()),
            _ if token.starts_with("--end=") => end = Some(token.trim_start_matches("--end=").to_string()),
            "--tables" => tables = Some(split_csv(require_value(&mut it, "--tables")?)),
            _ if token.starts_with("--tables=") => tables = Some(split_csv(token.trim_start_matches("--tables="))),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    let start = start.ok_or_else(|| anyhow::anyhow!("--start is required"))?;
    let end = end.ok_or_else(|| anyhow::anyhow!("--end is required"))?;
    let tables = tables.filter(|t| !t.is_empty()).ok_or_else(|| anyhow::anyhow!("--tables is required"))?;

    Ok(Command::Run(RunArgs { config, start, end, tables }))
}

fn parse_resume<'a>(mut it: impl Iterator<Item = &'a str>) -> anyhow::Result<Command> {
    let mut config = PathBuf::from("pg-migrate.toml");
    let mut history_id: Option<i64> = None;

    while let Some(token) = it.next() {
        match token {
            "-h" | "--help" => return Ok(Command::Help(HelpTopic::Resume)),
            "--config" => config = PathBuf::from(require_value(&mut it, "--config")?),
            _ if token.starts_with("--config=") => config = PathBuf::from(token.trim_start_matches("--config=")),
            "--history-id" => history_id = Some(parse_i64(require_value(&mut it, "--history-id")?)?),
            _ if token.starts_with("--history-id=") => history_id = Some(parse_i64(token.trim_start_matches("--history-id="))?),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    let history_id = history_id.ok_or_else(|| anyhow::anyhow!("--history-id is required"))?;
    Ok(Command::Resume(ResumeArgs { config, history_id }))
}

fn parse_status<'a>(mut it: impl Iterator<Item = &'a str>) -> anyhow::Result<Command> {
    let mut config = PathBuf::from("pg-migrate.toml");
    let mut history_id: Option<i64> = None;

    while let Some(token) = it.next() {
        match token {
            "-h" | "--help" => return Ok(Command::Help(HelpTopic::Status)),
            "--config" => config = PathBuf::from(require_value(&mut it, "--config")?),
            _ if token.starts_with("--config=") => config = PathBuf::from(token.trim_start_matches("--config=")),
            "--history-id" => history_id = Some(parse_i64(require_value(&mut it, "--history-id")?)?),
            _ if token.starts_with("--history-id=") => history_id = Some(parse_i64(token.trim_start_matches("--history-id="))?),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    let history_id = history_id.ok_or_else(|| anyhow::anyhow!("--history-id is required"))?;
    Ok(Command::Status(StatusArgs { config, history_id }))
}

fn parse_inspect<'a>(mut it: impl Iterator<Item = &'a str>) -> anyhow::Result<Command> {
    let mut config = PathBuf::from("pg-migrate.toml");
    let mut partition: Option<String> = None;

    while let Some(token) = it.next() {
        match token {
            "-h" | "--help" => return Ok(Command::Help(HelpTopic::Inspect)),
            "--config" => config = PathBuf::from(require_value(&mut it, "--config")?),
            _ if token.starts_with("--config=") => config = PathBuf::from(token.trim_start_matches("--config=")),
            "--partition" => partition = Some(require_value(&mut it, "--partition")?.to_string()),
            _ if token.starts_with("--partition=") => partition = Some(token.trim_start_matches("--partition=").to_string()),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    let partition = partition.ok_or_else(|| anyhow::anyhow!("--partition is required"))?;
    Ok(Command::Inspect(InspectArgs { config, partition }))
}

fn require_value<'a>(it: &mut impl Iterator<Item = &'a str>, flag: &str) -> anyhow::Result<&'a str> {
    it.next().ok_or_else(|| anyhow::anyhow!("{flag} requires a value"))
}

fn parse_i64(raw: &str) -> anyhow::Result<i64> {
    raw.parse::<i64>().map_err(|_| anyhow::anyhow!("invalid integer value: {raw}"))
}

pub fn print_help(topic: HelpTopic) {
    match topic {
        HelpTopic::Root => println!(
            "\
pg-migrate - resumable, version-adaptive bulk COPY migration for partitioned historical tables

USAGE:
  pg-migrate <COMMAND> [OPTIONS]

COMMANDS:
  run           Discover partitions and migrate them
  resume        Resume the most recent incomplete job for a history id
  status        Show checkpoint status for a history id
  inspect       Print one partition's catalog info

Run `pg-migrate <command> --help` for more."
        ),
        HelpTopic::Run => println!(
            "\
USAGE:
  pg-migrate run --config <FILE> --start <DATE> --end <DATE> --tables <CSV>

OPTIONS:
  --config <FILE>     TOML config path (default: pg-migrate.toml)
  --start <DATE>      Range start, YYYY-MM-DD
  --end <DATE>        Range end, YYYY-MM-DD
  --tables <CSV>      Table type codes, e.g. PH,TH,ED,RT
  -h, --help          Print help"
        ),
        HelpTopic::Resume => println!(
            "\
USAGE:
  pg-migrate resume --config <FILE> --history-id <ID>

OPTIONS:
  --config <FILE>     TOML config path (default: pg-migrate.toml)
  --history-id <ID>   History id to resume
  -h, --help          Print help"
        ),
        HelpTopic::Status => println!(
            "\
USAGE:
  pg-migrate status --config <FILE> --history-id <ID>

OPTIONS:
  --config <FILE>     TOML config path (default: pg-migrate.toml)
  --history-id <ID>   History id to report on
  -h, --help          Print help"
        ),
        HelpTopic::Inspect => println!(
            "\
USAGE:
  pg-migrate inspect --config <FILE> --partition <NAME>

OPTIONS:
  --config <FILE>     TOML config path (default: pg-migrate.toml)
  --partition <NAME>  Partition table name, e.g. point_history_240115
  -h, --help          Print help"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_long_flags() {
        let args = vec![
            "pg-migrate".to_string(),
            "run".to_string(),
            "--config".to_string(),
            "job.toml".to_string(),
            "--start".to_string(),
            "2024-01-01".to_string(),
            "--end".to_string(),
            "2024-01-31".to_string(),
            "--tables".to_string(),
            "PH,TH".to_string(),
        ];
        let Command::Run(run) = parse_args(&args).unwrap() else { panic!("expected run") };
        assert_eq!(run.config, PathBuf::from("job.toml"));
        assert_eq!(run.start, "2024-01-01");
        assert_eq!(run.tables, vec!["PH".to_string(), "TH".to_string()]);
    }

    #[test]
    fn parse_run_with_equals_form() {
        let args = vec![
            "pg-migrate".to_string(),
            "run".to_string(),
            "--config=job.toml".to_string(),
            "--start=2024-01-01".to_string(),
            "--end=2024-01-31".to_string(),
            "--tables=PH".to_string(),
        ];
        let Command::Run(run) = parse_args(&args).unwrap() else { panic!("expected run") };
        assert_eq!(run.tables, vec!["PH".to_string()]);
    }

    #[test]
    fn run_without_required_flags_is_an_error() {
        let args = vec!["pg-migrate".to_string(), "run".to_string()];
        assert!(parse_args(&args).is_err());
    }

    #[test]
    fn parse_resume_requires_history_id() {
        let args = vec!["pg-migrate".to_string(), "resume".to_string(), "--history-id".to_string(), "42".to_string()];
        let Command::Resume(resume) = parse_args(&args).unwrap() else { panic!("expected resume") };
        assert_eq!(resume.history_id, 42);
    }

    #[test]
    fn no_arguments_prints_root_help() {
        let args = vec!["pg-migrate".to_string()];
        assert!(matches!(parse_args(&args).unwrap(), Command::Help(HelpTopic::Root)));
    }

    #[test]
    fn unknown_command_is_an_error() {
        let args = vec!["pg-migrate".to_string(), "frobnicate".to_string()];
        assert!(parse_args(&args).is_err());
    }
}
