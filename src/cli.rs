use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};
use crate::pipeline::config::load_config;
use crate::pipeline::ledger::Stage;
use crate::pipeline::record::RecordRequest;

#[derive(Debug, Parser)]
#[command(
    name = "datapipe",
    version,
    about = "Route inbox files into research projects with an append-only provenance manifest"
)]
struct Cli {
    /// Config file (default: $DATAPIPE_CONFIG_PATH or ~/.datapipe/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print the command report as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StageArg {
    Raw,
    Clean,
}

impl From<StageArg> for Stage {
    fn from(value: StageArg) -> Self {
        match value {
            StageArg::Raw => Stage::Raw,
            StageArg::Clean => Stage::Clean,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a new project skeleton under projects_base
    InitProject {
        #[arg(long)]
        name: String,
    },
    /// Ingest specific files into a project, bypassing routing
    Add {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long)]
        project: String,
        #[arg(long, default_value = "data/raw")]
        subdir: String,
        #[arg(long, default_value = "manual")]
        source: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Ingest files using the configured routing rules
    Route {
        paths: Vec<PathBuf>,
        #[arg(long)]
        from_downloads: bool,
    },
    /// Show recent manifest entries for a project
    Status {
        #[arg(long)]
        project: String,
        #[arg(long, value_enum)]
        stage: Option<StageArg>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Follow derived_from links from a checksum back to its raw file
    Lineage {
        #[arg(long)]
        project: String,
        #[arg(long)]
        checksum: String,
    },
    /// Register an already-written clean file derived from a recorded checksum
    Record {
        path: PathBuf,
        #[arg(long)]
        project: String,
        #[arg(long, default_value = "")]
        derived_from: String,
        #[arg(long, default_value = "")]
        code_commit: String,
        #[arg(long, default_value = "manual")]
        source: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Print the most recently modified file in a project directory matching a pattern
    Latest {
        #[arg(long)]
        project: String,
        #[arg(long, default_value = "data/raw")]
        subdir: String,
        #[arg(long)]
        pattern: String,
    },
    /// Check configuration, directories and environment
    Doctor,
}

fn render(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        for line in &report.details {
            println!("{line}");
        }
        for line in &report.issues {
            eprintln!("{}: {line}", report.command);
        }
    }
    if !report.ok {
        bail!(
            "{} finished with {} issue(s)",
            report.command,
            report.issues.len()
        );
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let report = match cli.command {
        Command::Doctor => commands::doctor::run(cli.config.as_deref())?,
        command => {
            let cfg = load_config(cli.config.as_deref())?;
            match command {
                Command::InitProject { name } => commands::init_project::run(&cfg, &name)?,
                Command::Add {
                    paths,
                    project,
                    subdir,
                    source,
                    notes,
                } => commands::add::run(
                    &cfg,
                    &commands::add::AddOptions {
                        paths,
                        project,
                        subdir,
                        source,
                        notes,
                    },
                )?,
                Command::Route {
                    paths,
                    from_downloads,
                } => commands::route::run(
                    &cfg,
                    &commands::route::RouteOptions {
                        paths,
                        from_downloads,
                    },
                )?,
                Command::Status {
                    project,
                    stage,
                    limit,
                } => commands::status::run(
                    &cfg,
                    &commands::status::StatusOptions {
                        project,
                        stage: stage.map(Stage::from),
                        limit,
                    },
                )?,
                Command::Lineage { project, checksum } => {
                    commands::lineage::run(&cfg, &project, &checksum)?
                }
                Command::Record {
                    path,
                    project,
                    derived_from,
                    code_commit,
                    source,
                    notes,
                } => commands::record::run(
                    &cfg,
                    &RecordRequest {
                        project,
                        path,
                        derived_from,
                        code_commit,
                        source,
                        notes,
                    },
                )?,
                Command::Latest {
                    project,
                    subdir,
                    pattern,
                } => commands::latest::run(&cfg, &project, &subdir, &pattern)?,
                Command::Doctor => unreachable!("handled before config load"),
            }
        }
    };

    render(&report, cli.json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn add_defaults_to_raw_subdir_and_manual_source() {
        let cli = Cli::try_parse_from(["datapipe", "add", "a.csv", "--project", "demo"])
            .expect("parse");
        match cli.command {
            Command::Add { subdir, source, .. } => {
                assert_eq!(subdir, "data/raw");
                assert_eq!(source, "manual");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn add_requires_at_least_one_path() {
        assert!(Cli::try_parse_from(["datapipe", "add", "--project", "demo"]).is_err());
    }
}
