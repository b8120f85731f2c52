//! wiki-backup
//!
//! Runs one backup cycle per invocation: delete expired local archives,
//! create a fresh encrypted archive, upload recent archives with rclone and
//! verify what arrived. Meant to be started by cron or a systemd timer.

use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::Parser;
use common::cli::{CommonArgs, CommonCommands, utils};
use common::config::Configuration;
use lifecycle::{ArtifactStore, Orchestrator, RunLog};

#[derive(Parser, Debug)]
#[command(
    name = "wiki-backup",
    author,
    version,
    about = "Encrypted wiki backups with local retention and off-site upload",
    long_about = None
)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<CommonCommands>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    utils::init_logging(&cli.common);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = utils::load_config(cli.common.config.as_ref())?;
    if cli.common.quiet {
        config.log.echo_stdout = false;
    }

    let command = cli.command.unwrap_or_default();
    if utils::handle_common_command(&command, &config)? {
        return Ok(ExitCode::SUCCESS);
    }

    match command {
        CommonCommands::List { json } => {
            list_archives(&config, json).await?;
            Ok(ExitCode::SUCCESS)
        }
        _ => backup_run(&config).await,
    }
}

async fn backup_run(config: &Configuration) -> Result<ExitCode> {
    let mut run_log = RunLog::from_config(&config.log)?;

    let report = match Orchestrator::from_config(config) {
        Ok(orchestrator) => orchestrator.run(&mut run_log).await,
        Err(e) => Orchestrator::record_startup_failure(&mut run_log, e),
    };

    log::debug!("Run finished after phases {:?}", report.phases);
    Ok(ExitCode::from(report.exit_code()))
}

async fn list_archives(config: &Configuration, json: bool) -> Result<()> {
    let store = ArtifactStore::from_config(&config.storage);
    let artifacts = store
        .scan()
        .await
        .context("Failed to list backup archives")?;

    if json {
        let json = serde_json::to_string_pretty(&artifacts)
            .context("Failed to serialize backup archives to JSON")?;
        println!("{json}");
        return Ok(());
    }

    if artifacts.is_empty() {
        println!("No backup archives in {}", store.dir().display());
        return Ok(());
    }

    let now = Utc::now();
    println!("Backup archives in {}:", store.dir().display());
    for artifact in &artifacts {
        println!(
            "  {}  {:>12} bytes  {}  ({} days old)",
            artifact.file_name,
            artifact.size_bytes,
            artifact
                .modified
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S"),
            artifact.age_in_days(now)
        );
    }
    Ok(())
}
