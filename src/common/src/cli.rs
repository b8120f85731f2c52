use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Common CLI arguments shared by every wiki-backup invocation
#[derive(Parser, Debug, Clone, Default)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Subcommands; a bare invocation performs one backup run
#[derive(Subcommand, Debug, Clone, Default)]
pub enum CommonCommands {
    /// Run cleanup, creation, upload and verification once (default behavior)
    #[default]
    Run,
    /// List local backup archives and exit
    List {
        #[arg(long, help = "Print the listing as JSON")]
        json: bool,
    },
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Default diagnostic filter derived from the CLI flags
    pub fn log_level(args: &CommonArgs) -> &'static str {
        if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Initialize diagnostic logging on stderr; `RUST_LOG` takes precedence.
    ///
    /// Stdout is reserved for run log lines and command output.
    pub fn init_logging(args: &CommonArgs) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level(args)));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                if !path.exists() {
                    anyhow::bail!("Configuration file {} does not exist", path.display());
                }
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("wiki-backup Configuration:");
            println!("==========================");
            println!("Backup directory: {}", config.storage.backup_dir.display());
            println!(
                "Artifact pattern: {}*{}",
                config.storage.artifact_prefix, config.storage.artifact_extension
            );
            println!("Run log: {}", config.log.file.display());
            println!(
                "Creator: {} {}",
                config.creator.program.display(),
                config.creator.args.join(" ")
            );
            println!("Creator timeout: {:?}", config.creator.timeout);
            println!("Remote target: {}", config.remote.target());
            println!("Remote timeout: {:?}", config.remote.timeout);
            println!("Recent window: {:?}", config.remote.recent_window);
            println!(
                "Retention: {} days{}",
                config.retention.days,
                if config.retention.dry_run {
                    " (dry run)"
                } else {
                    ""
                }
            );
            if config.lock.enabled {
                println!("Run lock: enabled");
            } else {
                println!("Run lock: disabled");
            }
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");

        config
            .validate()
            .context("Configuration validation failed")?;

        log::info!("Configuration validation passed");
        Ok(())
    }

    /// Handle commands that only need the configuration.
    ///
    /// Returns `true` when the command was handled and the process should exit.
    pub fn handle_common_command(command: &CommonCommands, config: &Configuration) -> Result<bool> {
        match command {
            CommonCommands::Config { json } => {
                display_config(config, *json)?;
                Ok(true)
            }
            CommonCommands::Validate => {
                validate_config(config)?;
                Ok(true)
            }
            CommonCommands::Version => {
                println!("{}", version_info());
                Ok(true)
            }
            CommonCommands::Run | CommonCommands::List { .. } => Ok(false),
        }
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "wiki-backup {} ({})",
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        common: CommonArgs,

        #[command(subcommand)]
        command: Option<CommonCommands>,
    }

    #[test]
    fn test_common_commands_default() {
        let default_cmd = CommonCommands::default();
        assert!(matches!(default_cmd, CommonCommands::Run));
    }

    #[test]
    fn test_bare_invocation_runs() {
        let cli = TestCli::try_parse_from(["wiki-backup"]).unwrap();
        assert!(cli.command.is_none());
        assert!(matches!(cli.command.unwrap_or_default(), CommonCommands::Run));
        assert!(cli.common.config.is_none());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            TestCli::try_parse_from(["wiki-backup", "list", "--json", "-q", "--config", "x.toml"])
                .unwrap();
        assert!(cli.common.quiet);
        assert_eq!(cli.common.config, Some(PathBuf::from("x.toml")));
        assert!(matches!(cli.command, Some(CommonCommands::List { json: true })));
    }

    #[test]
    fn test_log_level_from_flags() {
        let mut args = CommonArgs::default();
        assert_eq!(utils::log_level(&args), "info");
        args.verbose = true;
        assert_eq!(utils::log_level(&args), "debug");
        args.quiet = true;
        assert_eq!(utils::log_level(&args), "warn");
    }

    #[test]
    fn test_run_and_list_are_not_handled_here() {
        let config = Configuration::default();
        assert!(!utils::handle_common_command(&CommonCommands::Run, &config).unwrap());
        assert!(
            !utils::handle_common_command(&CommonCommands::List { json: false }, &config).unwrap()
        );
        assert!(utils::handle_common_command(&CommonCommands::Validate, &config).unwrap());
    }

    #[test]
    fn test_load_config_rejects_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(utils::load_config(Some(&missing)).is_err());
    }

    #[test]
    fn test_version_info() {
        let version = utils::version_info();
        assert!(version.contains(env!("CARGO_PKG_VERSION")));
    }
}
