//! CLI entry and dispatch.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use settle_core::config;

mod commands;

#[derive(Parser)]
#[command(name = "settle")]
#[command(version = "0.1")]
#[command(about = "Summarizes Slack threads and channel bursts once they settle")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Connect to Slack and run the bot (default)
    Run,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Dry-run channel grouping over a JSON array of Slack messages
    Preview {
        /// File holding a JSON array of messages (`channel`, `ts`, `user`, `text`, ...)
        #[arg(value_name = "EVENTS_JSON")]
        file: PathBuf,

        /// Evaluation time in Unix seconds (default: now)
        #[arg(long)]
        now: Option<f64>,

        /// Group split gap in seconds (default: grouping.time_gap_secs)
        #[arg(long)]
        gap: Option<u64>,

        /// Minimum group size (default: grouping.min_group_size)
        #[arg(long)]
        min_size: Option<usize>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
    /// Print the effective config with secrets redacted
    Show,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let config = config::Config::load().context("load config")?;
            let _telemetry = crate::telemetry::init(&config.logging);
            let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
            rt.block_on(commands::run::run(config))
        }
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
            ConfigCommands::Show => commands::config::show(),
        },
        Commands::Preview {
            file,
            now,
            gap,
            min_size,
            json,
        } => {
            let config = config::Config::load().context("load config")?;
            commands::preview::run(&commands::preview::PreviewOptions {
                file: &file,
                now,
                gap_secs: gap.unwrap_or(config.grouping.time_gap_secs),
                min_size: min_size.unwrap_or(config.grouping.min_group_size),
                json,
            })
        }
    }
}
