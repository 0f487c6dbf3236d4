//! buildkit-state - persist BuildKit builder state across CI runs
//!
//! CLI entry point that dispatches to subcommands.

use buildkit_state::cli::{Cli, Commands, LogFormat};
use buildkit_state::config::ConfigManager;
use buildkit_state::error::StateResult;
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> StateResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    // 0 = warn (spinners only), 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("buildkit_state=warn"),
        1 => EnvFilter::new("buildkit_state=info"),
        _ => EnvFilter::new("buildkit_state=debug"),
    };
    let format = cli
        .log_format
        .unwrap_or_else(|| LogFormat::from_config(&config.general.log_format));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.without_time().init(),
    }

    debug!("Using config {}", config_manager.path().display());

    match cli.command {
        Commands::Restore(args) => buildkit_state::cli::commands::restore(args, &config).await,
        Commands::Save(args) => buildkit_state::cli::commands::save(args, &config).await,
        Commands::Probe(args) => buildkit_state::cli::commands::probe(args, &config).await,
        Commands::Config(args) => {
            buildkit_state::cli::commands::config(args, &config_manager, &config).await
        }
    }
}
