//! Storyweaver CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;

use storyweaver::cli::{handle_error, Cli};
use storyweaver::domain::models::Config;
use storyweaver::infrastructure::config::ConfigLoader;
use storyweaver::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli.command, cli.config.as_deref(), cli.json).await {
        handle_error(&err, cli.json);
    }
}

async fn run(
    command: storyweaver::cli::Commands,
    config_path: Option<&std::path::Path>,
    json_mode: bool,
) -> Result<()> {
    let config: Config = match config_path {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };

    let log_config = LogConfig::try_from(&config.logging).context("Invalid logging configuration")?;
    let _logger = LoggerImpl::init(&log_config)?;

    storyweaver::cli::dispatch(command, &config, json_mode).await
}
