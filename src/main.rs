//! Steward CLI entry point.

use clap::Parser;

use steward::cli::{dispatch, handle_error, Cli, Commands};
use steward::infrastructure::config::ConfigLoader;
use steward::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // `init` runs before any project config exists.
    let config = if matches!(cli.command, Commands::Init(_)) {
        Ok(steward::Config::default())
    } else {
        ConfigLoader::load()
    };
    let config = match config {
        Ok(config) => config,
        Err(err) => handle_error(&err, cli.json),
    };

    let _logger = match LoggerImpl::init(&LogConfig::from(&config.logging)) {
        Ok(logger) => logger,
        Err(err) => handle_error(&err, cli.json),
    };

    if let Err(err) = dispatch(cli.command, &config, cli.json).await {
        handle_error(&err, cli.json);
    }
}
