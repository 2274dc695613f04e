//! Command-line interface for Steward.

pub mod commands;
pub mod id_resolver;
pub mod output;
pub mod progress;
pub mod runtime;
pub mod types;

pub use types::{Cli, Commands};

use anyhow::Result;
use console::style;

use crate::domain::models::Config;

/// Run a parsed command against a loaded configuration.
pub async fn dispatch(command: Commands, config: &Config, json: bool) -> Result<()> {
    match command {
        Commands::Init(args) => commands::init::execute(args, json).await,
        Commands::Run(args) => commands::run::execute(args, config, json).await,
        Commands::Status { id } => commands::task::handle_status(config, &id, json).await,
        Commands::List { status, limit } => {
            commands::task::handle_list(config, status.as_deref(), limit, json).await
        }
        Commands::Resume(args) => commands::resume::execute(args, config, json).await,
        Commands::Result { id } => commands::task::handle_result(config, &id, json).await,
        Commands::Delete { id } => commands::task::handle_delete(config, &id, json).await,
    }
}

/// Print an error the way the current output mode expects and exit non-zero.
pub fn handle_error(err: &anyhow::Error, json: bool) -> ! {
    if json {
        let causes: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        let body = serde_json::json!({
            "success": false,
            "error": err.to_string(),
            "causes": causes,
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("{} {err}", style("Error:").red().bold());
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
    }
    std::process::exit(1)
}
