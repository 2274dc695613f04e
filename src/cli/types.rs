//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};

use crate::cli::commands::init::InitArgs;
use crate::cli::commands::resume::ResumeArgs;
use crate::cli::commands::run::RunArgs;

#[derive(Parser, Debug)]
#[command(name = "steward")]
#[command(about = "Steward - goal-driven task orchestration", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize the .steward directory, config and database
    Init(InitArgs),

    /// Submit a goal and drive it until it completes, fails or needs input
    Run(RunArgs),

    /// Show a task's status and plan
    Status {
        /// Task ID or unique prefix
        id: String,
    },

    /// List tasks
    List {
        /// Only show tasks with this status
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum number of tasks to display
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Answer an interrupted task and continue it
    Resume(ResumeArgs),

    /// Show the result of a finished task
    Result {
        /// Task ID or unique prefix
        id: String,
    },

    /// Delete a task
    Delete {
        /// Task ID or unique prefix
        id: String,
    },
}
