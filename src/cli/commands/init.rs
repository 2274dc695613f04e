//! Implementation of the `steward init` command.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tokio::fs;

use crate::adapters::sqlite::initialize_database;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Config, DatabaseConfig};
use crate::infrastructure::config::loader::PROJECT_DIR;

const EXAMPLE_PLAYBOOK: &str = include_str!("../../../demos/playbooks/tokyo_trip.yaml");

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force reinitialization even if already initialized
    #[arg(long, short)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub message: String,
    pub initialized_path: PathBuf,
    pub directories_created: Vec<String>,
    pub database_initialized: bool,
    pub files_written: Vec<String>,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![self.message.clone()];
        if !self.directories_created.is_empty() {
            lines.push("\nCreated directories:".to_string());
            for dir in &self.directories_created {
                lines.push(format!("  - {dir}"));
            }
        }
        if !self.files_written.is_empty() {
            lines.push("\nWrote files:".to_string());
            for file in &self.files_written {
                lines.push(format!("  - {file}"));
            }
        }
        if self.database_initialized {
            lines.push(format!("\nDatabase initialized at {PROJECT_DIR}/steward.db"));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: InitArgs, json_mode: bool) -> Result<()> {
    let target_path = if args.path.is_absolute() {
        args.path.clone()
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(&args.path)
    };

    let project_dir = target_path.join(PROJECT_DIR);

    if project_dir.exists() && !args.force {
        let output_data = InitOutput {
            success: false,
            message: "Project already initialized. Use --force to reinitialize.".to_string(),
            initialized_path: target_path,
            directories_created: vec![],
            database_initialized: false,
            files_written: vec![],
        };
        output(&output_data, json_mode);
        return Ok(());
    }

    if args.force && project_dir.exists() {
        fs::remove_dir_all(&project_dir)
            .await
            .with_context(|| format!("Failed to remove existing {PROJECT_DIR} directory"))?;
    }

    let relative = |path: &std::path::Path| {
        path.strip_prefix(&target_path)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    };

    let mut directories_created = vec![];
    for dir in [
        project_dir.clone(),
        project_dir.join("logs"),
        project_dir.join("playbooks"),
    ] {
        if !dir.exists() {
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            directories_created.push(relative(&dir));
        }
    }

    let mut files_written = vec![];

    let config_path = project_dir.join("config.yaml");
    let config_yaml = serde_yaml::to_string(&Config::default()).context("Failed to render default config")?;
    fs::write(&config_path, config_yaml)
        .await
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    files_written.push(relative(&config_path));

    let playbook_path = project_dir.join("playbooks").join("tokyo_trip.yaml");
    fs::write(&playbook_path, EXAMPLE_PLAYBOOK)
        .await
        .with_context(|| format!("Failed to write {}", playbook_path.display()))?;
    files_written.push(relative(&playbook_path));

    let database = DatabaseConfig {
        path: project_dir.join("steward.db").to_string_lossy().to_string(),
        ..DatabaseConfig::default()
    };
    let pool = initialize_database(&database)
        .await
        .context("Failed to initialize database")?;
    pool.close().await;

    let output_data = InitOutput {
        success: true,
        message: if args.force {
            "Project reinitialized successfully.".to_string()
        } else {
            "Project initialized successfully.".to_string()
        },
        initialized_path: target_path,
        directories_created,
        database_initialized: true,
        files_written,
    };

    output(&output_data, json_mode);
    Ok(())
}
