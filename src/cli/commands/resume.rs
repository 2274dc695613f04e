//! Implementation of the `steward resume` command.

use anyhow::{bail, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::commands::task::TaskDetailOutput;
use crate::cli::id_resolver::resolve_task_id;
use crate::cli::output::output;
use crate::cli::progress::{parse_response, report, spinner};
use crate::cli::runtime::Runtime;
use crate::domain::models::Config;
use crate::services::TaskSubscription;

#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Task ID or unique prefix
    pub id: String,

    /// The answer as JSON, e.g. '{"approved": true}'. Plain text answers a clarification.
    #[arg(short, long)]
    pub response: String,

    /// Playbook the task was started with
    #[arg(short, long)]
    pub playbook: PathBuf,
}

pub async fn execute(args: ResumeArgs, config: &Config, json_mode: bool) -> Result<()> {
    let runtime = Runtime::open(config, &args.playbook).await?;
    let task_id = resolve_task_id(runtime.pool(), &args.id).await?;
    let orchestrator = Arc::clone(runtime.orchestrator());

    let subscription = TaskSubscription::new(task_id, orchestrator.events().subscribe());
    let reply = orchestrator.resume(task_id, parse_response(&args.response)).await?;

    let task = if reply.success {
        let pb = spinner(json_mode);
        pb.set_message(format!("task {task_id} resumed"));
        let settled = runtime
            .wait_for_settlement(subscription, |event| report(&pb, event))
            .await;
        pb.finish_and_clear();
        settled?
    } else {
        let error = reply.error.unwrap_or_else(|| "Resume rejected".to_string());
        match orchestrator.get_status(task_id).await? {
            // A decline fails the task; every other rejection leaves it untouched.
            Some(task) if matches!(error.as_str(), "Payment declined" | "Approval denied") => {
                tracing::info!(task_id = %task_id, %error, "resume settled the task");
                task
            }
            _ => bail!("{error}"),
        }
    };

    let circuits = orchestrator.circuit_status().await;
    drop(orchestrator);
    runtime.shutdown().await;

    output(&TaskDetailOutput::from(&task).with_circuits(circuits), json_mode);
    Ok(())
}
