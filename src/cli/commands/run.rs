//! Implementation of the `steward run` command.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::commands::task::TaskDetailOutput;
use crate::cli::output::output;
use crate::cli::progress::{parse_object, report, spinner};
use crate::cli::runtime::Runtime;
use crate::domain::models::Config;
use crate::services::TaskSubscription;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// What you want done
    pub goal: String,

    /// Playbook describing the outcome and the plan
    #[arg(short, long)]
    pub playbook: PathBuf,

    /// User the task belongs to
    #[arg(short, long, default_value = "cli")]
    pub user: String,

    /// Initial task context as a JSON object
    #[arg(short, long)]
    pub context: Option<String>,
}

pub async fn execute(args: RunArgs, config: &Config, json_mode: bool) -> Result<()> {
    let context = parse_object(args.context.as_deref(), "--context")?;
    let runtime = Runtime::open(config, &args.playbook).await?;
    let orchestrator = Arc::clone(runtime.orchestrator());

    // Subscribe first so no event of the new task is missed.
    let receiver = orchestrator.events().subscribe();
    let task_id = orchestrator.create_task(&args.user, &args.goal, context).await?;

    let pb = spinner(json_mode);
    pb.set_message(format!("task {task_id} queued"));
    let settled = runtime
        .wait_for_settlement(TaskSubscription::new(task_id, receiver), |event| report(&pb, event))
        .await;
    pb.finish_and_clear();
    let task = settled?;

    let circuits = orchestrator.circuit_status().await;
    drop(orchestrator);
    runtime.shutdown().await;

    output(&TaskDetailOutput::from(&task).with_circuits(circuits), json_mode);
    Ok(())
}
