use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use taskforge_observability::{init_process_logging, ProcessKind};
use taskforge_orchestrator::{Config, Orchestrator};
use taskforge_types::{ErrorKind, GatePolicy, OrchestratorError, Pipeline, PipelineStatus, Priority, Task};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "taskforge")]
#[command(about = "Command-line shell for the multi-agent task orchestrator")]
struct Cli {
    #[arg(long, env = "TASKFORGE_CONFIG", default_value = "taskforge.yaml")]
    config: PathBuf,

    #[arg(long, env = "TASKFORGE_STATE_DIR")]
    state_dir: Option<PathBuf>,

    #[arg(long, env = "TASKFORGE_REPO_ROOT", default_value = ".")]
    repo_root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a task's default agent pipeline (designer -> implementer -> validator -> documenter).
    Submit {
        task_id: String,
        #[arg(long)]
        prompt: String,
    },
    /// Resume a paused or queued pipeline.
    Resume {
        pipeline_id: String,
        #[arg(long)]
        prompt: String,
    },
    /// Approve or reject a pipeline waiting at a gate.
    Approve {
        pipeline_id: String,
        #[arg(long)]
        reject: bool,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Cancel a running or paused pipeline.
    Cancel { pipeline_id: String },
    /// Print active pipelines, routing history, and budget alerts.
    Status,
    /// List tasks whose dependencies are satisfied, ordered by priority.
    Ready {
        #[arg(long)]
        priority: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(orchestrator_err) = err.downcast_ref::<OrchestratorError>() {
                eprintln!("error: {orchestrator_err}");
                return ExitCode::from(orchestrator_err.exit_code() as u8);
            }
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let state_dir = resolve_state_dir(cli.state_dir);
    let logs_dir = taskforge_observability::canonical_logs_dir_from_root(&state_dir);
    let _guard = init_process_logging(ProcessKind::Cli, &logs_dir, 14)
        .context("failed to initialize logging")?;

    let raw_config = tokio::fs::read_to_string(&cli.config)
        .await
        .with_context(|| format!("reading config file {}", cli.config.display()))?;
    let config = Config::from_yaml_str(&raw_config)?;

    info!(state_dir = %state_dir.display(), repo_root = %cli.repo_root.display(), "starting taskforge");
    let orchestrator = Orchestrator::new(config, &state_dir, &cli.repo_root).await?;

    let mut pipeline_failure: Option<OrchestratorError> = None;

    match cli.command {
        Command::Submit { task_id, prompt } => {
            let task = load_task(&orchestrator, &task_id).await?;
            let stages = orchestrator.default_agent_roster_stages(default_gate_policy);
            let pipeline = orchestrator.process_task(&task, stages, &prompt).await?;
            print_json(&pipeline)?;
            pipeline_failure = terminal_failure(&pipeline);
        }
        Command::Resume { pipeline_id, prompt } => {
            let pipeline = orchestrator.resume(&pipeline_id, &prompt).await?;
            print_json(&pipeline)?;
            pipeline_failure = terminal_failure(&pipeline);
        }
        Command::Approve { pipeline_id, reject, reason } => {
            let pipeline = orchestrator.approve(&pipeline_id, !reject, reason).await?;
            print_json(&pipeline)?;
            pipeline_failure = terminal_failure(&pipeline);
        }
        Command::Cancel { pipeline_id } => {
            // Cancellation ending in `cancelled` is the requested outcome, not a failure.
            let pipeline = orchestrator.cancel(&pipeline_id).await?;
            print_json(&pipeline)?;
        }
        Command::Status => {
            let status = orchestrator.get_status().await;
            print_status(&status);
        }
        Command::Ready { priority } => {
            let priority = priority.as_deref().map(parse_priority).transpose()?;
            let tasks = orchestrator.get_ready_tasks(priority).await;
            for task in tasks {
                println!("{}\t{:?}\t{}", task.id, task.priority, task.title);
            }
        }
    }

    orchestrator.shutdown().await?;

    if let Some(err) = pipeline_failure {
        return Err(err.into());
    }
    Ok(())
}

/// Maps a pipeline that ended `failed`/`cancelled` to the `OrchestratorError`
/// whose `exit_code()` the CLI's outcome should reflect, per the §6 exit-code
/// table. Returns `None` for any non-terminal-failure status.
fn terminal_failure(pipeline: &Pipeline) -> Option<OrchestratorError> {
    if !matches!(pipeline.status, PipelineStatus::Failed | PipelineStatus::Cancelled) {
        return None;
    }
    let Some(last_error) = &pipeline.last_error else {
        return Some(OrchestratorError::Validation(format!(
            "pipeline {} ended in {:?} with no recorded error",
            pipeline.id, pipeline.status
        )));
    };
    Some(match last_error.kind {
        ErrorKind::Config => OrchestratorError::Config(last_error.message.clone()),
        ErrorKind::BudgetExceeded => OrchestratorError::BudgetExceeded {
            cap_micros: 0,
            accumulated_micros: 0,
            estimated_micros: 0,
        },
        ErrorKind::Cancelled => OrchestratorError::Cancelled,
        ErrorKind::WorktreeFailure => OrchestratorError::WorktreeFailure(last_error.message.clone()),
        ErrorKind::StageTimeout => OrchestratorError::StageTimeout {
            stage_index: pipeline.current_stage_index,
            timeout_ms: 0,
        },
        ErrorKind::ProviderRateLimit => OrchestratorError::ProviderRateLimit {
            target: last_error.target.clone().unwrap_or_else(|| taskforge_types::Target::new("unknown", "unknown")),
            retry_after_ms: None,
        },
        ErrorKind::ProviderTransient => OrchestratorError::ProviderTransient {
            target: last_error.target.clone().unwrap_or_else(|| taskforge_types::Target::new("unknown", "unknown")),
            message: last_error.message.clone(),
        },
        ErrorKind::ProviderAuth => OrchestratorError::ProviderAuth {
            target: last_error.target.clone().unwrap_or_else(|| taskforge_types::Target::new("unknown", "unknown")),
        },
        ErrorKind::ProviderValidation => OrchestratorError::ProviderValidation {
            target: last_error.target.clone().unwrap_or_else(|| taskforge_types::Target::new("unknown", "unknown")),
            message: last_error.message.clone(),
        },
        ErrorKind::NoTarget => OrchestratorError::NoTarget,
        ErrorKind::Validation => OrchestratorError::Validation(last_error.message.clone()),
    })
}

async fn load_task(orchestrator: &Orchestrator, task_id: &str) -> anyhow::Result<Task> {
    orchestrator
        .store()
        .get_task(task_id)
        .await
        .ok_or_else(|| OrchestratorError::NotFound(task_id.to_string()))
        .map_err(anyhow::Error::from)
}

fn default_gate_policy(agent_id: &str) -> GatePolicy {
    match agent_id {
        "designer" => GatePolicy::RequireApproval,
        "validator" => GatePolicy::BestEffort,
        _ => GatePolicy::AutoAdvance,
    }
}

fn parse_priority(raw: &str) -> anyhow::Result<Priority> {
    match raw.to_ascii_lowercase().as_str() {
        "low" => Ok(Priority::Low),
        "normal" => Ok(Priority::Normal),
        "high" => Ok(Priority::High),
        "critical" => Ok(Priority::Critical),
        other => anyhow::bail!("unknown priority {other}"),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_status(status: &taskforge_orchestrator::StatusSnapshot) {
    println!("active pipelines: {}", status.active_pipeline_ids.len());
    for id in &status.active_pipeline_ids {
        println!("  {id}");
    }
    println!("daily spend (micros):");
    for (provider, cap) in &status.daily_cap_micros {
        let spent = status.daily_spend_micros.get(provider).copied().unwrap_or(0);
        println!("  {provider}: {spent}/{cap}");
    }
    if status.alerts.is_empty() {
        println!("no budget alerts");
    } else {
        for alert in &status.alerts {
            println!(
                "ALERT [{:?}] {}: {}/{} micros",
                alert.level, alert.provider, alert.spent_micros, alert.cap_micros
            );
        }
    }
    println!("recent routing decisions:");
    for decision in status.recent_decisions.iter().rev().take(10) {
        println!("  {} -> {} ({})", decision.route_context.agent_id, decision.target, decision.reason);
    }
}

fn resolve_state_dir(flag: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = flag {
        return dir;
    }
    if let Ok(dir) = std::env::var("TASKFORGE_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from(".taskforge")
}
