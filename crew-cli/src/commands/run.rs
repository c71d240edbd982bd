use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::{Args, ValueEnum};
use crew_core::session::format_duration;
use crew_core::{
    ClaudeLauncher, CrewEvent, DispatchMode, EventBus, MemoryEventBus, SharedRegistry,
    StreamChunk, TaskId, TaskManager, TaskRequest, TaskState,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::config::ConfigLoader;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum StrategyArg {
    /// Fixed stage order
    Pipeline,
    /// Coordinator dispatches registered agents
    Team,
    /// Coordinator may also invent roles
    Auto,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum DispatchArg {
    /// Coordinator spawns sub-agents itself
    Spawn,
    /// Coordinator calls back into crew for each sub-agent
    Remote,
}

impl From<DispatchArg> for DispatchMode {
    fn from(arg: DispatchArg) -> Self {
        match arg {
            DispatchArg::Spawn => DispatchMode::Spawn,
            DispatchArg::Remote => DispatchMode::Remote,
        }
    }
}

#[derive(Args)]
pub struct RunArgs {
    /// What the team should do
    pub task: String,

    /// Execution strategy
    #[arg(short, long, value_enum, default_value = "pipeline")]
    pub strategy: StrategyArg,

    /// Pipeline stages in order (comma separated; defaults to [pipeline] stages)
    #[arg(long, value_delimiter = ',')]
    pub stages: Vec<String>,

    /// Working directory for every agent (defaults to the current directory)
    #[arg(short = 'C', long)]
    pub dir: Option<PathBuf>,

    /// How team coordinators dispatch agents
    #[arg(long, value_enum)]
    pub dispatch: Option<DispatchArg>,

    /// Print agent text as it streams
    #[arg(long)]
    pub stream: bool,

    /// Print the final task snapshot as JSON instead of a summary
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: RunArgs) -> Result<()> {
    let config = ConfigLoader::load()?;
    let registry = config.registry()?;

    let mut orchestrator = config.orchestrator.clone();
    if let Some(mode) = args.dispatch {
        orchestrator.dispatch_mode = mode.into();
    }

    let bus = Arc::new(MemoryEventBus::new(orchestrator.event_history));
    let launcher = Arc::new(ClaudeLauncher::new(orchestrator.worker.clone()));
    let manager = TaskManager::new(
        SharedRegistry::new(registry),
        launcher,
        bus.clone(),
        orchestrator,
    );

    let mut request = match args.strategy {
        StrategyArg::Pipeline => {
            let stages = if args.stages.is_empty() {
                config.pipeline.stages.clone()
            } else {
                args.stages.clone()
            };
            TaskRequest::pipeline(args.task.as_str(), stages)
        }
        StrategyArg::Team => TaskRequest::team(args.task.as_str()),
        StrategyArg::Auto => TaskRequest::auto(args.task.as_str()),
    };
    if let Some(dir) = &args.dir {
        request = request.with_working_dir(dir);
    }

    // Subscribe before submitting so no event is missed
    let mut events = bus.stream();
    let id = manager.submit(request).await?;
    eprintln!("Task {} started", id.short());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok((_, event)) if event.task_id() == &id => {
                    if let Some(line) = format_event(&event, args.stream) {
                        eprintln!("{line}");
                    }
                    if event.is_terminal() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event stream lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = &mut ctrl_c => {
                eprintln!("Stopping task {}...", id.short());
                manager.stop(&id).await?;
                break;
            }
        }
    }

    finish(&manager, &id, args.json).await
}

async fn finish(manager: &TaskManager, id: &TaskId, json: bool) -> Result<()> {
    let snapshot = manager.wait(id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print!("{}", snapshot.summary());
    }

    match snapshot.state {
        TaskState::Completed => Ok(()),
        ref state => bail!("task {} ended {}", id.short(), state.label()),
    }
}

/// One progress line per lifecycle event; agent text only when streaming
fn format_event(event: &CrewEvent, stream: bool) -> Option<String> {
    match event {
        CrewEvent::StageStarted { stage, .. } => Some(format!("[{stage}] started")),
        CrewEvent::StageCompleted {
            stage,
            cost_usd,
            duration_ms,
            ..
        } => Some(format!(
            "[{stage}] completed (${cost_usd:.4}, {})",
            format_duration(*duration_ms)
        )),
        CrewEvent::StageFailed { stage, reason, .. } => {
            Some(format!("[{stage}] failed: {reason}"))
        }
        CrewEvent::DispatchStarted { label, .. } => Some(format!("[{label}] dispatched")),
        CrewEvent::DispatchCompleted {
            label,
            ok,
            cost_usd,
            duration_ms,
            ..
        } => Some(format!(
            "[{label}] {} (${cost_usd:.4}, {})",
            if *ok { "returned" } else { "failed" },
            format_duration(*duration_ms)
        )),
        CrewEvent::AgentOutput { stage, chunk, .. } if stream => match chunk {
            StreamChunk::TextDelta { text } if !text.trim().is_empty() => {
                Some(format!("[{stage}] {}", text.trim_end()))
            }
            StreamChunk::ToolStart { name, .. } => Some(format!("[{stage}] using {name}")),
            _ => None,
        },
        CrewEvent::TaskStopped { reason, .. } => Some(format!("Task stopped: {reason}")),
        _ => None,
    }
}
