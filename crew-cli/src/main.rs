use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "crew", about = "Run teams of Claude Code agents")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task with a team of agents
    Run(commands::run::RunArgs),
    /// List configured agents
    Agents(commands::agents::AgentsArgs),
    /// Dispatch an agent from inside a coordinator
    Dispatch(commands::dispatch::DispatchArgs),
    /// Manage configuration
    Config(commands::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await,
        Commands::Agents(args) => commands::agents::run(args),
        Commands::Dispatch(args) => commands::dispatch::run(args).await,
        Commands::Config(args) => commands::config::run(args),
    }
}
