//! AgentLens CLI - command-line interface for the AgentLens observability backend
//!
//! # Usage
//!
//! ```bash
//! # Ingest a batch of events
//! agentlens events ingest events.json
//!
//! # List recent sessions
//! agentlens sessions list
//!
//! # Stream live events
//! agentlens tail
//!
//! # Show version and endpoint configuration
//! agentlens info
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod client;
mod commands;

use client::Client;
use commands::{agents, alerts, events, guardrails, info, recall, sessions, tail};

/// AgentLens - command-line client for the observability backend API.
#[derive(Parser)]
#[command(name = "agentlens", version, about = "AgentLens CLI - observability backend client")]
struct Cli {
    /// AgentLens API base URL
    #[arg(long, env = "AGENTLENS_API_URL", default_value = "http://localhost:8080", global = true)]
    api_url: String,

    /// AgentLens API key (bearer token)
    #[arg(long, env = "AGENTLENS_API_KEY", default_value = "", global = true)]
    api_key: String,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest and query events
    Events(events::EventsArgs),
    /// List sessions, view timelines
    Sessions(sessions::SessionsArgs),
    /// List and inspect agents
    Agents(agents::AgentsArgs),
    /// Semantic recall over past events/lessons
    Recall(recall::RecallArgs),
    /// Manage alert rules and history
    Alerts(alerts::AlertsArgs),
    /// Manage guardrail rules and status
    Guardrails(guardrails::GuardrailsArgs),
    /// Stream live events over SSE
    Tail(tail::TailArgs),
    /// Show CLI version and configured endpoint
    Info(info::InfoArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let client = Client::new(cli.api_url.clone(), cli.api_key);

    match cli.command {
        Commands::Events(args) => events::run(args, &client).await,
        Commands::Sessions(args) => sessions::run(args, &client).await,
        Commands::Agents(args) => agents::run(args, &client).await,
        Commands::Recall(args) => recall::run(args, &client).await,
        Commands::Alerts(args) => alerts::run(args, &client).await,
        Commands::Guardrails(args) => guardrails::run(args, &client).await,
        Commands::Tail(args) => tail::run(args, &client).await,
        Commands::Info(args) => info::run(args, &cli.api_url),
    }
}

/// Setup logging based on verbosity level
fn setup_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
}
