//! Sessions command - list sessions and inspect timelines
//!
//! Usage:
//! ```bash
//! agentlens sessions list --agent-id agent_1
//! agentlens sessions show sess_1
//! agentlens sessions timeline sess_1
//! ```

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use serde::Deserialize;

use crate::client::Client;

#[derive(Args)]
pub struct SessionsArgs {
    #[command(subcommand)]
    command: SessionsCommand,
}

#[derive(Subcommand)]
pub enum SessionsCommand {
    List {
        #[arg(long)]
        agent_id: Option<String>,
        #[arg(long)]
        status: Option<String>,
        /// Single tag or a comma-separated set
        #[arg(long)]
        tags: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    Show {
        session_id: String,
    },
    Timeline {
        session_id: String,
    },
}

#[derive(Debug, Deserialize)]
struct TimelineResponse {
    events: Vec<serde_json::Value>,
    chain_valid: bool,
}

pub async fn run(args: SessionsArgs, client: &Client) -> Result<()> {
    match args.command {
        SessionsCommand::List { agent_id, status, tags, limit } => list(client, agent_id, status, tags, limit).await,
        SessionsCommand::Show { session_id } => show(client, &session_id).await,
        SessionsCommand::Timeline { session_id } => timeline(client, &session_id).await,
    }
}

async fn list(client: &Client, agent_id: Option<String>, status: Option<String>, tags: Option<String>, limit: u32) -> Result<()> {
    let mut query = vec![format!("limit={limit}")];
    if let Some(v) = agent_id {
        query.push(format!("agent_id={v}"));
    }
    if let Some(v) = status {
        query.push(format!("status={v}"));
    }
    if let Some(v) = tags {
        query.push(format!("tags={v}"));
    }
    let path = format!("/api/sessions?{}", query.join("&"));
    let sessions: Vec<serde_json::Value> = client.get(&path).await?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).apply_modifier(UTF8_ROUND_CORNERS).set_header(vec![
        Cell::new("Session").fg(Color::Cyan),
        Cell::new("Agent").fg(Color::Cyan),
        Cell::new("Status").fg(Color::Cyan),
        Cell::new("Events").fg(Color::Cyan),
        Cell::new("Cost ($)").fg(Color::Cyan),
    ]);
    for session in &sessions {
        table.add_row(vec![
            Cell::new(session.get("session_id").and_then(|v| v.as_str()).unwrap_or("?")),
            Cell::new(session.get("agent_id").and_then(|v| v.as_str()).unwrap_or("?")),
            Cell::new(session.get("status").and_then(|v| v.as_str()).unwrap_or("?")),
            Cell::new(session.get("event_count").and_then(|v| v.as_u64()).unwrap_or(0)),
            Cell::new(session.get("total_cost_usd").and_then(|v| v.as_f64()).unwrap_or(0.0)),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn show(client: &Client, session_id: &str) -> Result<()> {
    let session: serde_json::Value = client.get(&format!("/api/sessions/{session_id}")).await?;
    println!("{}", serde_json::to_string_pretty(&session)?);
    Ok(())
}

async fn timeline(client: &Client, session_id: &str) -> Result<()> {
    let timeline: TimelineResponse = client.get(&format!("/api/sessions/{session_id}/timeline")).await?;

    if timeline.chain_valid {
        println!("{} hash chain verified ({} events)", "✓".green().bold(), timeline.events.len());
    } else {
        println!("{} hash chain corruption detected", "✗".red().bold());
    }
    println!();

    for (i, event) in timeline.events.iter().enumerate() {
        let event_type = event.get("event_type").and_then(|v| v.as_str()).unwrap_or("?");
        let timestamp = event.get("timestamp").and_then(|v| v.as_str()).unwrap_or("?");
        println!("  {}. {} @ {}", i + 1, event_type.yellow(), timestamp.dimmed());
    }
    Ok(())
}
