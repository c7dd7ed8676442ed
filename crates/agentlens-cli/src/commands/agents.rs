//! Agents command - list and inspect agents
//!
//! Usage:
//! ```bash
//! agentlens agents list
//! agentlens agents show agent_1
//! ```

use anyhow::Result;
use clap::{Args, Subcommand};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};

use crate::client::Client;

#[derive(Args)]
pub struct AgentsArgs {
    #[command(subcommand)]
    command: AgentsCommand,
}

#[derive(Subcommand)]
pub enum AgentsCommand {
    List,
    Show { agent_id: String },
}

pub async fn run(args: AgentsArgs, client: &Client) -> Result<()> {
    match args.command {
        AgentsCommand::List => list(client).await,
        AgentsCommand::Show { agent_id } => show(client, &agent_id).await,
    }
}

async fn list(client: &Client) -> Result<()> {
    let agents: Vec<serde_json::Value> = client.get("/api/agents").await?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).apply_modifier(UTF8_ROUND_CORNERS).set_header(vec![
        Cell::new("Agent").fg(Color::Cyan),
        Cell::new("Name").fg(Color::Cyan),
        Cell::new("Sessions").fg(Color::Cyan),
        Cell::new("Paused").fg(Color::Cyan),
        Cell::new("Last seen").fg(Color::Cyan),
    ]);
    for agent in &agents {
        table.add_row(vec![
            Cell::new(agent.get("agent_id").and_then(|v| v.as_str()).unwrap_or("?")),
            Cell::new(agent.get("name").and_then(|v| v.as_str()).unwrap_or("-")),
            Cell::new(agent.get("session_count").and_then(|v| v.as_u64()).unwrap_or(0)),
            Cell::new(agent.get("paused").and_then(|v| v.as_bool()).unwrap_or(false)),
            Cell::new(agent.get("last_seen_at").and_then(|v| v.as_str()).unwrap_or("?")),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn show(client: &Client, agent_id: &str) -> Result<()> {
    let agent: serde_json::Value = client.get(&format!("/api/agents/{agent_id}")).await?;
    println!("{}", serde_json::to_string_pretty(&agent)?);
    Ok(())
}
