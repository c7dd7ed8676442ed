//! Events command - ingest and query events
//!
//! Usage:
//! ```bash
//! agentlens events ingest events.json
//! agentlens events list --session-id sess_1 --limit 20
//! ```

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::client::Client;

#[derive(Args)]
pub struct EventsArgs {
    #[command(subcommand)]
    command: EventsCommand,
}

#[derive(Subcommand)]
pub enum EventsCommand {
    /// Ingest a batch of events from a JSON file (`{"events": [...]}`)
    Ingest {
        /// Path to a JSON file containing an `events` array
        file: PathBuf,
    },
    /// List recent events
    List {
        #[arg(long)]
        session_id: Option<String>,
        #[arg(long)]
        agent_id: Option<String>,
        /// Single type or a comma-separated set, e.g. `tool_call,tool_error`
        #[arg(long)]
        event_type: Option<String>,
        /// Single severity or a comma-separated set, e.g. `error,critical`
        #[arg(long)]
        severity: Option<String>,
        #[arg(long)]
        payload_contains: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
        /// Output raw JSON instead of a table
        #[arg(long)]
        raw: bool,
    },
}

#[derive(Debug, Serialize)]
struct IngestRequest {
    events: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct IngestResponse {
    ingested: usize,
}

#[derive(Debug, Deserialize)]
struct EventListResponse {
    events: Vec<serde_json::Value>,
    total: usize,
}

pub async fn run(args: EventsArgs, client: &Client) -> Result<()> {
    match args.command {
        EventsCommand::Ingest { file } => ingest(client, &file).await,
        EventsCommand::List { session_id, agent_id, event_type, severity, payload_contains, limit, raw } => {
            list(client, session_id, agent_id, event_type, severity, payload_contains, limit, raw).await
        }
    }
}

async fn ingest(client: &Client, file: &PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
    let parsed: serde_json::Value = serde_json::from_str(&content).context("invalid JSON")?;
    let events = parsed
        .get("events")
        .and_then(|e| e.as_array())
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("expected a top-level `events` array"))?;

    let response: IngestResponse = client.post("/api/events", &IngestRequest { events }).await?;
    println!("{} ingested {} event(s)", "✓".green().bold(), response.ingested);
    Ok(())
}

async fn list(
    client: &Client,
    session_id: Option<String>,
    agent_id: Option<String>,
    event_type: Option<String>,
    severity: Option<String>,
    payload_contains: Option<String>,
    limit: u32,
    raw: bool,
) -> Result<()> {
    let mut query = vec![format!("limit={limit}")];
    if let Some(v) = session_id {
        query.push(format!("session_id={v}"));
    }
    if let Some(v) = agent_id {
        query.push(format!("agent_id={v}"));
    }
    if let Some(v) = event_type {
        query.push(format!("event_type={v}"));
    }
    if let Some(v) = severity {
        query.push(format!("severity={v}"));
    }
    if let Some(v) = payload_contains {
        query.push(format!("payload_contains={v}"));
    }
    let path = format!("/api/events?{}", query.join("&"));
    let response: EventListResponse = client.get(&path).await?;

    if raw {
        println!("{}", serde_json::to_string_pretty(&response.events)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).apply_modifier(UTF8_ROUND_CORNERS).set_header(vec![
        Cell::new("ID").fg(Color::Cyan),
        Cell::new("Type").fg(Color::Cyan),
        Cell::new("Severity").fg(Color::Cyan),
        Cell::new("Session").fg(Color::Cyan),
        Cell::new("Timestamp").fg(Color::Cyan),
    ]);
    for event in &response.events {
        table.add_row(vec![
            Cell::new(event.get("id").and_then(|v| v.as_str()).unwrap_or("?")),
            Cell::new(event.get("event_type").and_then(|v| v.as_str()).unwrap_or("?")),
            Cell::new(event.get("severity").and_then(|v| v.as_str()).unwrap_or("?")),
            Cell::new(event.get("session_id").and_then(|v| v.as_str()).unwrap_or("?")),
            Cell::new(event.get("timestamp").and_then(|v| v.as_str()).unwrap_or("?")),
        ]);
    }
    println!("{table}");
    println!("{} of {} total", response.events.len(), response.total);
    Ok(())
}
