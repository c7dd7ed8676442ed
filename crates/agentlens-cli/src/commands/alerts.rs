//! Alerts command - manage alert rules and view history
//!
//! Usage:
//! ```bash
//! agentlens alerts list
//! agentlens alerts create rule.json
//! agentlens alerts delete <rule-id>
//! agentlens alerts history --rule-id <rule-id>
//! ```

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use std::path::PathBuf;

use crate::client::Client;

#[derive(Args)]
pub struct AlertsArgs {
    #[command(subcommand)]
    command: AlertsCommand,
}

#[derive(Subcommand)]
pub enum AlertsCommand {
    List,
    Create { file: PathBuf },
    Delete { rule_id: String },
    History {
        #[arg(long)]
        rule_id: String,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

pub async fn run(args: AlertsArgs, client: &Client) -> Result<()> {
    match args.command {
        AlertsCommand::List => list(client).await,
        AlertsCommand::Create { file } => create(client, &file).await,
        AlertsCommand::Delete { rule_id } => delete(client, &rule_id).await,
        AlertsCommand::History { rule_id, limit } => history(client, &rule_id, limit).await,
    }
}

async fn list(client: &Client) -> Result<()> {
    let rules: Vec<serde_json::Value> = client.get("/api/alerts/rules").await?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).apply_modifier(UTF8_ROUND_CORNERS).set_header(vec![
        Cell::new("ID").fg(Color::Cyan),
        Cell::new("Name").fg(Color::Cyan),
        Cell::new("Condition").fg(Color::Cyan),
        Cell::new("Threshold").fg(Color::Cyan),
        Cell::new("Enabled").fg(Color::Cyan),
    ]);
    for rule in &rules {
        table.add_row(vec![
            Cell::new(rule.get("id").and_then(|v| v.as_str()).unwrap_or("?")),
            Cell::new(rule.get("name").and_then(|v| v.as_str()).unwrap_or("?")),
            Cell::new(rule.get("condition").and_then(|v| v.get("type")).and_then(|v| v.as_str()).unwrap_or("?")),
            Cell::new(rule.get("threshold").and_then(|v| v.as_f64()).unwrap_or(0.0)),
            Cell::new(rule.get("enabled").and_then(|v| v.as_bool()).unwrap_or(false)),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn create(client: &Client, file: &PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
    let rule: serde_json::Value = serde_json::from_str(&content).context("invalid JSON")?;
    let created: serde_json::Value = client.post("/api/alerts/rules", &rule).await?;
    println!("{} created alert rule {}", "✓".green().bold(), created.get("id").and_then(|v| v.as_str()).unwrap_or("?"));
    Ok(())
}

async fn delete(client: &Client, rule_id: &str) -> Result<()> {
    client.delete(&format!("/api/alerts/rules/{rule_id}")).await?;
    println!("{} deleted alert rule {rule_id}", "✓".green().bold());
    Ok(())
}

async fn history(client: &Client, rule_id: &str, limit: u32) -> Result<()> {
    let path = format!("/api/alerts/history?rule_id={rule_id}&limit={limit}");
    let entries: Vec<serde_json::Value> = client.get(&path).await?;

    for entry in &entries {
        let triggered_at = entry.get("triggered_at").and_then(|v| v.as_str()).unwrap_or("?");
        let message = entry.get("message").and_then(|v| v.as_str()).unwrap_or("?");
        println!("  {} {}", triggered_at.dimmed(), message);
    }
    Ok(())
}
