//! Guardrails command - manage guardrail rules and view trigger status
//!
//! Usage:
//! ```bash
//! agentlens guardrails list
//! agentlens guardrails create rule.json
//! agentlens guardrails delete <rule-id>
//! agentlens guardrails status <rule-id>
//! ```

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use std::path::PathBuf;

use crate::client::Client;

#[derive(Args)]
pub struct GuardrailsArgs {
    #[command(subcommand)]
    command: GuardrailsCommand,
}

#[derive(Subcommand)]
pub enum GuardrailsCommand {
    List,
    Create { file: PathBuf },
    Delete { rule_id: String },
    Status { rule_id: String },
}

pub async fn run(args: GuardrailsArgs, client: &Client) -> Result<()> {
    match args.command {
        GuardrailsCommand::List => list(client).await,
        GuardrailsCommand::Create { file } => create(client, &file).await,
        GuardrailsCommand::Delete { rule_id } => delete(client, &rule_id).await,
        GuardrailsCommand::Status { rule_id } => status(client, &rule_id).await,
    }
}

async fn list(client: &Client) -> Result<()> {
    let rules: Vec<serde_json::Value> = client.get("/api/guardrails").await?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).apply_modifier(UTF8_ROUND_CORNERS).set_header(vec![
        Cell::new("ID").fg(Color::Cyan),
        Cell::new("Name").fg(Color::Cyan),
        Cell::new("Condition").fg(Color::Cyan),
        Cell::new("Action").fg(Color::Cyan),
        Cell::new("Dry run").fg(Color::Cyan),
        Cell::new("Enabled").fg(Color::Cyan),
    ]);
    for rule in &rules {
        table.add_row(vec![
            Cell::new(rule.get("id").and_then(|v| v.as_str()).unwrap_or("?")),
            Cell::new(rule.get("name").and_then(|v| v.as_str()).unwrap_or("?")),
            Cell::new(rule.get("condition_type").and_then(|v| v.as_str()).unwrap_or("?")),
            Cell::new(rule.get("action_type").and_then(|v| v.as_str()).unwrap_or("?")),
            Cell::new(rule.get("dry_run").and_then(|v| v.as_bool()).unwrap_or(false)),
            Cell::new(rule.get("enabled").and_then(|v| v.as_bool()).unwrap_or(false)),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn create(client: &Client, file: &PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
    let rule: serde_json::Value = serde_json::from_str(&content).context("invalid JSON")?;
    let created: serde_json::Value = client.post("/api/guardrails", &rule).await?;
    println!("{} created guardrail rule {}", "✓".green().bold(), created.get("id").and_then(|v| v.as_str()).unwrap_or("?"));
    Ok(())
}

async fn delete(client: &Client, rule_id: &str) -> Result<()> {
    client.delete(&format!("/api/guardrails/{rule_id}")).await?;
    println!("{} deleted guardrail rule {rule_id}", "✓".green().bold());
    Ok(())
}

async fn status(client: &Client, rule_id: &str) -> Result<()> {
    let response: serde_json::Value = client.get(&format!("/api/guardrails/{rule_id}/status")).await?;
    let state = response.get("state").cloned().unwrap_or_default();

    println!("{}", "Guardrail state:".bold());
    println!("  {} {}", "Trigger count:".dimmed(), state.get("trigger_count").and_then(|v| v.as_u64()).unwrap_or(0));
    println!("  {} {}", "Last triggered:".dimmed(), state.get("last_triggered_at").and_then(|v| v.as_str()).unwrap_or("never"));
    println!("  {} {}", "Current value:".dimmed(), state.get("current_value").and_then(|v| v.as_f64()).unwrap_or(0.0));
    Ok(())
}
