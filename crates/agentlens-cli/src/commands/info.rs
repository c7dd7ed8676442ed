//! Info command - show CLI version and configured endpoint
//!
//! Usage:
//! ```bash
//! agentlens info
//! ```

use anyhow::Result;
use clap::Args;
use colored::Colorize;

#[derive(Args)]
pub struct InfoArgs;

pub fn run(_args: InfoArgs, base_url: &str) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");

    println!("{}", "AgentLens CLI".bold().cyan());
    println!("{}", "═".repeat(40).cyan());
    println!();

    println!("{}", "Version:".bold());
    println!("  {} {}", "agentlens-cli:".dimmed(), version.green());
    println!();

    println!("{}", "Endpoint:".bold());
    println!("  {} {}", "API base URL:".dimmed(), base_url.green());
    println!();

    println!("{}", "Commands:".bold());
    for (name, desc) in [
        ("events", "ingest and query events"),
        ("sessions", "list sessions, view timelines"),
        ("agents", "list and inspect agents"),
        ("recall", "semantic recall over past events/lessons"),
        ("alerts", "manage alert rules and history"),
        ("guardrails", "manage guardrail rules and status"),
        ("tail", "stream live events over SSE"),
    ] {
        println!("  {} {:<12} {}", "•".cyan(), name.green(), desc.dimmed());
    }
    println!();

    println!("{}", "Configuration:".bold());
    println!("  {} AGENTLENS_API_URL, AGENTLENS_API_KEY", "env:".dimmed());

    Ok(())
}
