//! Recall command - semantic search over past events, sessions, and lessons
//!
//! Usage:
//! ```bash
//! agentlens recall "rate limit errors on the billing agent" --scope event --limit 5
//! ```

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use crate::client::Client;

#[derive(Args)]
pub struct RecallArgs {
    /// Free-text query
    query: String,

    /// Restrict to one embedding source type: event, session, lesson
    #[arg(long)]
    scope: Option<String>,

    #[arg(long, default_value_t = 10)]
    limit: usize,

    #[arg(long, default_value_t = 0.0)]
    min_score: f32,
}

pub async fn run(args: RecallArgs, client: &Client) -> Result<()> {
    let mut query = vec![format!("query={}", urlencoding_simple(&args.query)), format!("limit={}", args.limit), format!("min_score={}", args.min_score)];
    if let Some(scope) = &args.scope {
        query.push(format!("scope={scope}"));
    }
    let path = format!("/api/recall?{}", query.join("&"));

    let hits: Vec<serde_json::Value> = client.get(&path).await?;
    if hits.is_empty() {
        println!("{}", "no matches".dimmed());
        return Ok(());
    }

    for hit in &hits {
        let score = hit.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let embedding = hit.get("embedding").cloned().unwrap_or_default();
        let text = embedding.get("text_content").and_then(|v| v.as_str()).unwrap_or("?");
        let source = embedding.get("source_type").and_then(|v| v.as_str()).unwrap_or("?");
        println!("{} [{:.3}] {}: {}", "•".cyan(), score, source.yellow(), text);
    }
    Ok(())
}

/// Minimal percent-encoding for query values; avoids pulling in a full URL
/// crate for the handful of characters a free-text query realistically needs.
fn urlencoding_simple(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_spaces_and_punctuation() {
        assert_eq!(urlencoding_simple("rate limit?"), "rate%20limit%3F");
    }
}
