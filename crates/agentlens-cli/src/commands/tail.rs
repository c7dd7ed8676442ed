//! Tail command - stream live ingest/session events over SSE
//!
//! Usage:
//! ```bash
//! agentlens tail
//! ```

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use futures::StreamExt;

use crate::client::Client;

#[derive(Args)]
pub struct TailArgs;

pub async fn run(_args: TailArgs, client: &Client) -> Result<()> {
    println!("{}", "streaming live events, ctrl-c to stop".dimmed());

    let response = client.stream("/api/stream").await?;
    let mut stream = response.bytes_stream();
    let mut buf = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("stream read failed")?;
        buf.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(pos) = buf.find("\n\n") {
            let frame = buf[..pos].to_string();
            buf.drain(..pos + 2);
            print_frame(&frame);
        }
    }
    Ok(())
}

/// Parses one SSE frame (`event: ...\ndata: ...`) and prints a summary line.
fn print_frame(frame: &str) {
    let mut event_name = "message";
    let mut data = "";
    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event_name = rest.trim();
        } else if let Some(rest) = line.strip_prefix("data:") {
            data = rest.trim();
        }
    }
    if data.is_empty() {
        return;
    }
    println!("{} {}", format!("[{event_name}]").cyan(), data);
}
