//! AgentLens Server - standalone entry point for the AgentLens observability backend.
//!
//! This crate is a thin wrapper around `agentlens-api` providing a runnable
//! binary for production deployments without modifying the API library
//! crate itself.

use agentlens_api::AgentLensServer;
use agentlens_engine::EngineConfig;
use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    agentlens_api::server::init_tracing();

    tracing::info!("starting AgentLens server");

    let config = EngineConfig::from_env().map_err(|e| anyhow::anyhow!("config error: {e}"))?;
    let server = AgentLensServer::new(config).await.map_err(|e| anyhow::anyhow!("server init failed: {e}"))?;

    server.run().await.map_err(|e| anyhow::anyhow!("server error: {e}"))?;

    Ok(())
}
