//! AgentLens API server with graceful shutdown.

use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::compression::CompressionLayer;

use crate::error::ApiError;
use crate::middleware::{
    auth_middleware, body_limit_layer, cors_layer, rate_limit_middleware, request_id_middleware,
    security_headers_middleware, timeout_layer, tracing_middleware,
};
use crate::routes::api_router;
use crate::state::AppState;
use agentlens_engine::{
    AlertEngine, BenchmarkEngine, DiagnosticsEngine, EmbeddingQueue, EngineConfig, EventBus,
    ExportEngine, GuardrailEngine, HttpEmbeddingService, IngestPipeline, KeyRateLimiter,
    MockEmbeddingService, QuotaChecker, RecallEngine,
};
use agentlens_notify::{default_providers, NotificationRouter};
use agentlens_store::{SqliteStore, Store};

/// Server configuration (spec §6 "Config via environment").
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub timeout: Duration,
    pub max_body_size: usize,
    pub compression: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".parse().unwrap(),
            timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,
            compression: true,
        }
    }
}

impl ServerConfig {
    pub fn from_engine_config(config: &EngineConfig) -> Self {
        Self { addr: SocketAddr::from(([0, 0, 0, 0], config.port)), ..Default::default() }
    }
}

/// AgentLens API server: config -> store -> engines -> router.
pub struct AgentLensServer {
    config: ServerConfig,
    app_state: AppState,
}

impl AgentLensServer {
    pub async fn new(engine_config: EngineConfig) -> Result<Self, ApiError> {
        let server_config = ServerConfig::from_engine_config(&engine_config);

        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::new(&engine_config.database_url)
                .await
                .map_err(|e| ApiError::Internal(format!("store init failed: {e}")))?,
        );

        let bus = Arc::new(EventBus::new(agentlens_engine::bus::DEFAULT_SUBSCRIBER_BUFFER));

        let embedding_service: Arc<dyn agentlens_engine::embedding::EmbeddingService> =
            match &engine_config.embedding.endpoint {
                Some(endpoint) => Arc::new(HttpEmbeddingService::new(endpoint.clone(), engine_config.embedding.model.clone(), 1536)),
                None => Arc::new(MockEmbeddingService::new(64)),
            };
        let embeddings = EmbeddingQueue::new(embedding_service.clone(), store.clone(), 1024);

        let ingest = Arc::new(IngestPipeline::new(store.clone(), bus.clone(), embeddings));
        let recall = Arc::new(RecallEngine::new(store.clone(), embedding_service));
        let diagnostics = Arc::new(DiagnosticsEngine::new(store.clone()));

        // Internal-network webhook destinations stay blocked (spec §4.10 SSRF guard)
        // unless a future config flag opts a deployment in explicitly.
        let providers = default_providers(false, None);
        let notify_router = Arc::new(NotificationRouter::new(store.clone(), providers));

        let alerts = Arc::new(AlertEngine::new(store.clone(), notify_router.clone()));
        let guardrails = Arc::new(GuardrailEngine::new(store.clone(), notify_router.clone()));
        let benchmarks = Arc::new(BenchmarkEngine::new(store.clone()));
        let export = Arc::new(ExportEngine::new(store.clone()));
        let key_rate_limiter = Arc::new(KeyRateLimiter::new());
        let quota_checker = Arc::new(QuotaChecker::new(store.clone()));

        let app_state = AppState::new(
            store,
            bus,
            ingest,
            recall,
            diagnostics,
            alerts,
            guardrails,
            benchmarks,
            export,
            key_rate_limiter,
            quota_checker,
            notify_router,
            Arc::new(engine_config),
        );

        Ok(Self { config: server_config, app_state })
    }

    pub fn state(&self) -> AppState {
        self.app_state.clone()
    }

    /// Builds the router. Middleware layers apply bottom to top; auth runs
    /// first, compression last (teacher's ordering in `VexServer::router`).
    pub fn router(&self) -> Router {
        let cors_origin = self.app_state.config().cors_origin.clone();
        api_router(self.app_state.clone())
            .layer(CompressionLayer::new())
            .layer(body_limit_layer(self.config.max_body_size))
            .layer(timeout_layer(self.config.timeout))
            .layer(cors_layer(cors_origin.as_deref()))
            .layer(middleware::from_fn(request_id_middleware))
            .layer(middleware::from_fn(security_headers_middleware))
            .layer(middleware::from_fn(tracing_middleware))
            .layer(middleware::from_fn_with_state(self.app_state.clone(), rate_limit_middleware))
            .layer(middleware::from_fn_with_state(self.app_state.clone(), auth_middleware))
    }

    /// Runs the HTTP server and the alert/guardrail background tickers
    /// until shutdown, then waits for in-flight requests to finish.
    pub async fn run(self) -> Result<(), ApiError> {
        let app = self.router();
        let addr = self.config.addr;

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let ticker_state = self.app_state.clone();
        let mut ticker_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(agentlens_engine::alerts::DEFAULT_EVALUATION_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        for tenant_id in ticker_state.known_tenant_ids().await {
                            ticker_state.alerts().evaluate_tenant(&tenant_id).await;
                            ticker_state.guardrails().evaluate_tenant(&tenant_id).await;
                            if let Err(e) = ticker_state.notify_router().flush_expired(&tenant_id).await {
                                tracing::warn!(tenant_id, error = %e, "failed to flush grouped notifications");
                            }
                        }
                    }
                    _ = ticker_shutdown.changed() => {
                        if *ticker_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        tracing::info!("AgentLens API listening on http://{}", addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ApiError::Internal(format!("server error: {e}")))?;

        let _ = shutdown_tx.send(true);
        tracing::info!("server shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, starting graceful shutdown"),
        _ = terminate => tracing::info!("received SIGTERM, starting graceful shutdown"),
    }
}

/// Initializes the tracing subscriber for standalone (non-CLI) entry points.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,agentlens_api=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_binds_port_8080() {
        let config = ServerConfig::default();
        assert_eq!(config.addr.port(), 8080);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }
}
