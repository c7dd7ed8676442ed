//! Application state
//!
//! Centralizes access to the store, engines, and the notification router.

use agentlens_engine::{
    AlertEngine, BenchmarkEngine, DiagnosticsEngine, EngineConfig, EventBus, ExportEngine,
    GuardrailEngine, IngestPipeline, KeyRateLimiter, QuotaChecker, RecallEngine,
};
use agentlens_notify::NotificationRouter;
use agentlens_store::Store;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared application state, cloned cheaply into every handler (every field
/// is an `Arc`).
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    ingest: Arc<IngestPipeline>,
    recall: Arc<RecallEngine>,
    diagnostics: Arc<DiagnosticsEngine>,
    alerts: Arc<AlertEngine>,
    guardrails: Arc<GuardrailEngine>,
    benchmarks: Arc<BenchmarkEngine>,
    export: Arc<ExportEngine>,
    key_rate_limiter: Arc<KeyRateLimiter>,
    quota_checker: Arc<QuotaChecker>,
    notify_router: Arc<NotificationRouter>,
    config: Arc<EngineConfig>,
    /// Tenants seen by `auth_middleware` since process start, so the
    /// alert/guardrail tickers know which tenants to evaluate without a
    /// "list all tenants" query the store doesn't expose.
    known_tenants: Arc<RwLock<HashSet<String>>>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<EventBus>,
        ingest: Arc<IngestPipeline>,
        recall: Arc<RecallEngine>,
        diagnostics: Arc<DiagnosticsEngine>,
        alerts: Arc<AlertEngine>,
        guardrails: Arc<GuardrailEngine>,
        benchmarks: Arc<BenchmarkEngine>,
        export: Arc<ExportEngine>,
        key_rate_limiter: Arc<KeyRateLimiter>,
        quota_checker: Arc<QuotaChecker>,
        notify_router: Arc<NotificationRouter>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
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
            config,
            known_tenants: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Records `tenant_id` as active; called once per authenticated request.
    pub async fn record_tenant(&self, tenant_id: &str) {
        let mut tenants = self.known_tenants.write().await;
        if !tenants.contains(tenant_id) {
            tenants.insert(tenant_id.to_string());
        }
    }

    pub async fn known_tenant_ids(&self) -> Vec<String> {
        self.known_tenants.read().await.iter().cloned().collect()
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn ingest(&self) -> Arc<IngestPipeline> {
        self.ingest.clone()
    }

    pub fn recall(&self) -> Arc<RecallEngine> {
        self.recall.clone()
    }

    pub fn diagnostics(&self) -> Arc<DiagnosticsEngine> {
        self.diagnostics.clone()
    }

    pub fn alerts(&self) -> Arc<AlertEngine> {
        self.alerts.clone()
    }

    pub fn guardrails(&self) -> Arc<GuardrailEngine> {
        self.guardrails.clone()
    }

    pub fn benchmarks(&self) -> Arc<BenchmarkEngine> {
        self.benchmarks.clone()
    }

    pub fn export(&self) -> Arc<ExportEngine> {
        self.export.clone()
    }

    pub fn key_rate_limiter(&self) -> Arc<KeyRateLimiter> {
        self.key_rate_limiter.clone()
    }

    pub fn quota_checker(&self) -> Arc<QuotaChecker> {
        self.quota_checker.clone()
    }

    pub fn notify_router(&self) -> Arc<NotificationRouter> {
        self.notify_router.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
