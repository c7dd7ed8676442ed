//! S5: signed webhook ingest through the real router — valid signature maps
//! the event and stores it, a wrong signature is rejected, and an unknown
//! event name for a known source is a `400`.

use agentlens_api::routes::api_router;
use agentlens_api::state::AppState;
use agentlens_engine::{
    AlertEngine, BenchmarkEngine, DiagnosticsEngine, EmbeddingQueue, EngineConfig, EventBus,
    ExportEngine, GuardrailEngine, IngestPipeline, KeyRateLimiter, MockEmbeddingService,
    QuotaChecker, RecallEngine, WebhookSecrets,
};
use agentlens_notify::NotificationRouter;
use agentlens_store::{MemoryStore, Store};
use agentlens_types::ApiKey;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use tower::ServiceExt;

fn sign(body: &[u8], secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

async fn setup() -> (AppState, String) {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::default());

    let raw_key = "al_test_webhook_key";
    let key = ApiKey {
        id: uuid::Uuid::new_v4(),
        tenant_id: "acme".to_string(),
        key_hash: ApiKey::hash_raw_key(raw_key),
        scopes: vec!["*".to_string()],
        rate_limit: None,
        created_at: chrono::Utc::now(),
        revoked_at: None,
    };
    store.create(&key).await.unwrap();

    let bus = Arc::new(EventBus::new(256));
    let embeddings = EmbeddingQueue::new(Arc::new(MockEmbeddingService::new(4)), store.clone(), 64);
    let ingest = Arc::new(IngestPipeline::new(store.clone(), bus.clone(), embeddings.clone()));
    let recall = Arc::new(RecallEngine::new(store.clone(), Arc::new(MockEmbeddingService::new(4))));
    let diagnostics = Arc::new(DiagnosticsEngine::new(store.clone()));
    let notify_router = Arc::new(NotificationRouter::new(store.clone(), vec![]));
    let alerts = Arc::new(AlertEngine::new(store.clone(), notify_router.clone()));
    let guardrails = Arc::new(GuardrailEngine::new(store.clone(), notify_router.clone()));
    let benchmarks = Arc::new(BenchmarkEngine::new(store.clone()));
    let export = Arc::new(ExportEngine::new(store.clone()));
    let key_rate_limiter = Arc::new(KeyRateLimiter::new());
    let quota_checker = Arc::new(QuotaChecker::new(store.clone()));

    let mut config = EngineConfig {
        port: 0,
        database_url: "sqlite::memory:".to_string(),
        cors_origin: None,
        auth_disabled: false,
        redis_url: None,
        backpressure_threshold: 10_000,
        webhook_secrets: WebhookSecrets::default(),
        embedding: agentlens_engine::EmbeddingConfig { endpoint: None, model: "mock".to_string() },
    };
    config.webhook_secrets.formbridge = Some("form-secret".to_string());

    let state = AppState::new(
        store, bus, ingest, recall, diagnostics, alerts, guardrails, benchmarks, export,
        key_rate_limiter, quota_checker, notify_router, Arc::new(config),
    );
    (state, raw_key.to_string())
}

fn router_with_auth(state: AppState) -> axum::Router {
    api_router(state.clone()).layer(axum::middleware::from_fn_with_state(state, agentlens_api::middleware::auth_middleware))
}

async fn post_webhook(router: axum::Router, raw_key: &str, body: &[u8], signature: Option<&str>) -> Response {
    let mut req = Request::builder()
        .method("POST")
        .uri("/api/events/ingest")
        .header("Authorization", format!("Bearer {raw_key}"))
        .header("Content-Type", "application/json");
    if let Some(sig) = signature {
        req = req.header("x-webhook-signature", sig);
    }
    router.oneshot(req.body(Body::from(body.to_vec())).unwrap()).await.unwrap()
}

#[tokio::test]
async fn valid_signature_ingests_and_maps_event_type() {
    let (state, raw_key) = setup().await;
    let router = router_with_auth(state.clone());

    let body = serde_json::json!({"source": "formbridge", "event": "submission.created", "data": {"form": "contact"}}).to_string();
    let sig = sign(body.as_bytes(), "form-secret");

    let response = post_webhook(router, &raw_key, body.as_bytes(), Some(&sig)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let events = state.store().query_events("acme", &agentlens_store::EventFilter { limit: 10, ..Default::default() }).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, agentlens_types::EventType::FormSubmitted);
}

#[tokio::test]
async fn wrong_signature_is_unauthorized() {
    let (state, raw_key) = setup().await;
    let router = router_with_auth(state);

    let body = serde_json::json!({"source": "formbridge", "event": "submission.created", "data": {}}).to_string();
    let bad_sig = sign(body.as_bytes(), "not-the-secret");

    let response = post_webhook(router, &raw_key, body.as_bytes(), Some(&bad_sig)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_event_name_is_bad_request() {
    let (state, raw_key) = setup().await;
    let router = router_with_auth(state);

    let body = serde_json::json!({"source": "formbridge", "event": "submission.unknown", "data": {}}).to_string();
    let sig = sign(body.as_bytes(), "form-secret");

    let response = post_webhook(router, &raw_key, body.as_bytes(), Some(&sig)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
