//! Embedding worker (spec §4.7, C7): a bounded FIFO of pending text, one
//! worker task, content-hash dedup. Grounded on the teacher's
//! `EmbeddingProvider` trait (`provider.rs`), narrowed to the single
//! `embed` seam this domain needs.

use agentlens_store::{EmbeddingStore, Store};
use agentlens_types::{hash::sha256_hex, Embedding, SourceType};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding service unavailable: {0}")]
    Unavailable(String),
}

/// Pluggable text-to-vector backend. `dimensions()` lets the worker tag
/// stored rows without a round trip.
#[async_trait]
pub trait EmbeddingService: Send + Sync + std::fmt::Debug {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
    fn model(&self) -> &str;
    fn dimensions(&self) -> u32;
}

/// Deterministic hash-based embedding for tests and offline development —
/// no network call, stable output for identical input.
#[derive(Debug)]
pub struct MockEmbeddingService {
    dimensions: u32,
}

impl MockEmbeddingService {
    pub fn new(dimensions: u32) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl EmbeddingService for MockEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let digest = sha256_hex(text.as_bytes());
        let bytes = hex::decode(&digest).unwrap_or_default();
        let vector = (0..self.dimensions as usize)
            .map(|i| {
                let b = bytes[i % bytes.len().max(1)];
                (b as f32 / 255.0) * 2.0 - 1.0
            })
            .collect();
        Ok(vector)
    }

    fn model(&self) -> &str {
        "mock-embedding"
    }

    fn dimensions(&self) -> u32 {
        self.dimensions
    }
}

/// An HTTP-backed embedding service calling an external endpoint that
/// returns `{embedding: [f32; n]}` for `{input: text}` (spec §6 "Config via
/// environment": embedding-service endpoint/model).
#[derive(Debug)]
pub struct HttpEmbeddingService {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: u32,
}

impl HttpEmbeddingService {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, dimensions: u32) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("reqwest client builds"),
            endpoint: endpoint.into(),
            model: model.into(),
            dimensions,
        }
    }
}

#[async_trait]
impl EmbeddingService for HttpEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({"input": text, "model": self.model}))
            .send()
            .await
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(EmbeddingError::Unavailable(format!("status {}", response.status())));
        }
        let body: serde_json::Value = response.json().await.map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;
        body.get("embedding")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|n| n.as_f64()).map(|f| f as f32).collect())
            .ok_or_else(|| EmbeddingError::Unavailable("response missing `embedding` array".into()))
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> u32 {
        self.dimensions
    }
}

struct PendingText {
    tenant_id: String,
    source_type: SourceType,
    source_id: String,
    text_content: String,
}

/// The bounded queue plus its single worker task (spec §4.7: "intentionally
/// single-worker to serialize access... and avoid duplicate computation for
/// the same content hash within one burst").
pub struct EmbeddingQueue {
    tx: mpsc::Sender<PendingText>,
    // kept alive so `enqueue_*` can report queue depth in tests/health checks
    depth: Arc<Mutex<usize>>,
}

impl EmbeddingQueue {
    pub fn new(service: Arc<dyn EmbeddingService>, store: Arc<dyn Store>, capacity: usize) -> Arc<Self> {
        let (tx, mut rx) = mpsc::channel::<PendingText>(capacity);
        let depth = Arc::new(Mutex::new(0usize));
        let worker_depth = depth.clone();
        tokio::spawn(async move {
            while let Some(pending) = rx.recv().await {
                {
                    let mut d = worker_depth.lock().await;
                    *d = d.saturating_sub(1);
                }
                process_one(&*store, &*service, pending).await;
            }
        });
        Arc::new(Self { tx, depth })
    }

    async fn enqueue(&self, pending: PendingText) {
        {
            let mut d = self.depth.lock().await;
            *d += 1;
        }
        // Bounded and lossy: a full queue drops the submission silently
        // (spec §4.7 — the source remains and can be re-enqueued later).
        if self.tx.try_send(pending).is_err() {
            let mut d = self.depth.lock().await;
            *d = d.saturating_sub(1);
            tracing::warn!("embedding queue full, dropping submission");
        }
    }

    pub async fn enqueue_event(&self, tenant_id: &str, event_id: String, text_content: String) {
        self.enqueue(PendingText { tenant_id: tenant_id.to_string(), source_type: SourceType::Event, source_id: event_id, text_content }).await;
    }

    pub async fn enqueue_lesson(&self, tenant_id: &str, lesson_id: String, text_content: String) {
        self.enqueue(PendingText { tenant_id: tenant_id.to_string(), source_type: SourceType::Lesson, source_id: lesson_id, text_content }).await;
    }

    /// Called once a `session_ended` event lands; the actual summary text
    /// is produced by `diagnostics::build_session_summary` and handed here.
    pub async fn enqueue_session_summary_text(&self, tenant_id: &str, session_id: &str, text_content: String) {
        self.enqueue(PendingText { tenant_id: tenant_id.to_string(), source_type: SourceType::Session, source_id: session_id.to_string(), text_content })
            .await;
    }

    /// Ingest-pipeline convenience: enqueues a placeholder summary job for a
    /// session that just ended. Kept separate from
    /// `enqueue_session_summary_text` so callers that already have the
    /// rendered summary text (diagnostics) can skip recomputing it.
    pub async fn enqueue_session_summary(&self, tenant_id: &str, session_id: &str) {
        self.enqueue(PendingText {
            tenant_id: tenant_id.to_string(),
            source_type: SourceType::Session,
            source_id: session_id.to_string(),
            text_content: format!("session {session_id} ended"),
        })
        .await;
    }

    pub async fn depth(&self) -> usize {
        *self.depth.lock().await
    }
}

async fn process_one(store: &dyn Store, service: &dyn EmbeddingService, pending: PendingText) {
    let content_hash = sha256_hex(pending.text_content.as_bytes());

    if let Ok(Some(mut existing)) = store.find_by_content_hash(&pending.tenant_id, &content_hash).await {
        existing.source_type = pending.source_type;
        existing.source_id = pending.source_id;
        if let Err(e) = EmbeddingStore::upsert(store, &existing).await {
            tracing::warn!(error = %e, "failed to patch embedding source");
        }
        return;
    }

    let vector = match service.embed(&pending.text_content).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "embedding service failed, dropping submission");
            return;
        }
    };

    let embedding = Embedding {
        id: uuid::Uuid::new_v4(),
        tenant_id: pending.tenant_id,
        source_type: pending.source_type,
        source_id: pending.source_id,
        content_hash,
        text_content: pending.text_content,
        vector,
        model: service.model().to_string(),
        dimensions: service.dimensions(),
        created_at: chrono::Utc::now(),
    };
    if let Err(e) = EmbeddingStore::upsert(store, &embedding).await {
        tracing::warn!(error = %e, "failed to store embedding");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlens_store::MemoryStore;
    use tokio::time::{sleep, Duration};

    #[tokio::test]
    async fn same_content_twice_dedupes_to_one_row() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        let queue = EmbeddingQueue::new(Arc::new(MockEmbeddingService::new(4)), store.clone(), 10);

        queue.enqueue_event("t1", "e1".into(), "hello".into()).await;
        sleep(Duration::from_millis(20)).await;
        queue.enqueue_lesson("t1", "l1".into(), "hello".into()).await;
        sleep(Duration::from_millis(20)).await;

        let all = store.all("t1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].source_type, SourceType::Lesson);
        assert_eq!(all[0].source_id, "l1");
    }
}
