//! Semantic recall (spec §4.7 "Similarity search", C8): cosine similarity
//! over a tenant's embeddings, O(N) in memory — acceptable for tens of
//! thousands of rows per the spec's stated scale.

use agentlens_store::Store;
use agentlens_types::{cosine_similarity, Embedding, Result, SourceType};
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct RecallQuery {
    pub source_type: Option<SourceType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub min_score: f32,
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct RecallHit {
    pub embedding: Embedding,
    pub score: f32,
}

pub struct RecallEngine {
    store: Arc<dyn Store>,
    service: Arc<dyn crate::embedding::EmbeddingService>,
}

impl RecallEngine {
    pub fn new(store: Arc<dyn Store>, service: Arc<dyn crate::embedding::EmbeddingService>) -> Self {
        Self { store, service }
    }

    /// Embeds `query`, then returns the top `query.limit` embeddings scoring
    /// at or above `query.min_score`, filtered by source type and creation
    /// window, descending by score.
    pub async fn search(&self, tenant_id: &str, query_text: &str, query: RecallQuery) -> Result<Vec<RecallHit>> {
        let query_vector = self
            .service
            .embed(query_text)
            .await
            .map_err(|e| agentlens_types::AgentLensError::Dependency(e.to_string()))?;

        let all = self.store.all(tenant_id).await?;
        let mut hits: Vec<RecallHit> = all
            .into_iter()
            .filter(|e| query.source_type.map(|st| st == e.source_type).unwrap_or(true))
            .filter(|e| query.from.map(|from| e.created_at >= from).unwrap_or(true))
            .filter(|e| query.to.map(|to| e.created_at <= to).unwrap_or(true))
            .map(|e| {
                let score = cosine_similarity(&query_vector, &e.vector);
                RecallHit { embedding: e, score }
            })
            .filter(|hit| hit.score >= query.min_score)
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        let limit = if query.limit == 0 { hits.len() } else { query.limit };
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbeddingService;
    use agentlens_store::MemoryStore;
    use uuid::Uuid;

    async fn seed(store: &dyn Store, tenant_id: &str, text: &str, service: &dyn crate::embedding::EmbeddingService) {
        let vector = service.embed(text).await.unwrap();
        store
            .upsert(&Embedding {
                id: Uuid::new_v4(),
                tenant_id: tenant_id.to_string(),
                source_type: SourceType::Event,
                source_id: text.to_string(),
                content_hash: agentlens_types::sha256_hex(text.as_bytes()),
                text_content: text.to_string(),
                vector,
                model: service.model().to_string(),
                dimensions: service.dimensions(),
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn exact_match_ranks_first() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        let service = Arc::new(MockEmbeddingService::new(8));
        seed(&*store, "t1", "login failed", &*service).await;
        seed(&*store, "t1", "payment succeeded", &*service).await;

        let engine = RecallEngine::new(store, service);
        let hits = engine.search("t1", "login failed", RecallQuery { limit: 5, min_score: 0.0, ..Default::default() }).await.unwrap();
        assert_eq!(hits[0].embedding.text_content, "login failed");
        assert!(hits[0].score >= hits.get(1).map(|h| h.score).unwrap_or(0.0));
    }

    #[tokio::test]
    async fn min_score_filters_out_weak_matches() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        let service = Arc::new(MockEmbeddingService::new(8));
        seed(&*store, "t1", "alpha", &*service).await;

        let engine = RecallEngine::new(store, service);
        let hits = engine.search("t1", "alpha", RecallQuery { limit: 5, min_score: 1.5, ..Default::default() }).await.unwrap();
        assert!(hits.is_empty());
    }
}
