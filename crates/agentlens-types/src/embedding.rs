//! Embeddings (spec §3): content-addressed vectors for semantic recall.
//! Uniqueness is `(tenant_id, content_hash)` — re-submitting the same text
//! for a different source overwrites the source fields in place (P5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Event,
    Session,
    Lesson,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Session => "session",
            Self::Lesson => "lesson",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "event" => Self::Event,
            "session" => Self::Session,
            "lesson" => Self::Lesson,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub id: Uuid,
    pub tenant_id: String,
    pub source_type: SourceType,
    pub source_id: String,
    pub content_hash: String,
    pub text_content: String,
    pub vector: Vec<f32>,
    pub model: String,
    pub dimensions: u32,
    pub created_at: DateTime<Utc>,
}

/// Cosine similarity between two equal-length vectors; `0.0` if either is
/// the zero vector (rather than producing `NaN`).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_similarity_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_yields_zero_not_nan() {
        let sim = cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]);
        assert_eq!(sim, 0.0);
    }
}
