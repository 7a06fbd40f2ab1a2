//! In-memory reference implementation of the semantic index.
//!
//! Embeddings are feature-hashed bag-of-words vectors, so identical texts
//! embed identically and texts sharing vocabulary rank close together.
//! Deterministic and test-friendly; production deployments point the engine
//! at a real vector store through the same trait.

use crate::external::{IndexMatch, Metadata, MetadataFilter, SemanticIndex};
use async_trait::async_trait;
use council_types::{ExternalError, ExternalResult};
use dashmap::DashMap;
use std::cmp::Ordering;

/// Default embedding width
pub const EMBEDDING_DIMENSIONS: usize = 256;

#[derive(Debug, Clone)]
struct StoredRecord {
    vector: Vec<f32>,
    metadata: Metadata,
}

/// Process-local semantic index
pub struct InMemorySemanticIndex {
    dimensions: usize,
    records: DashMap<String, StoredRecord>,
}

impl Default for InMemorySemanticIndex {
    fn default() -> Self {
        Self::new(EMBEDDING_DIMENSIONS)
    }
}

impl InMemorySemanticIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            records: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Metadata of a stored record
    pub fn metadata(&self, id: &str) -> Option<Metadata> {
        self.records.get(id).map(|r| r.metadata.clone())
    }

    fn hash_embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimensions];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = blake3::hash(token.as_bytes());
            let bytes = digest.as_bytes();
            let bucket = u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]) as usize
                % self.dimensions;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl SemanticIndex for InMemorySemanticIndex {
    async fn embed(&self, text: &str) -> ExternalResult<Vec<f32>> {
        Ok(self.hash_embed(text))
    }

    async fn query(
        &self,
        vector: &[f32],
        filter: &MetadataFilter,
        top_k: usize,
    ) -> ExternalResult<Vec<IndexMatch>> {
        if vector.is_empty() {
            return Err(ExternalError::InvalidResponse(
                "query vector must not be empty".to_string(),
            ));
        }

        let mut hits = self
            .records
            .iter()
            .filter(|entry| filter.matches(&entry.metadata))
            .map(|entry| IndexMatch {
                id: entry.key().clone(),
                score: cosine_similarity(vector, &entry.vector).unwrap_or(0.0),
                metadata: entry.metadata.clone(),
            })
            .collect::<Vec<_>>();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Metadata) -> ExternalResult<()> {
        if id.trim().is_empty() {
            return Err(ExternalError::InvalidResponse(
                "record id must not be empty".to_string(),
            ));
        }
        self.records
            .insert(id.to_string(), StoredRecord { vector, metadata });
        Ok(())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0_f32, 0.0_f32, 0.0_f32);
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(kind: &str) -> Metadata {
        let mut m = Metadata::new();
        m.insert("kind".into(), json!(kind));
        m
    }

    #[tokio::test]
    async fn test_identical_text_ranks_first() {
        let index = InMemorySemanticIndex::default();
        for (id, text) in [
            ("flood", "river flood downtown evacuation"),
            ("parade", "cultural parade music festival"),
            ("bridge", "bridge repair traffic detour"),
        ] {
            let v = index.embed(text).await.unwrap();
            index.upsert(id, v, meta("collaboration")).await.unwrap();
        }

        let q = index.embed("river flood downtown evacuation").await.unwrap();
        let hits = index.query(&q, &MetadataFilter::new(), 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "flood");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_filter_and_upsert_replaces() {
        let index = InMemorySemanticIndex::default();
        let v = index.embed("a b c").await.unwrap();
        index.upsert("r1", v.clone(), meta("archive")).await.unwrap();
        index.upsert("r2", v.clone(), meta("collaboration")).await.unwrap();
        index.upsert("r2", v.clone(), meta("collaboration")).await.unwrap();
        assert_eq!(index.len(), 2);

        let hits = index
            .query(&v, &MetadataFilter::new().equals("kind", "archive"), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "r1");
    }

    #[tokio::test]
    async fn test_rejects_empty_query() {
        let index = InMemorySemanticIndex::default();
        assert!(index.query(&[], &MetadataFilter::new(), 1).await.is_err());
    }

    #[test]
    fn test_cosine_similarity() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), Some(1.0));
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), Some(0.0));
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
    }
}
