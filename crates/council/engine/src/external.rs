//! Interfaces to external collaborators
//!
//! The engine treats narrative generation and the semantic index as opaque,
//! possibly slow, possibly failing services. Every method returns an
//! [`ExternalResult`]; fallbacks are chosen by the caller.

use async_trait::async_trait;
use council_types::{EventCategory, ExternalResult, ParticipantId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata attached to a semantic index record
pub type Metadata = Map<String, Value>;

/// What the narrative service knows about the speaker
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ParticipantContext {
    pub participant_id: ParticipantId,
    pub display_name: String,
    #[serde(default)]
    pub interests: Vec<EventCategory>,
    /// Free-form persona hint, e.g. the expert role
    #[serde(default)]
    pub persona: Option<String>,
}

impl ParticipantContext {
    pub fn anonymous(participant_id: ParticipantId) -> Self {
        Self {
            display_name: participant_id.to_string(),
            participant_id,
            ..Self::default()
        }
    }
}

/// Natural-language generation attributed to a participant
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, context: &ParticipantContext) -> ExternalResult<String>;
}

/// Key/value equality predicates applied to record metadata
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetadataFilter {
    predicates: Vec<(String, Value)>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicates.push((key.into(), value.into()));
        self
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.predicates
            .iter()
            .all(|(key, value)| metadata.get(key) == Some(value))
    }
}

/// One ranked result of a similarity query
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Metadata,
}

/// Vector store used for historical-collaborator discovery and archival
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    async fn embed(&self, text: &str) -> ExternalResult<Vec<f32>>;

    async fn query(
        &self,
        vector: &[f32],
        filter: &MetadataFilter,
        top_k: usize,
    ) -> ExternalResult<Vec<IndexMatch>>;

    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Metadata) -> ExternalResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_requires_all_predicates() {
        let mut metadata = Metadata::new();
        metadata.insert("kind".into(), json!("collaboration"));
        metadata.insert("category".into(), json!("emergency"));

        let filter = MetadataFilter::new()
            .equals("kind", "collaboration")
            .equals("category", "emergency");
        assert!(filter.matches(&metadata));

        let filter = MetadataFilter::new().equals("category", "transport");
        assert!(!filter.matches(&metadata));

        assert!(MetadataFilter::new().matches(&metadata));
    }
}
