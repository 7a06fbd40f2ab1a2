//! Participant Selector
//!
//! Builds the participant list for a new session: the event's required
//! participants (or the category's default experts), topped up with
//! collaborators who succeeded on similar past events.

use crate::config::SelectionConfig;
use crate::directory::{default_experts, ParticipantDirectory};
use crate::external::{MetadataFilter, SemanticIndex};
use council_types::{Event, ExternalResult, ParticipantId};
use std::sync::Arc;

/// Metadata `kind` of collaboration records written on consensus
pub const COLLABORATION_KIND: &str = "collaboration";

/// Selects participants for new sessions
pub struct ParticipantSelector {
    index: Arc<dyn SemanticIndex>,
    directory: Arc<ParticipantDirectory>,
    config: SelectionConfig,
}

impl ParticipantSelector {
    pub fn new(
        index: Arc<dyn SemanticIndex>,
        directory: Arc<ParticipantDirectory>,
        config: SelectionConfig,
    ) -> Self {
        Self {
            index,
            directory,
            config,
        }
    }

    /// Participant list for `event`; never fails
    ///
    /// Optimization can only add participants. Any lookup error or a
    /// result smaller than the base list yields the base list unchanged.
    pub async fn select(&self, event: &Event) -> Vec<ParticipantId> {
        let base = self.base_participants(event);

        match self.optimize(event, &base).await {
            Ok(optimized) if optimized.len() >= base.len() => {
                if optimized.len() > base.len() {
                    tracing::debug!(
                        event_id = %event.id,
                        added = optimized.len() - base.len(),
                        "Added historical collaborators"
                    );
                }
                optimized
            }
            Ok(optimized) => {
                tracing::warn!(
                    event_id = %event.id,
                    required = base.len(),
                    optimized = optimized.len(),
                    "Optimization shrank the participant set, using required list"
                );
                base
            }
            Err(err) => {
                tracing::warn!(
                    event_id = %event.id,
                    error = %err,
                    "Participant optimization failed, using required list"
                );
                base
            }
        }
    }

    /// Required participants, or the category defaults when none are given
    pub fn base_participants(&self, event: &Event) -> Vec<ParticipantId> {
        let mut base = Vec::new();
        for participant in &event.required_participants {
            if !base.contains(participant) {
                base.push(participant.clone());
            }
        }
        if base.is_empty() {
            base = default_experts(event.category);
        }
        base
    }

    async fn optimize(
        &self,
        event: &Event,
        base: &[ParticipantId],
    ) -> ExternalResult<Vec<ParticipantId>> {
        let mut selected = base.to_vec();
        let limit = self
            .config
            .max_participants
            .min(base.len() + self.config.extra_slots);
        if selected.len() >= limit {
            return Ok(selected);
        }

        let vector = self.index.embed(&event.embedding_text()).await?;
        let filter = MetadataFilter::new()
            .equals("kind", COLLABORATION_KIND)
            .equals("category", event.category.as_str());
        let matches = self
            .index
            .query(&vector, &filter, self.config.history_top_k)
            .await?;

        for record in matches {
            let successful = record
                .metadata
                .get("successful")
                .and_then(|v| v.as_array())
                .into_iter()
                .flatten()
                .filter_map(|v| v.as_str())
                .map(ParticipantId::new);

            for candidate in successful {
                if selected.len() >= limit {
                    return Ok(selected);
                }
                if selected.contains(&candidate) {
                    continue;
                }
                if self.directory.is_suitable(
                    &candidate,
                    event.category,
                    self.config.suitability_threshold,
                ) {
                    selected.push(candidate);
                }
            }
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::ParticipantProfile;
    use crate::external::{IndexMatch, Metadata};
    use crate::semantic::InMemorySemanticIndex;
    use async_trait::async_trait;
    use council_types::{EventCategory, ExternalError};
    use serde_json::json;

    struct BrokenIndex;

    #[async_trait]
    impl SemanticIndex for BrokenIndex {
        async fn embed(&self, _text: &str) -> ExternalResult<Vec<f32>> {
            Err(ExternalError::Unavailable("down".into()))
        }

        async fn query(
            &self,
            _vector: &[f32],
            _filter: &MetadataFilter,
            _top_k: usize,
        ) -> ExternalResult<Vec<IndexMatch>> {
            Err(ExternalError::Unavailable("down".into()))
        }

        async fn upsert(&self, _id: &str, _vector: Vec<f32>, _metadata: Metadata) -> ExternalResult<()> {
            Err(ExternalError::Unavailable("down".into()))
        }
    }

    fn record(category: &str, successful: &[&str]) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("kind".into(), json!(COLLABORATION_KIND));
        metadata.insert("category".into(), json!(category));
        metadata.insert("successful".into(), json!(successful));
        metadata
    }

    async fn seeded_index() -> Arc<InMemorySemanticIndex> {
        let index = Arc::new(InMemorySemanticIndex::default());
        let vector = index.embed("Bridge collapse transport").await.unwrap();
        index
            .upsert(
                "collab-1",
                vector.clone(),
                record("transport", &["veteran", "novice", "driver"]),
            )
            .await
            .unwrap();
        index
            .upsert("collab-2", vector, record("emergency", &["medic"]))
            .await
            .unwrap();
        index
    }

    fn directory() -> Arc<ParticipantDirectory> {
        let directory = ParticipantDirectory::new();
        directory.register(
            ParticipantProfile::new("veteran", "Veteran").with_interests(&[EventCategory::Transport]),
        );
        directory.register(ParticipantProfile::new("novice", "Novice"));
        directory.register(
            ParticipantProfile::new("driver", "Driver")
                .with_trait("analytical", 0.9)
                .with_trait("decisiveness", 0.8)
                .with_trait("vision", 0.6),
        );
        directory.register(
            ParticipantProfile::new("medic", "Medic").with_interests(&EventCategory::ALL),
        );
        Arc::new(directory)
    }

    #[tokio::test]
    async fn test_defaults_when_nothing_required() {
        let selector = ParticipantSelector::new(
            Arc::new(InMemorySemanticIndex::default()),
            directory(),
            SelectionConfig::default(),
        );
        let event = Event::new("e1", "Flood", EventCategory::Emergency);
        assert_eq!(
            selector.select(&event).await,
            default_experts(EventCategory::Emergency)
        );
    }

    #[tokio::test]
    async fn test_adds_suitable_historical_collaborators() {
        let selector =
            ParticipantSelector::new(seeded_index().await, directory(), SelectionConfig::default());
        let event = Event::new("e1", "Bridge collapse", EventCategory::Transport)
            .with_required(&["a", "b"]);

        let selected = selector.select(&event).await;
        // novice is not suitable; medic belongs to another category
        assert_eq!(
            selected,
            vec![
                ParticipantId::new("a"),
                ParticipantId::new("b"),
                ParticipantId::new("veteran"),
                ParticipantId::new("driver"),
            ]
        );
    }

    #[tokio::test]
    async fn test_respects_participant_cap() {
        let selector =
            ParticipantSelector::new(seeded_index().await, directory(), SelectionConfig::default());
        let event = Event::new("e1", "Bridge collapse", EventCategory::Transport)
            .with_required(&["a", "b", "c", "d"]);

        let selected = selector.select(&event).await;
        assert_eq!(selected.len(), 5);
        assert_eq!(selected[4], ParticipantId::new("veteran"));
    }

    #[tokio::test]
    async fn test_index_failure_falls_back_to_required() {
        let selector =
            ParticipantSelector::new(Arc::new(BrokenIndex), directory(), SelectionConfig::default());
        let event = Event::new("e1", "Bridge", EventCategory::Transport).with_required(&["a", "a"]);
        assert_eq!(selector.select(&event).await, vec![ParticipantId::new("a")]);
    }
}
