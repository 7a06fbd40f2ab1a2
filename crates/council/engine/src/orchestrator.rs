//! Session Orchestrator - the public face of the engine
//!
//! Ties the registry, selector, simulator, caches, and notification bus
//! together behind the request-driven operations: `initiate`,
//! `get_status`, and `record_interaction`, plus the explicit lifecycle
//! controls `activate`, `advance`, and `deliberate`.
//!
//! Only caller-input errors (unknown session id, malformed event, invalid
//! explicit transition) are returned as errors. Failures inside a running
//! discussion end the session in `failed` and are reported through its
//! history.

use crate::cache::{decision_fingerprint, CacheStats, DecisionCache, ResponseCache};
use crate::config::EngineConfig;
use crate::directory::ParticipantDirectory;
use crate::external::{NarrativeGenerator, SemanticIndex};
use crate::narrator::{NarrativeClient, TemplateNarrator};
use crate::notify::{Notification, NotificationBus, NotificationEnvelope};
use crate::registry::{SessionHandle, SessionRegistry};
use crate::selector::ParticipantSelector;
use crate::semantic::InMemorySemanticIndex;
use crate::similarity;
use crate::simulator::DecisionRoundSimulator;
use crate::sweeper::Sweeper;
use crate::topics::{infer_topics, sentiment};
use council_types::{
    CollaborationSession, CouncilError, CouncilResult, Decision, Event, InteractionRecord,
    ParticipantId, SessionId, SessionStatus, SessionView,
};
use dashmap::DashMap;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

/// The Collaboration Session Engine
pub struct SessionOrchestrator {
    config: EngineConfig,
    registry: Arc<SessionRegistry>,
    directory: Arc<ParticipantDirectory>,
    index: Arc<dyn SemanticIndex>,
    selector: ParticipantSelector,
    simulator: Arc<DecisionRoundSimulator>,
    decision_cache: Arc<DecisionCache>,
    response_cache: Arc<ResponseCache>,
    bus: Arc<NotificationBus>,
    /// Most recent interactions, oldest dropped at `interaction_capacity`
    interactions: RwLock<VecDeque<InteractionRecord>>,
    /// Running round loops; each task removes its own entry when done
    deliberations: Arc<DashMap<SessionId, JoinHandle<()>>>,
}

impl SessionOrchestrator {
    /// Create an engine over the given external collaborators
    pub fn new(
        config: EngineConfig,
        generator: Arc<dyn NarrativeGenerator>,
        index: Arc<dyn SemanticIndex>,
        directory: Arc<ParticipantDirectory>,
    ) -> CouncilResult<Self> {
        config.validate()?;

        let bus = Arc::new(NotificationBus::new(config.notification_capacity));
        let decision_cache = Arc::new(DecisionCache::new(
            "decision",
            Duration::from_secs(config.cache.decision_ttl_secs),
        ));
        let response_cache = Arc::new(ResponseCache::new(
            "response",
            Duration::from_secs(config.cache.response_ttl_secs),
        ));

        let narrator = NarrativeClient::new(generator, response_cache.clone(), &config.deliberation);
        let simulator = Arc::new(DecisionRoundSimulator::new(
            narrator,
            directory.clone(),
            index.clone(),
            bus.clone(),
            config.deliberation.clone(),
        ));
        let selector =
            ParticipantSelector::new(index.clone(), directory.clone(), config.selection.clone());

        tracing::info!(
            max_rounds = config.deliberation.max_rounds,
            consensus_threshold = config.deliberation.min_consensus_threshold,
            merge_threshold = config.merge.similarity_threshold,
            "Session orchestrator created"
        );

        Ok(Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            directory,
            index,
            selector,
            simulator,
            decision_cache,
            response_cache,
            bus,
            interactions: RwLock::new(VecDeque::new()),
            deliberations: Arc::new(DashMap::new()),
        })
    }

    /// Self-contained engine: template narrator, in-memory index, and the
    /// default expert directory
    pub fn in_memory(config: EngineConfig) -> CouncilResult<Self> {
        Self::new(
            config,
            Arc::new(TemplateNarrator),
            Arc::new(InMemorySemanticIndex::default()),
            Arc::new(ParticipantDirectory::with_default_experts()),
        )
    }

    /// Start a session for `event`, or fold it into a compatible one
    ///
    /// Returns the id of the session now responsible for the event.
    pub async fn initiate(&self, event: Event) -> CouncilResult<SessionId> {
        event.validate()?;

        if let Some(session_id) = self.try_merge(&event).await {
            return Ok(session_id);
        }

        let participants = self.selector.select(&event).await;
        let mut session = CollaborationSession::new(event, participants);

        let initial = SessionStatus::initial_for(session.event.status);
        let action = match initial {
            SessionStatus::Scheduled => "session_scheduled",
            SessionStatus::Implementing => "implementation_started",
            SessionStatus::Reviewing => "review_started",
            _ => "discussion_started",
        };
        let details = json!({ "event_status": session.event.status });
        session.transition(initial, action, details)?;

        let session_id = session.id.clone();
        let event_id = session.event_id.clone();
        let participants = session.participants.clone();
        let handle = self.registry.insert(session);

        tracing::info!(
            session_id = %session_id,
            event_id = %event_id,
            status = %initial,
            participants = participants.len(),
            "Session initiated"
        );
        self.bus.publish(Notification::SessionCreated {
            session_id: session_id.clone(),
            event_id,
            status: initial,
            participants,
        });
        self.bus.publish(Notification::StatusChanged {
            session_id: session_id.clone(),
            from: SessionStatus::Planning,
            to: initial,
        });

        if initial == SessionStatus::Discussing && self.config.deliberation.autostart {
            self.spawn_deliberation(session_id.clone(), handle);
        }
        Ok(session_id)
    }

    /// Merge into the first eligible session, checked under its own lock
    async fn try_merge(&self, event: &Event) -> Option<SessionId> {
        let threshold = self.config.merge.similarity_threshold;

        for (session_id, handle) in self.registry.handles() {
            let mut session = handle.lock().await;
            if !similarity::is_merge_eligible(&session, event, threshold) {
                continue;
            }
            let score = similarity::score(&session, event);

            let added = session.add_participants(&event.required_participants);
            if session.event_id != event.id && !session.merged_event_ids.contains(&event.id) {
                session.merged_event_ids.push(event.id.clone());
            }
            session.record(
                "session_merged",
                json!({
                    "event_id": event.id,
                    "score": score,
                    "added_participants": added,
                }),
            );

            tracing::info!(
                session_id = %session_id,
                event_id = %event.id,
                score,
                added = added.len(),
                "Event merged into existing session"
            );
            self.bus.publish(Notification::SessionMerged {
                session_id: session_id.clone(),
                event_id: event.id.clone(),
                score,
                added_participants: added,
            });
            return Some(session_id);
        }
        None
    }

    fn spawn_deliberation(&self, session_id: SessionId, handle: SessionHandle) {
        // A loop that finished before its handle was stored leaves a stale entry.
        self.deliberations.retain(|_, task| !task.is_finished());

        let simulator = self.simulator.clone();
        let deliberations = self.deliberations.clone();
        let id = session_id.clone();
        let task = tokio::spawn(async move {
            simulator.run(&handle).await;
            deliberations.remove(&id);
        });
        self.deliberations.insert(session_id, task);
    }

    /// Wait for a session's background round loop to finish
    ///
    /// Returns immediately when no loop is running for the session.
    pub async fn join_deliberation(&self, session_id: &SessionId) -> CouncilResult<()> {
        match self.deliberations.remove(session_id) {
            Some((_, task)) => task.await.map_err(|err| {
                CouncilError::Internal(format!(
                    "deliberation task for {} aborted: {}",
                    session_id, err
                ))
            }),
            None if self.registry.contains(session_id) => Ok(()),
            None => Err(CouncilError::SessionNotFound(session_id.clone())),
        }
    }

    /// Current view of a session; failure is reported in the view, not as
    /// an error
    pub async fn get_status(&self, session_id: &SessionId) -> CouncilResult<SessionView> {
        self.registry.view(session_id).await
    }

    /// Views of every active session
    pub async fn list(&self) -> Vec<SessionView> {
        self.registry.views().await
    }

    /// Start discussing a session that was deferred as `scheduled`
    pub async fn activate(&self, session_id: &SessionId) -> CouncilResult<()> {
        let handle = self.registry.require(session_id)?;
        {
            let mut session = handle.lock().await;
            let from = session.status;
            session.transition(
                SessionStatus::Discussing,
                "discussion_started",
                json!({ "activated_from": from }),
            )?;
            tracing::info!(session_id = %session_id, from = %from, "Session activated");
            self.bus.publish(Notification::StatusChanged {
                session_id: session_id.clone(),
                from,
                to: SessionStatus::Discussing,
            });
        }

        if self.config.deliberation.autostart {
            self.spawn_deliberation(session_id.clone(), handle);
        }
        Ok(())
    }

    /// Step a post-decision session: implementing -> reviewing -> completed
    pub async fn advance(&self, session_id: &SessionId) -> CouncilResult<SessionStatus> {
        let handle = self.registry.require(session_id)?;
        let mut session = handle.lock().await;
        let from = session.status;
        let (next, action) = match from {
            SessionStatus::Implementing => (SessionStatus::Reviewing, "review_started"),
            SessionStatus::Reviewing => (SessionStatus::Completed, "review_completed"),
            _ => {
                return Err(CouncilError::InvalidTransition {
                    session: session_id.clone(),
                    from,
                    to: SessionStatus::Reviewing,
                })
            }
        };
        session.transition(next, action, serde_json::Value::Null)?;

        tracing::info!(session_id = %session_id, from = %from, to = %next, "Session advanced");
        self.bus.publish(Notification::StatusChanged {
            session_id: session_id.clone(),
            from,
            to: next,
        });
        Ok(next)
    }

    /// Polled decision entry point
    ///
    /// A poll with unchanged session state is answered from the decision
    /// cache without running anything. Otherwise a discussing session runs
    /// exactly one round; any other session returns its latest decision.
    pub async fn deliberate(&self, session_id: &SessionId) -> CouncilResult<Option<Decision>> {
        let handle = self.registry.require(session_id)?;
        let (fingerprint, status, latest) = {
            let session = handle.lock().await;
            (
                decision_fingerprint(&session),
                session.status,
                session.latest_decision().cloned(),
            )
        };

        if let Some(cached) = self.decision_cache.get(&fingerprint) {
            tracing::debug!(session_id = %session_id, "Decision served from cache");
            return Ok(Some(cached));
        }
        if status != SessionStatus::Discussing {
            return Ok(latest);
        }

        match self.simulator.run_round(&handle).await {
            Ok(outcome) => {
                let session = handle.lock().await;
                match outcome.decision() {
                    Some(decision) => {
                        self.decision_cache
                            .put(decision_fingerprint(&session), decision.clone());
                        Ok(Some(decision.clone()))
                    }
                    None => Ok(session.latest_decision().cloned()),
                }
            }
            Err(err) => {
                self.simulator.fail_with_error(&handle, &err).await;
                Ok(handle.lock().await.latest_decision().cloned())
            }
        }
    }

    /// Record a direct exchange between two participants
    pub async fn record_interaction(
        &self,
        initiator: ParticipantId,
        responder: ParticipantId,
        content: impl Into<String>,
    ) -> CouncilResult<InteractionRecord> {
        let mut record = InteractionRecord::new(initiator, responder, content)?;
        record.topics = infer_topics(&record.content);
        record.sentiment = sentiment(&record.content);

        {
            let mut interactions = self.interactions.write().await;
            if interactions.len() >= self.config.interaction_capacity {
                interactions.pop_front();
            }
            interactions.push_back(record.clone());
        }

        tracing::debug!(
            interaction_id = %record.id,
            initiator = %record.initiator,
            responder = %record.responder,
            sentiment = record.sentiment,
            "Interaction recorded"
        );
        self.bus.publish(Notification::InteractionRecorded {
            record: record.clone(),
        });
        Ok(record)
    }

    /// Interactions involving `participant`, oldest first
    pub async fn interactions_for(&self, participant: &ParticipantId) -> Vec<InteractionRecord> {
        self.interactions
            .read()
            .await
            .iter()
            .filter(|r| r.involves(participant))
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEnvelope> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> Arc<NotificationBus> {
        self.bus.clone()
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    pub fn directory(&self) -> Arc<ParticipantDirectory> {
        self.directory.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Statistics of the decision and response caches
    pub fn cache_stats(&self) -> (CacheStats, CacheStats) {
        (self.decision_cache.stats(), self.response_cache.stats())
    }

    /// Lifecycle sweeper sharing this engine's state
    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            self.config.sweeper.clone(),
            self.registry.clone(),
            self.index.clone(),
            self.decision_cache.clone(),
            self.response_cache.clone(),
            self.bus.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use council_types::{EventCategory, EventId, EventStatus, ImpactVector};

    fn engine() -> SessionOrchestrator {
        let mut config = EngineConfig::without_delays();
        config.deliberation.rng_seed = Some(1);
        SessionOrchestrator::in_memory(config).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.deliberation.supporter_quota = 2.0;
        assert!(matches!(
            SessionOrchestrator::in_memory(config),
            Err(CouncilError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_event_is_rejected() {
        let engine = engine();
        let event = Event::new("", "Untitled", EventCategory::Social);
        assert!(matches!(
            engine.initiate(event).await,
            Err(CouncilError::Validation(_))
        ));
        assert!(engine.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let engine = engine();
        let missing = SessionId::new("missing");
        assert!(matches!(
            engine.get_status(&missing).await,
            Err(CouncilError::SessionNotFound(_))
        ));
        assert!(matches!(
            engine.deliberate(&missing).await,
            Err(CouncilError::SessionNotFound(_))
        ));
        assert!(matches!(
            engine.join_deliberation(&missing).await,
            Err(CouncilError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_scheduled_session_waits_for_activation() {
        let engine = engine();
        let event = Event::new("e1", "Street fair", EventCategory::Cultural)
            .with_status(EventStatus::Scheduled);
        let id = engine.initiate(event).await.unwrap();

        let view = engine.get_status(&id).await.unwrap();
        assert_eq!(view.status, SessionStatus::Scheduled);
        assert_eq!(view.message_count, 0);

        engine.activate(&id).await.unwrap();
        engine.join_deliberation(&id).await.unwrap();
        let view = engine.get_status(&id).await.unwrap();
        assert_eq!(view.status, SessionStatus::Completed);

        assert!(matches!(
            engine.activate(&id).await,
            Err(CouncilError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_in_progress_event_advances_through_review() {
        let engine = engine();
        let event = Event::new("e1", "Park renovation", EventCategory::Environmental)
            .with_status(EventStatus::InProgress);
        let id = engine.initiate(event).await.unwrap();

        assert_eq!(
            engine.get_status(&id).await.unwrap().status,
            SessionStatus::Implementing
        );
        assert_eq!(engine.advance(&id).await.unwrap(), SessionStatus::Reviewing);
        assert_eq!(engine.advance(&id).await.unwrap(), SessionStatus::Completed);
        assert!(engine.advance(&id).await.is_err());
    }

    fn scheduled(id: &str, title: &str, category: EventCategory) -> Event {
        Event::new(id, title, category).with_status(EventStatus::Scheduled)
    }

    #[tokio::test]
    async fn test_events_without_impact_estimates_stay_apart() {
        let engine = engine();
        let flood = engine
            .initiate(scheduled("e1", "Flood", EventCategory::Emergency))
            .await
            .unwrap();
        let parade = engine
            .initiate(scheduled("e2", "Street parade", EventCategory::Cultural))
            .await
            .unwrap();

        assert_ne!(flood, parade);
        assert_eq!(engine.list().await.len(), 2);
    }

    #[tokio::test]
    async fn test_merge_prefers_oldest_eligible_session() {
        let engine = engine();
        let zeta = engine
            .initiate(
                scheduled("zeta", "Water main break", EventCategory::Emergency)
                    .with_locations(&["d1"])
                    .with_impact(ImpactVector::new(0.2, 0.2, 0.2)),
            )
            .await
            .unwrap();
        let alpha = engine
            .initiate(
                scheduled("alpha", "Power cut", EventCategory::Emergency)
                    .with_locations(&["d1"])
                    .with_impact(ImpactVector::new(0.8, 0.8, 0.8)),
            )
            .await
            .unwrap();
        assert_ne!(zeta, alpha);

        // Equally similar to both sessions (location 1, impact 0.7).
        let merged = engine
            .initiate(
                scheduled("omega", "Road closure", EventCategory::Emergency)
                    .with_locations(&["d1"])
                    .with_impact(ImpactVector::new(0.5, 0.5, 0.5)),
            )
            .await
            .unwrap();
        assert_eq!(merged, zeta);

        let view = engine.get_status(&zeta).await.unwrap();
        assert_eq!(view.merged_event_ids, vec![EventId::new("omega")]);
    }

    #[tokio::test]
    async fn test_finished_deliberations_are_released() {
        let engine = engine();
        let id = engine
            .initiate(Event::new("e1", "Flash flood", EventCategory::Emergency))
            .await
            .unwrap();

        for _ in 0..200 {
            if engine.deliberations.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(engine.deliberations.is_empty());
        assert_eq!(
            engine.get_status(&id).await.unwrap().status,
            SessionStatus::Completed
        );

        let archived = engine
            .sweeper()
            .archive_terminal(chrono::Utc::now() + chrono::Duration::hours(25))
            .await;
        assert_eq!(archived, vec![id.clone()]);
        assert!(engine.deliberations.is_empty());
        assert!(engine.registry().is_empty());
        assert!(matches!(
            engine.join_deliberation(&id).await,
            Err(CouncilError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_interaction_ledger_drops_oldest_at_capacity() {
        let mut config = EngineConfig::without_delays();
        config.interaction_capacity = 2;
        let engine = SessionOrchestrator::in_memory(config).unwrap();

        for content in ["first", "second", "third"] {
            engine
                .record_interaction(ParticipantId::new("a"), ParticipantId::new("b"), content)
                .await
                .unwrap();
        }

        let kept: Vec<_> = engine
            .interactions_for(&ParticipantId::new("a"))
            .await
            .into_iter()
            .map(|r| r.content)
            .collect();
        assert_eq!(kept, vec!["second".to_string(), "third".to_string()]);
    }

    #[tokio::test]
    async fn test_record_interaction_infers_topics_and_sentiment() {
        let engine = engine();
        let mut receiver = engine.subscribe();

        let record = engine
            .record_interaction(
                ParticipantId::new("a"),
                ParticipantId::new("b"),
                "I agree, the bridge repair budget needs support",
            )
            .await
            .unwrap();
        assert!(record.topics.contains(&"infrastructure".to_string()));
        assert!(record.topics.contains(&"budget".to_string()));
        assert!(record.sentiment > 0.0);

        let envelope = receiver.recv().await.unwrap();
        assert_eq!(envelope.notification.kind(), "interaction_recorded");

        assert_eq!(engine.interactions_for(&ParticipantId::new("b")).await.len(), 1);
        assert!(engine.interactions_for(&ParticipantId::new("c")).await.is_empty());

        assert!(matches!(
            engine
                .record_interaction(ParticipantId::new("a"), ParticipantId::new("a"), "hi")
                .await,
            Err(CouncilError::Validation(_))
        ));
    }
}
