//! Decision Round Simulator
//!
//! Drives the discussion of a `discussing` session. A round snapshots the
//! session, releases its lock, gathers one narrative message per
//! participant concurrently, then re-locks to append the messages and a
//! synthesized decision. The lock is never held across a delay or an
//! external call, so sweeps can interleave with a running round.

use crate::config::DeliberationConfig;
use crate::directory::ParticipantDirectory;
use crate::external::{Metadata, SemanticIndex};
use crate::narrator::NarrativeClient;
use crate::notify::{Notification, NotificationBus};
use crate::registry::SessionHandle;
use crate::selector::COLLABORATION_KIND;
use crate::topics::{infer_topics, sentiment};
use council_types::{
    CouncilError, CouncilResult, Decision, DecisionStatus, Event, EventCategory, Message,
    ParticipantId, SessionId, SessionStatus,
};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Prior messages included in each narrative prompt
const PROMPT_HISTORY: usize = 6;

/// Result of one executed round
#[derive(Debug, Clone, PartialEq)]
pub enum RoundOutcome {
    /// Threshold met; the session is now `completed`
    Consensus(Decision),
    /// Threshold missed with rounds remaining
    Continue(Decision),
    /// Threshold missed on the last round; the session is now `failed`
    Exhausted(Decision),
    /// The session was no longer discussing, nothing was appended
    Halted,
}

impl RoundOutcome {
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            RoundOutcome::Consensus(d) | RoundOutcome::Continue(d) | RoundOutcome::Exhausted(d) => {
                Some(d)
            }
            RoundOutcome::Halted => None,
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, RoundOutcome::Continue(_))
    }
}

/// State read under the lock at the start of a round
struct RoundSnapshot {
    session_id: SessionId,
    event: Event,
    participants: Vec<ParticipantId>,
    recent: Vec<Message>,
    round: u32,
}

/// Runs discussion rounds against sessions in the registry
pub struct DecisionRoundSimulator {
    narrator: NarrativeClient,
    directory: Arc<ParticipantDirectory>,
    index: Arc<dyn SemanticIndex>,
    bus: Arc<NotificationBus>,
    config: DeliberationConfig,
    rng: Mutex<StdRng>,
}

impl DecisionRoundSimulator {
    pub fn new(
        narrator: NarrativeClient,
        directory: Arc<ParticipantDirectory>,
        index: Arc<dyn SemanticIndex>,
        bus: Arc<NotificationBus>,
        config: DeliberationConfig,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            narrator,
            directory,
            index,
            bus,
            config,
            rng: Mutex::new(rng),
        }
    }

    /// Run rounds until consensus, exhaustion, or the session leaves
    /// `discussing`. Errors become a `failed` session with an `error` entry.
    pub async fn run(&self, handle: &SessionHandle) {
        loop {
            match self.run_round(handle).await {
                Ok(outcome) if outcome.is_final() => break,
                Ok(_) => continue,
                Err(err) => {
                    self.fail_with_error(handle, &err).await;
                    break;
                }
            }
        }
    }

    /// Execute a single round
    pub async fn run_round(&self, handle: &SessionHandle) -> CouncilResult<RoundOutcome> {
        let snapshot = {
            let session = handle.lock().await;
            if session.status != SessionStatus::Discussing {
                return Ok(RoundOutcome::Halted);
            }
            let round = session.decisions.len() as u32 + 1;
            if round > self.config.max_rounds {
                return Ok(RoundOutcome::Halted);
            }
            let skip = session.messages.len().saturating_sub(PROMPT_HISTORY);
            RoundSnapshot {
                session_id: session.id.clone(),
                event: session.event.clone(),
                participants: session.participants.clone(),
                recent: session.messages[skip..].to_vec(),
                round,
            }
        };

        if snapshot.participants.is_empty() {
            return Err(CouncilError::Internal(format!(
                "session {} has no participants to tally",
                snapshot.session_id
            )));
        }

        let delay = self.response_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let contributions = self.gather_messages(&snapshot).await;
        let description = self.propose(&snapshot).await;

        let outcome = {
            let mut session = handle.lock().await;
            // A sweep or a concurrent round may have moved the session on.
            let round = session.decisions.len() as u32 + 1;
            if session.status != SessionStatus::Discussing || round > self.config.max_rounds {
                return Ok(RoundOutcome::Halted);
            }

            for (participant, content) in contributions {
                let topics = infer_topics(&content);
                tracing::debug!(
                    session_id = %session.id,
                    participant = %participant,
                    sentiment = sentiment(&content),
                    topics = ?topics,
                    "Message recorded"
                );
                session.append_message(participant, content, topics);
            }

            let participant_count = session.participants.len();
            let quota = (self.config.supporter_quota * participant_count as f64).ceil() as usize;
            let supporters: Vec<ParticipantId> = session
                .participants
                .iter()
                .take(quota.min(participant_count))
                .cloned()
                .collect();
            let consensus = supporters.len() as f64 / participant_count as f64;
            let reached = consensus >= self.config.min_consensus_threshold;
            let last_round = round >= self.config.max_rounds;

            let decision = Decision {
                description,
                proposed_by: session.participants[0].clone(),
                supported_by: supporters,
                priority: self.draw_priority(),
                impact: session.event.impact.clone(),
                implementation_plan: implementation_plan(session.event.category),
                status: if reached {
                    DecisionStatus::Approved
                } else if last_round {
                    DecisionStatus::Rejected
                } else {
                    DecisionStatus::Proposed
                },
                round,
                timestamp: chrono::Utc::now(),
            };

            let consensus_level = session.append_decision(decision.clone());
            // Pick up the log timestamp assigned on append.
            let decision = session.latest_decision().cloned().unwrap_or(decision);
            for supporter in &decision.supported_by {
                *session
                    .metrics
                    .participation_score
                    .entry(supporter.clone())
                    .or_insert(0.0) += 1.0;
            }
            session.metrics.progress_rate += self.config.progress_step;
            session.metrics.effectiveness =
                (session.metrics.effectiveness + self.config.effectiveness_step).min(1.0);
            session.record(
                "decision_proposed",
                json!({ "round": round, "consensus_level": consensus_level }),
            );

            tracing::debug!(
                session_id = %session.id,
                round,
                consensus_level,
                supporters = decision.supported_by.len(),
                "Decision proposed"
            );
            self.bus.publish(Notification::DecisionProposed {
                session_id: session.id.clone(),
                round,
                decision: decision.clone(),
                consensus_level,
            });

            if reached {
                session.transition(
                    SessionStatus::Completed,
                    "consensus_reached",
                    json!({ "round": round, "consensus_level": consensus_level }),
                )?;
                tracing::info!(session_id = %session.id, round, consensus_level, "Consensus reached");
                self.bus.publish(Notification::StatusChanged {
                    session_id: session.id.clone(),
                    from: SessionStatus::Discussing,
                    to: SessionStatus::Completed,
                });
                self.bus.publish(Notification::ConsensusReached {
                    session_id: session.id.clone(),
                    round,
                    consensus_level,
                });
                RoundOutcome::Consensus(decision)
            } else if last_round {
                session.transition(
                    SessionStatus::Failed,
                    "consensus_failed",
                    json!({ "rounds": round, "consensus_level": consensus_level }),
                )?;
                tracing::info!(session_id = %session.id, rounds = round, "Consensus not reached");
                self.bus.publish(Notification::SessionFailed {
                    session_id: session.id.clone(),
                    reason: "consensus_failed".into(),
                });
                RoundOutcome::Exhausted(decision)
            } else {
                RoundOutcome::Continue(decision)
            }
        };

        if let RoundOutcome::Consensus(decision) = &outcome {
            self.record_collaboration(&snapshot, decision).await;
        }
        Ok(outcome)
    }

    /// Mark the session failed with an `error` entry, unless already terminal
    pub async fn fail_with_error(&self, handle: &SessionHandle, err: &CouncilError) {
        let mut session = handle.lock().await;
        if session.fail("error", json!({ "message": err.to_string() })) {
            tracing::error!(session_id = %session.id, error = %err, "Deliberation failed");
            self.bus.publish(Notification::SessionFailed {
                session_id: session.id.clone(),
                reason: "error".into(),
            });
        }
    }

    async fn gather_messages(&self, snapshot: &RoundSnapshot) -> Vec<(ParticipantId, String)> {
        let calls = snapshot.participants.iter().map(|participant| async move {
            let context = self.directory.context_for(participant);
            let prompt = message_prompt(snapshot, &context.display_name, self.config.max_rounds);
            let text = self
                .narrator
                .generate_or(&prompt, &context, || {
                    format!(
                        "{} supports a coordinated {} response to {}.",
                        context.display_name, snapshot.event.category, snapshot.event.title
                    )
                })
                .await;
            (participant.clone(), text)
        });
        join_all(calls).await
    }

    async fn propose(&self, snapshot: &RoundSnapshot) -> String {
        let proposer = &snapshot.participants[0];
        let context = self.directory.context_for(proposer);
        let prompt = format!(
            "Event: {}\nCategory: {}\nRound {}: as {}, propose one concrete decision the group can support.",
            snapshot.event.title, snapshot.event.category, snapshot.round, context.display_name
        );
        self.narrator
            .generate_or(&prompt, &context, || {
                format!(
                    "Coordinated {} response to {}",
                    snapshot.event.category, snapshot.event.title
                )
            })
            .await
    }

    /// Store the successful collaboration for future participant selection
    async fn record_collaboration(&self, snapshot: &RoundSnapshot, decision: &Decision) {
        let mut metadata = Metadata::new();
        metadata.insert("kind".into(), json!(COLLABORATION_KIND));
        metadata.insert("category".into(), json!(snapshot.event.category.as_str()));
        metadata.insert("session_id".into(), json!(snapshot.session_id));
        metadata.insert("event_id".into(), json!(snapshot.event.id));
        metadata.insert("participants".into(), json!(snapshot.participants));
        metadata.insert("successful".into(), json!(decision.supported_by));
        metadata.insert("decision".into(), json!(decision.description));

        let id = format!("collaboration:{}", snapshot.session_id);
        let result = async {
            let vector = self.index.embed(&snapshot.event.embedding_text()).await?;
            self.index.upsert(&id, vector, metadata).await
        }
        .await;

        if let Err(err) = result {
            tracing::warn!(
                session_id = %snapshot.session_id,
                error = %err,
                "Failed to record collaboration history"
            );
        }
    }

    fn response_delay(&self) -> Duration {
        let (min, max) = (
            self.config.response_delay_min_ms,
            self.config.response_delay_max_ms,
        );
        if max == 0 {
            return Duration::ZERO;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        Duration::from_millis(rng.gen_range(min..=max))
    }

    fn draw_priority(&self) -> f64 {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_range(0.0..=1.0)
    }
}

fn message_prompt(snapshot: &RoundSnapshot, speaker: &str, max_rounds: u32) -> String {
    let event = &snapshot.event;
    let mut prompt = format!(
        "Event: {}\nCategory: {}\nSeverity: {:.2} Urgency: {:.2}\n",
        event.title, event.category, event.severity, event.urgency
    );
    if !event.description.is_empty() {
        prompt.push_str(&format!("Description: {}\n", event.description));
    }
    if !event.affected_locations.is_empty() {
        prompt.push_str(&format!("Locations: {}\n", event.affected_locations.join(", ")));
    }
    prompt.push_str(&format!("Round {} of {}\n", snapshot.round, max_rounds));
    if !snapshot.recent.is_empty() {
        prompt.push_str("Recent discussion:\n");
        for message in &snapshot.recent {
            prompt.push_str(&format!("- {}: {}\n", message.participant_id, message.content));
        }
    }
    prompt.push_str(&format!(
        "You are {}. Share your position in two sentences.",
        speaker
    ));
    prompt
}

fn implementation_plan(category: EventCategory) -> Vec<String> {
    let steps: &[&str] = match category {
        EventCategory::Emergency => &[
            "Dispatch responders to affected locations",
            "Open shelters and medical triage",
            "Publish hourly status updates",
        ],
        EventCategory::Community => &[
            "Hold a neighborhood meeting",
            "Form a volunteer working group",
            "Report outcomes to residents",
        ],
        EventCategory::Development => &[
            "Commission a feasibility assessment",
            "Run a public consultation",
            "Phase construction with milestones",
        ],
        EventCategory::Cultural => &[
            "Confirm venue and programme",
            "Coordinate with local artists",
            "Promote through community channels",
        ],
        EventCategory::Social => &[
            "Identify affected groups",
            "Allocate support services",
            "Review impact after one month",
        ],
        EventCategory::Transport => &[
            "Publish detours and service changes",
            "Deploy traffic management",
            "Restore normal service and review",
        ],
        EventCategory::Environmental => &[
            "Assess environmental damage",
            "Contain and remediate",
            "Monitor recovery indicators",
        ],
    };
    steps.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseCache;
    use crate::config::EngineConfig;
    use crate::external::{NarrativeGenerator, ParticipantContext};
    use crate::narrator::TemplateNarrator;
    use crate::semantic::InMemorySemanticIndex;
    use async_trait::async_trait;
    use council_types::{CollaborationSession, ExternalError, ExternalResult};

    struct Unavailable;

    #[async_trait]
    impl NarrativeGenerator for Unavailable {
        async fn generate(&self, _prompt: &str, _context: &ParticipantContext) -> ExternalResult<String> {
            Err(ExternalError::Unavailable("offline".into()))
        }
    }

    fn simulator(
        generator: Arc<dyn NarrativeGenerator>,
        config: DeliberationConfig,
    ) -> (DecisionRoundSimulator, Arc<InMemorySemanticIndex>) {
        let index = Arc::new(InMemorySemanticIndex::default());
        let cache = Arc::new(ResponseCache::new("response", Duration::from_secs(1800)));
        let narrator = NarrativeClient::new(generator, cache, &config);
        let simulator = DecisionRoundSimulator::new(
            narrator,
            Arc::new(ParticipantDirectory::with_default_experts()),
            index.clone(),
            Arc::new(NotificationBus::new(64)),
            config,
        );
        (simulator, index)
    }

    fn quick_config() -> DeliberationConfig {
        let mut config = EngineConfig::without_delays().deliberation;
        config.rng_seed = Some(7);
        config
    }

    fn discussing(participants: &[&str]) -> SessionHandle {
        let event = Event::new("e1", "Flood", EventCategory::Emergency);
        let mut session = CollaborationSession::new(
            event,
            participants.iter().map(|p| ParticipantId::new(*p)).collect(),
        );
        session
            .transition(SessionStatus::Discussing, "discussion_started", serde_json::Value::Null)
            .unwrap();
        Arc::new(tokio::sync::Mutex::new(session))
    }

    #[tokio::test]
    async fn test_three_participants_complete_in_one_round() {
        let (simulator, index) = simulator(Arc::new(TemplateNarrator), quick_config());
        let handle = discussing(&["a", "b", "c"]);

        simulator.run(&handle).await;

        let session = handle.lock().await;
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.messages.len(), 3);
        assert_eq!(session.decisions.len(), 1);
        assert_eq!(session.metrics.consensus_level, 1.0);
        assert_eq!(session.decisions[0].status, DecisionStatus::Approved);
        assert_eq!(session.history.last().unwrap().action, "consensus_reached");
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_threshold_above_quota_exhausts_rounds() {
        let mut config = quick_config();
        config.min_consensus_threshold = 0.9;
        let (simulator, _) = simulator(Arc::new(TemplateNarrator), config);
        let handle = discussing(&["a", "b", "c", "d", "e"]);

        simulator.run(&handle).await;

        let session = handle.lock().await;
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.decisions.len(), 2);
        assert_eq!(session.decisions[1].status, DecisionStatus::Rejected);
        assert_eq!(session.metrics.consensus_level, 0.8);
        assert_eq!(session.metrics.participation_score[&ParticipantId::new("a")], 2.0);
        assert_eq!(session.metrics.participation_score[&ParticipantId::new("e")], 0.0);
        let last = session.history.last().unwrap();
        assert_eq!(last.action, "consensus_failed");
        assert_eq!(last.details["rounds"], 2);
    }

    #[tokio::test]
    async fn test_narrative_failure_uses_fallback_text() {
        let (simulator, _) = simulator(Arc::new(Unavailable), quick_config());
        let handle = discussing(&["a", "b"]);

        simulator.run(&handle).await;

        let session = handle.lock().await;
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(
            session.messages[0].content,
            "a supports a coordinated emergency response to Flood."
        );
        assert_eq!(
            session.decisions[0].description,
            "Coordinated emergency response to Flood"
        );
    }

    #[tokio::test]
    async fn test_round_on_terminal_session_is_halted() {
        let (simulator, _) = simulator(Arc::new(TemplateNarrator), quick_config());
        let handle = discussing(&["a"]);
        handle.lock().await.fail("timeout", serde_json::Value::Null);

        assert_eq!(simulator.run_round(&handle).await.unwrap(), RoundOutcome::Halted);
        assert!(handle.lock().await.messages.is_empty());
    }

    #[tokio::test]
    async fn test_empty_participants_fail_with_error() {
        let (simulator, _) = simulator(Arc::new(TemplateNarrator), quick_config());
        let handle = discussing(&[]);

        simulator.run(&handle).await;

        let session = handle.lock().await;
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.history.last().unwrap().action, "error");
    }

    #[test]
    fn test_prompt_carries_recent_discussion() {
        let snapshot = RoundSnapshot {
            session_id: SessionId::new("s1"),
            event: Event::new("e1", "Flood", EventCategory::Emergency).with_locations(&["d1"]),
            participants: vec![ParticipantId::new("a")],
            recent: vec![Message {
                participant_id: ParticipantId::new("b"),
                content: "Evacuate now".into(),
                timestamp: chrono::Utc::now(),
                topics: vec![],
            }],
            round: 2,
        };
        let prompt = message_prompt(&snapshot, "Alice", 2);
        assert!(prompt.starts_with("Event: Flood\n"));
        assert!(prompt.contains("Locations: d1"));
        assert!(prompt.contains("Round 2 of 2"));
        assert!(prompt.contains("- b: Evacuate now"));
        assert!(prompt.ends_with("You are Alice. Share your position in two sentences."));
    }
}
