//! Collaboration sessions
//!
//! A session is one negotiation instance tied to a triggering event. All of
//! its logs are append-only; the history log is the canonical source from
//! which every status transition and merge can be reconstructed.

use crate::{
    CouncilError, CouncilResult, Event, EventId, EventStatus, ImpactVector, ParticipantId,
    SessionId,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Session lifecycle state
///
/// ```text
/// planning ──▶ discussing ──▶ completed | failed
///    │              ▲
///    ├──▶ scheduled ┘ (explicit activation only)
///    ├──▶ implementing ──▶ reviewing ──▶ completed
///    └──▶ failed (from any non-terminal state)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Planning,
    Scheduled,
    Discussing,
    Implementing,
    Reviewing,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Completed | Failed, _) => false,
            (_, Failed) => true,
            (Planning, Discussing | Scheduled | Implementing | Reviewing) => true,
            (Scheduled, Discussing) => true,
            (Discussing, Completed) => true,
            (Implementing, Reviewing) => true,
            (Reviewing, Completed) => true,
            _ => false,
        }
    }

    /// Status a freshly created session moves to, mapped once from the
    /// status its event carried at creation time
    pub fn initial_for(event_status: EventStatus) -> SessionStatus {
        match event_status {
            EventStatus::Pending => SessionStatus::Discussing,
            EventStatus::Scheduled => SessionStatus::Scheduled,
            EventStatus::InProgress => SessionStatus::Implementing,
            EventStatus::Completed => SessionStatus::Reviewing,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Planning => "planning",
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Discussing => "discussing",
            SessionStatus::Implementing => "implementing",
            SessionStatus::Reviewing => "reviewing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One narrative contribution to a session's discussion
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub participant_id: ParticipantId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
}

/// Outcome of a proposed decision
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    Proposed,
    Approved,
    Rejected,
}

/// A proposal synthesized at the end of a discussion round
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub description: String,
    pub proposed_by: ParticipantId,
    pub supported_by: Vec<ParticipantId>,
    pub priority: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<ImpactVector>,
    pub implementation_plan: Vec<String>,
    pub status: DecisionStatus,
    pub round: u32,
    pub timestamp: DateTime<Utc>,
}

impl Decision {
    /// Ratio of supporters to the given participant count
    pub fn support_ratio(&self, participant_count: usize) -> f64 {
        if participant_count == 0 {
            return 0.0;
        }
        self.supported_by.len() as f64 / participant_count as f64
    }
}

/// Audit record of something that happened to a session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

/// Derived session metrics
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionMetrics {
    /// Support ratio of the latest decision
    pub consensus_level: f64,
    /// Incremented once per completed round
    pub progress_rate: f64,
    /// Bounded accumulator in [0, 1]
    pub effectiveness: f64,
    pub participation_score: BTreeMap<ParticipantId, f64>,
    pub topics_analyzed: usize,
    pub consensus_history: Vec<f64>,
    pub average_consensus: f64,
}

/// The central negotiation entity
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollaborationSession {
    pub id: SessionId,
    pub event_id: EventId,
    /// Snapshot of the originating event, used for similarity scoring
    pub event: Event,
    /// Events folded into this session by merge
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_event_ids: Vec<EventId>,
    pub participants: Vec<ParticipantId>,
    pub status: SessionStatus,
    pub messages: Vec<Message>,
    pub decisions: Vec<Decision>,
    pub metrics: SessionMetrics,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
}

impl CollaborationSession {
    /// Create a session in `planning` with a single creation history entry
    pub fn new(event: Event, participants: Vec<ParticipantId>) -> Self {
        let created_at = Utc::now();
        let participants = dedup_preserving_order(participants);
        let metrics = SessionMetrics {
            participation_score: participants.iter().map(|p| (p.clone(), 0.0)).collect(),
            ..SessionMetrics::default()
        };

        let mut session = Self {
            id: SessionId::derive(&event.id, created_at),
            event_id: event.id.clone(),
            event,
            merged_event_ids: Vec::new(),
            participants,
            status: SessionStatus::Planning,
            messages: Vec::new(),
            decisions: Vec::new(),
            metrics,
            history: Vec::new(),
            created_at,
        };
        session.record(
            "session_created",
            serde_json::json!({
                "event_id": session.event_id,
                "category": session.event.category,
                "participants": session.participants,
            }),
        );
        session
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Timestamp of the latest history entry
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.history
            .last()
            .map(|h| h.timestamp)
            .unwrap_or(self.created_at)
    }

    /// Append an audit entry
    pub fn record(&mut self, action: impl Into<String>, details: Value) {
        let timestamp = next_timestamp(self.history.last().map(|h| h.timestamp));
        self.history.push(HistoryEntry {
            action: action.into(),
            timestamp,
            details,
        });
    }

    /// Move to `next`, logging the transition under `action`
    pub fn transition(
        &mut self,
        next: SessionStatus,
        action: impl Into<String>,
        details: Value,
    ) -> CouncilResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CouncilError::InvalidTransition {
                session: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.record(action, details);
        Ok(())
    }

    /// Move to `failed` unless already terminal. Returns whether the
    /// session changed.
    pub fn fail(&mut self, action: impl Into<String>, details: Value) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = SessionStatus::Failed;
        self.record(action, details);
        true
    }

    pub fn append_message(
        &mut self,
        participant_id: ParticipantId,
        content: String,
        topics: Vec<String>,
    ) {
        let timestamp = next_timestamp(self.messages.last().map(|m| m.timestamp));
        self.messages.push(Message {
            participant_id,
            content,
            timestamp,
            topics,
        });
    }

    /// Append a decision and make it the source of `consensus_level`
    pub fn append_decision(&mut self, mut decision: Decision) -> f64 {
        decision.timestamp = next_timestamp(self.decisions.last().map(|d| d.timestamp));
        let consensus = decision.support_ratio(self.participants.len());
        self.decisions.push(decision);
        self.metrics.consensus_level = consensus;
        consensus
    }

    pub fn latest_decision(&self) -> Option<&Decision> {
        self.decisions.last()
    }

    /// Add participants not already present, keeping existing order
    pub fn add_participants(&mut self, extra: &[ParticipantId]) -> Vec<ParticipantId> {
        let mut added = Vec::new();
        for participant in extra {
            if !self.participants.contains(participant) {
                self.participants.push(participant.clone());
                self.metrics
                    .participation_score
                    .entry(participant.clone())
                    .or_insert(0.0);
                added.push(participant.clone());
            }
        }
        if !added.is_empty() {
            // Keep the invariant tied to the latest decision.
            if let Some(latest) = self.decisions.last() {
                self.metrics.consensus_level = latest.support_ratio(self.participants.len());
            }
        }
        added
    }

    /// Number of distinct topics across all messages
    pub fn distinct_topics(&self) -> usize {
        self.messages
            .iter()
            .flat_map(|m| m.topics.iter())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Rolling metrics recomputation performed by the sweeper
    pub fn refresh_metrics(&mut self) {
        let metrics = &mut self.metrics;
        metrics.consensus_history.push(metrics.consensus_level);
        metrics.average_consensus = metrics.consensus_history.iter().sum::<f64>()
            / metrics.consensus_history.len() as f64;

        let max = metrics
            .participation_score
            .values()
            .copied()
            .fold(0.0_f64, f64::max);
        if max > 0.0 {
            for score in metrics.participation_score.values_mut() {
                *score /= max;
            }
        }

        self.metrics.topics_analyzed = self.distinct_topics();
    }

    /// Read-only view returned to callers
    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id.clone(),
            event_id: self.event_id.clone(),
            category: self.event.category.to_string(),
            status: self.status,
            participants: self.participants.clone(),
            merged_event_ids: self.merged_event_ids.clone(),
            message_count: self.messages.len(),
            rounds: self.decisions.len(),
            latest_decision: self.decisions.last().cloned(),
            metrics: self.metrics.clone(),
            history: self.history.clone(),
            created_at: self.created_at,
            last_activity: self.last_activity(),
        }
    }
}

/// Snapshot of a session as exposed by `get_status`
///
/// A failed session is data, not an error: `history` carries the reason
/// (`timeout`, `consensus_failed`, or `error`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionView {
    pub id: SessionId,
    pub event_id: EventId,
    pub category: String,
    pub status: SessionStatus,
    pub participants: Vec<ParticipantId>,
    pub merged_event_ids: Vec<EventId>,
    pub message_count: usize,
    pub rounds: usize,
    pub latest_decision: Option<Decision>,
    pub metrics: SessionMetrics,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl SessionView {
    /// The most recent history entry that moved the session to `failed`
    pub fn failure_reason(&self) -> Option<&str> {
        if self.status != SessionStatus::Failed {
            return None;
        }
        self.history.last().map(|h| h.action.as_str())
    }
}

/// Strictly increasing timestamps within one log
fn next_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(prev) if now <= prev => prev + Duration::microseconds(1),
        _ => now,
    }
}

fn dedup_preserving_order(participants: Vec<ParticipantId>) -> Vec<ParticipantId> {
    let mut seen = BTreeSet::new();
    participants
        .into_iter()
        .filter(|p| seen.insert(p.clone()))
        .collect()
}
