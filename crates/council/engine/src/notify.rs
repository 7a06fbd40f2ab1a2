//! Notification bus
//!
//! Lifecycle notifications are published on a broadcast channel and
//! consumed by independent subscriber tasks, so delivery latency never
//! stalls the round loop or the sweeps.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use council_types::{
    Decision, EventId, InteractionRecord, ParticipantId, SessionId, SessionStatus,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Something observable happened in the engine
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    SessionCreated {
        session_id: SessionId,
        event_id: EventId,
        status: SessionStatus,
        participants: Vec<ParticipantId>,
    },
    SessionMerged {
        session_id: SessionId,
        event_id: EventId,
        score: f64,
        added_participants: Vec<ParticipantId>,
    },
    StatusChanged {
        session_id: SessionId,
        from: SessionStatus,
        to: SessionStatus,
    },
    DecisionProposed {
        session_id: SessionId,
        round: u32,
        decision: Decision,
        consensus_level: f64,
    },
    ConsensusReached {
        session_id: SessionId,
        round: u32,
        consensus_level: f64,
    },
    SessionFailed {
        session_id: SessionId,
        reason: String,
    },
    SessionArchived {
        session_id: SessionId,
        status: SessionStatus,
    },
    InteractionRecorded {
        record: InteractionRecord,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::SessionCreated { .. } => "session_created",
            Notification::SessionMerged { .. } => "session_merged",
            Notification::StatusChanged { .. } => "status_changed",
            Notification::DecisionProposed { .. } => "decision_proposed",
            Notification::ConsensusReached { .. } => "consensus_reached",
            Notification::SessionFailed { .. } => "session_failed",
            Notification::SessionArchived { .. } => "session_archived",
            Notification::InteractionRecorded { .. } => "interaction_recorded",
        }
    }
}

/// A notification with its publication time
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub sequence: u64,
    pub published_at: DateTime<Utc>,
    pub notification: Notification,
}

/// Broadcast publisher shared by all engine components
pub struct NotificationBus {
    sender: broadcast::Sender<NotificationEnvelope>,
    sequence: AtomicU64,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// Publish a notification; dropped silently when nobody listens
    pub fn publish(&self, notification: Notification) {
        let envelope = NotificationEnvelope {
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            published_at: Utc::now(),
            notification,
        };
        let _ = self.sender.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Total notifications published so far
    pub fn published(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

/// Consumer of engine activity (analytics, metrics backends)
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn record(&self, envelope: &NotificationEnvelope);
}

/// Sink that logs every notification
#[derive(Debug, Default)]
pub struct TracingAnalyticsSink;

#[async_trait]
impl AnalyticsSink for TracingAnalyticsSink {
    async fn record(&self, envelope: &NotificationEnvelope) {
        let payload = serde_json::to_string(&envelope.notification).unwrap_or_default();
        tracing::info!(
            sequence = envelope.sequence,
            kind = envelope.notification.kind(),
            payload = %payload,
            "Council notification"
        );
    }
}

/// Drive `sink` from its own task until the bus is dropped
pub fn spawn_subscriber(bus: &NotificationBus, sink: Arc<dyn AnalyticsSink>) -> JoinHandle<()> {
    let mut receiver = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(envelope) => sink.record(&envelope).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Analytics subscriber lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
