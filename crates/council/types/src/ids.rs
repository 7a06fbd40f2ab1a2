//! Identifier newtypes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create an id from a known string
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a triggering event
    EventId
);

string_id!(
    /// Identifier of a participant (an autonomous agent)
    ParticipantId
);

string_id!(
    /// Identifier of a collaboration session
    SessionId
);

string_id!(
    /// Identifier of a recorded interaction
    InteractionId
);

/// Process-wide sequence so two sessions created for the same event in the
/// same millisecond still get distinct ids.
static SESSION_SEQUENCE: AtomicU64 = AtomicU64::new(0);

impl SessionId {
    /// Derive a session id from its originating event and creation time.
    ///
    /// Ids sort by creation time for the same event and are never reissued
    /// within a process.
    pub fn derive(event_id: &EventId, created_at: DateTime<Utc>) -> Self {
        let seq = SESSION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!(
            "session-{}-{}-{}",
            event_id,
            created_at.timestamp_millis(),
            seq
        ))
    }
}

impl EventId {
    /// Generate a new random EventId
    pub fn generate() -> Self {
        Self(format!("event-{}", uuid::Uuid::new_v4()))
    }
}

impl InteractionId {
    /// Generate a new random InteractionId
    pub fn generate() -> Self {
        Self(format!("interaction-{}", uuid::Uuid::new_v4()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_never_reused() {
        let event = EventId::new("e1");
        let now = Utc::now();
        let a = SessionId::derive(&event, now);
        let b = SessionId::derive(&event, now);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("session-e1-"));
    }

    #[test]
    fn test_default_id_is_empty() {
        assert_eq!(ParticipantId::default().as_str(), "");
        assert_eq!(SessionId::default(), SessionId::new(""));
    }

    #[test]
    fn test_display_is_inner_string() {
        assert_eq!(ParticipantId::new("mayor").to_string(), "mayor");
    }
}
