//! Direct participant-to-participant interactions

use crate::{CouncilError, CouncilResult, InteractionId, ParticipantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A recorded exchange between two participants
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: InteractionId,
    pub initiator: ParticipantId,
    pub responder: ParticipantId,
    pub content: String,
    /// Keyword sentiment in [-1, 1]
    pub sentiment: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl InteractionRecord {
    pub fn new(
        initiator: ParticipantId,
        responder: ParticipantId,
        content: impl Into<String>,
    ) -> CouncilResult<Self> {
        if initiator.as_str().trim().is_empty() || responder.as_str().trim().is_empty() {
            return Err(CouncilError::Validation(
                "interaction participants must not be empty".into(),
            ));
        }
        if initiator == responder {
            return Err(CouncilError::Validation(format!(
                "participant {} cannot interact with itself",
                initiator
            )));
        }
        Ok(Self {
            id: InteractionId::generate(),
            initiator,
            responder,
            content: content.into(),
            sentiment: 0.0,
            topics: Vec::new(),
            timestamp: Utc::now(),
        })
    }

    pub fn involves(&self, participant: &ParticipantId) -> bool {
        &self.initiator == participant || &self.responder == participant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_self_interaction() {
        let p = ParticipantId::new("a");
        assert!(InteractionRecord::new(p.clone(), p, "hi").is_err());
    }

    #[test]
    fn test_rejects_blank_ids() {
        assert!(InteractionRecord::new(ParticipantId::new(" "), ParticipantId::new("b"), "hi").is_err());
    }

    #[test]
    fn test_involves() {
        let record =
            InteractionRecord::new(ParticipantId::new("a"), ParticipantId::new("b"), "hi").unwrap();
        assert!(record.involves(&ParticipantId::new("b")));
        assert!(!record.involves(&ParticipantId::new("c")));
    }
}
