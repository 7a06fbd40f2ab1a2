//! Triggering events
//!
//! An event is the situation a collaboration session negotiates about.
//! Once a session references an event, the event is only changed through
//! an explicit merge.

use crate::{CouncilError, CouncilResult, EventId, ParticipantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of event categories
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Community,
    Emergency,
    Development,
    Cultural,
    Social,
    Transport,
    Environmental,
}

impl EventCategory {
    pub const ALL: [EventCategory; 7] = [
        EventCategory::Community,
        EventCategory::Emergency,
        EventCategory::Development,
        EventCategory::Cultural,
        EventCategory::Social,
        EventCategory::Transport,
        EventCategory::Environmental,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Community => "community",
            EventCategory::Emergency => "emergency",
            EventCategory::Development => "development",
            EventCategory::Cultural => "cultural",
            EventCategory::Social => "social",
            EventCategory::Transport => "transport",
            EventCategory::Environmental => "environmental",
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventCategory {
    type Err = CouncilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CouncilError::Validation(format!("unknown event category: {}", s)))
    }
}

/// Lifecycle status an event carries when it reaches the engine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Not yet acted on; a session starts deliberating immediately
    #[default]
    Pending,
    /// Explicitly deferred; the session waits for activation
    Scheduled,
    /// Already being carried out
    InProgress,
    /// Already carried out, awaiting review
    Completed,
}

/// Estimated impact of an event, each dimension in [0, 1]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct ImpactVector {
    pub environmental: f64,
    pub social: f64,
    pub economic: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cultural: Option<f64>,
}

impl ImpactVector {
    pub fn new(environmental: f64, social: f64, economic: f64) -> Self {
        Self {
            environmental,
            social,
            economic,
            cultural: None,
        }
    }

    pub fn with_cultural(mut self, cultural: f64) -> Self {
        self.cultural = Some(cultural);
        self
    }

    /// Pairs of values for every dimension present in both vectors
    pub fn shared_dimensions(&self, other: &ImpactVector) -> Vec<(f64, f64)> {
        let mut pairs = vec![
            (self.environmental, other.environmental),
            (self.social, other.social),
            (self.economic, other.economic),
        ];
        if let (Some(a), Some(b)) = (self.cultural, other.cultural) {
            pairs.push((a, b));
        }
        pairs
    }

    fn values(&self) -> impl Iterator<Item = (&'static str, f64)> {
        [
            ("environmental", Some(self.environmental)),
            ("social", Some(self.social)),
            ("economic", Some(self.economic)),
            ("cultural", self.cultural),
        ]
        .into_iter()
        .filter_map(|(name, v)| v.map(|v| (name, v)))
    }
}

/// The trigger for a collaboration session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: EventCategory,
    #[serde(default)]
    pub severity: f64,
    #[serde(default)]
    pub urgency: f64,
    /// Expected duration in hours
    #[serde(default)]
    pub duration: u32,
    /// Absent when the source did not estimate impact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<ImpactVector>,
    #[serde(default)]
    pub required_participants: Vec<ParticipantId>,
    #[serde(default)]
    pub affected_locations: Vec<String>,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn new(id: impl Into<String>, title: impl Into<String>, category: EventCategory) -> Self {
        Self {
            id: EventId::new(id),
            title: title.into(),
            description: String::new(),
            category,
            severity: 0.0,
            urgency: 0.0,
            duration: 0,
            impact: None,
            required_participants: Vec::new(),
            affected_locations: Vec::new(),
            status: EventStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_severity(mut self, severity: f64, urgency: f64) -> Self {
        self.severity = severity;
        self.urgency = urgency;
        self
    }

    pub fn with_impact(mut self, impact: ImpactVector) -> Self {
        self.impact = Some(impact);
        self
    }

    pub fn with_required(mut self, participants: &[&str]) -> Self {
        self.required_participants = participants.iter().map(|p| ParticipantId::new(*p)).collect();
        self
    }

    pub fn with_locations(mut self, locations: &[&str]) -> Self {
        self.affected_locations = locations.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_status(mut self, status: EventStatus) -> Self {
        self.status = status;
        self
    }

    /// Reject malformed events before any session state is touched
    pub fn validate(&self) -> CouncilResult<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(CouncilError::Validation("event id must not be empty".into()));
        }
        if self.title.trim().is_empty() {
            return Err(CouncilError::Validation(format!(
                "event {} has an empty title",
                self.id
            )));
        }
        for (name, value) in [("severity", self.severity), ("urgency", self.urgency)] {
            check_unit(&self.id, name, value)?;
        }
        if let Some(impact) = &self.impact {
            for (name, value) in impact.values() {
                check_unit(&self.id, name, value)?;
            }
        }
        if self
            .required_participants
            .iter()
            .any(|p| p.as_str().trim().is_empty())
        {
            return Err(CouncilError::Validation(format!(
                "event {} lists an empty participant id",
                self.id
            )));
        }
        Ok(())
    }

    /// Text used to embed the event for similarity lookups
    pub fn embedding_text(&self) -> String {
        format!("{} {} {}", self.title, self.description, self.category)
    }
}

fn check_unit(id: &EventId, name: &str, value: f64) -> CouncilResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(CouncilError::Validation(format!(
            "event {} has {} {} outside [0, 1]",
            id, name, value
        )));
    }
    Ok(())
}
