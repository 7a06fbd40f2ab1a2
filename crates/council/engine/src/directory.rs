//! Participant directory and the category expert table

use crate::external::ParticipantContext;
use council_types::{EventCategory, ParticipantId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fallback participant guaranteeing a general strategist is present
pub const GENERAL_STRATEGIST: &str = "general_strategist";
/// Fallback participant guaranteeing a community connector is present
pub const COMMUNITY_CONNECTOR: &str = "community_connector";

/// Role an expert plays in a discussion
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpertRole {
    Strategist,
    Connector,
    Specialist,
}

/// Canonical experts per category: (participant id, role)
const EXPERT_TABLE: &[(EventCategory, [(&str, ExpertRole); 3])] = &[
    (
        EventCategory::Community,
        [
            ("community_organizer", ExpertRole::Connector),
            ("urban_planner", ExpertRole::Strategist),
            ("social_worker", ExpertRole::Specialist),
        ],
    ),
    (
        EventCategory::Emergency,
        [
            ("emergency_coordinator", ExpertRole::Strategist),
            ("medical_responder", ExpertRole::Specialist),
            ("community_liaison", ExpertRole::Connector),
        ],
    ),
    (
        EventCategory::Development,
        [
            ("urban_planner", ExpertRole::Strategist),
            ("civil_engineer", ExpertRole::Specialist),
            ("economic_analyst", ExpertRole::Specialist),
        ],
    ),
    (
        EventCategory::Cultural,
        [
            ("cultural_curator", ExpertRole::Specialist),
            ("event_producer", ExpertRole::Specialist),
            ("community_organizer", ExpertRole::Connector),
        ],
    ),
    (
        EventCategory::Social,
        [
            ("policy_advisor", ExpertRole::Strategist),
            ("social_worker", ExpertRole::Specialist),
            ("community_organizer", ExpertRole::Connector),
        ],
    ),
    (
        EventCategory::Transport,
        [
            ("transit_planner", ExpertRole::Strategist),
            ("traffic_engineer", ExpertRole::Specialist),
            ("mobility_advocate", ExpertRole::Connector),
        ],
    ),
    (
        EventCategory::Environmental,
        [
            ("sustainability_officer", ExpertRole::Strategist),
            ("environmental_scientist", ExpertRole::Specialist),
            ("green_space_advocate", ExpertRole::Connector),
        ],
    ),
];

/// Traits that matter for a category, with weights summing to 1
fn category_traits(category: EventCategory) -> &'static [(&'static str, f64)] {
    match category {
        EventCategory::Emergency => &[("decisiveness", 0.5), ("resilience", 0.3), ("empathy", 0.2)],
        EventCategory::Community => &[("empathy", 0.4), ("collaboration", 0.4), ("creativity", 0.2)],
        EventCategory::Development => &[("analytical", 0.5), ("vision", 0.3), ("collaboration", 0.2)],
        EventCategory::Cultural => &[("creativity", 0.5), ("empathy", 0.3), ("vision", 0.2)],
        EventCategory::Social => &[("empathy", 0.5), ("collaboration", 0.3), ("communication", 0.2)],
        EventCategory::Transport => &[("analytical", 0.5), ("decisiveness", 0.3), ("vision", 0.2)],
        EventCategory::Environmental => &[("analytical", 0.4), ("vision", 0.4), ("resilience", 0.2)],
    }
}

/// Default expert list for a category
///
/// Always contains at least one strategist and one connector; the general
/// fallbacks are appended when the category's table entry lacks either.
pub fn default_experts(category: EventCategory) -> Vec<ParticipantId> {
    let entry = EXPERT_TABLE
        .iter()
        .find(|(c, _)| *c == category)
        .map(|(_, experts)| experts.as_slice())
        .unwrap_or(&[]);

    let mut experts: Vec<ParticipantId> =
        entry.iter().map(|(id, _)| ParticipantId::new(*id)).collect();

    if !entry.iter().any(|(_, role)| *role == ExpertRole::Strategist) {
        experts.push(ParticipantId::new(GENERAL_STRATEGIST));
    }
    if !entry.iter().any(|(_, role)| *role == ExpertRole::Connector) {
        experts.push(ParticipantId::new(COMMUNITY_CONNECTOR));
    }
    experts
}

/// What the engine knows about a participant
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ParticipantProfile {
    pub id: ParticipantId,
    pub display_name: String,
    #[serde(default)]
    pub interests: Vec<EventCategory>,
    /// Trait scores in [0, 1], keyed by trait name
    #[serde(default)]
    pub traits: HashMap<String, f64>,
    #[serde(default)]
    pub role: Option<ExpertRole>,
}

impl ParticipantProfile {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: ParticipantId::new(id),
            display_name: display_name.into(),
            ..Self::default()
        }
    }

    pub fn with_interests(mut self, interests: &[EventCategory]) -> Self {
        self.interests = interests.to_vec();
        self
    }

    pub fn with_trait(mut self, name: impl Into<String>, score: f64) -> Self {
        self.traits.insert(name.into(), score.clamp(0.0, 1.0));
        self
    }

    pub fn with_role(mut self, role: ExpertRole) -> Self {
        self.role = Some(role);
        self
    }

    /// Weighted average of the traits relevant to `category`
    pub fn trait_score(&self, category: EventCategory) -> f64 {
        let weights = category_traits(category);
        let total: f64 = weights.iter().map(|(_, w)| w).sum();
        if total == 0.0 {
            return 0.0;
        }
        weights
            .iter()
            .map(|(name, w)| w * self.traits.get(*name).copied().unwrap_or(0.0))
            .sum::<f64>()
            / total
    }

    /// Declared interest in the category, or strong relevant traits
    pub fn is_suitable_for(&self, category: EventCategory, threshold: f64) -> bool {
        self.interests.contains(&category) || self.trait_score(category) >= threshold
    }

    pub fn context(&self) -> ParticipantContext {
        ParticipantContext {
            participant_id: self.id.clone(),
            display_name: self.display_name.clone(),
            interests: self.interests.clone(),
            persona: self.role.map(|r| format!("{:?}", r).to_lowercase()),
        }
    }
}

/// Registry of participant profiles
#[derive(Default)]
pub struct ParticipantDirectory {
    profiles: DashMap<ParticipantId, ParticipantProfile>,
}

impl ParticipantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory pre-populated with every expert named in the table
    pub fn with_default_experts() -> Self {
        let directory = Self::new();
        for (category, experts) in EXPERT_TABLE {
            for (id, role) in experts {
                let participant = ParticipantId::new(*id);
                let mut profile = directory
                    .profiles
                    .get(&participant)
                    .map(|p| p.clone())
                    .unwrap_or_else(|| {
                        ParticipantProfile::new(*id, title_case(id)).with_role(*role)
                    });
                if !profile.interests.contains(category) {
                    profile.interests.push(*category);
                }
                directory.profiles.insert(participant, profile);
            }
        }
        for (id, role) in [
            (GENERAL_STRATEGIST, ExpertRole::Strategist),
            (COMMUNITY_CONNECTOR, ExpertRole::Connector),
        ] {
            directory.register(
                ParticipantProfile::new(id, title_case(id))
                    .with_role(role)
                    .with_interests(&EventCategory::ALL),
            );
        }
        directory
    }

    pub fn register(&self, profile: ParticipantProfile) {
        self.profiles.insert(profile.id.clone(), profile);
    }

    pub fn get(&self, id: &ParticipantId) -> Option<ParticipantProfile> {
        self.profiles.get(id).map(|p| p.clone())
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Unknown participants are never suitable
    pub fn is_suitable(&self, id: &ParticipantId, category: EventCategory, threshold: f64) -> bool {
        self.profiles
            .get(id)
            .map(|p| p.is_suitable_for(category, threshold))
            .unwrap_or(false)
    }

    /// Context handed to the narrative service
    pub fn context_for(&self, id: &ParticipantId) -> ParticipantContext {
        self.get(id)
            .map(|p| p.context())
            .unwrap_or_else(|| ParticipantContext::anonymous(id.clone()))
    }
}

fn title_case(id: &str) -> String {
    id.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emergency_defaults_are_three_experts() {
        let experts = default_experts(EventCategory::Emergency);
        assert_eq!(
            experts,
            vec![
                ParticipantId::new("emergency_coordinator"),
                ParticipantId::new("medical_responder"),
                ParticipantId::new("community_liaison"),
            ]
        );
    }

    #[test]
    fn test_fallback_roles_are_appended() {
        let development = default_experts(EventCategory::Development);
        assert_eq!(development.len(), 4);
        assert_eq!(development[3], ParticipantId::new(COMMUNITY_CONNECTOR));

        let cultural = default_experts(EventCategory::Cultural);
        assert!(cultural.contains(&ParticipantId::new(GENERAL_STRATEGIST)));
        assert!(!cultural.contains(&ParticipantId::new(COMMUNITY_CONNECTOR)));
    }

    #[test]
    fn test_every_category_has_defaults() {
        for category in EventCategory::ALL {
            assert!(default_experts(category).len() >= 3);
        }
    }

    #[test]
    fn test_suitability() {
        let by_interest =
            ParticipantProfile::new("p1", "P1").with_interests(&[EventCategory::Transport]);
        assert!(by_interest.is_suitable_for(EventCategory::Transport, 0.7));
        assert!(!by_interest.is_suitable_for(EventCategory::Emergency, 0.7));

        let by_traits = ParticipantProfile::new("p2", "P2")
            .with_trait("decisiveness", 0.9)
            .with_trait("resilience", 0.8)
            .with_trait("empathy", 0.5);
        // 0.5*0.9 + 0.3*0.8 + 0.2*0.5 = 0.79
        assert!((by_traits.trait_score(EventCategory::Emergency) - 0.79).abs() < 1e-9);
        assert!(by_traits.is_suitable_for(EventCategory::Emergency, 0.7));
        assert!(!by_traits.is_suitable_for(EventCategory::Cultural, 0.7));
    }

    #[test]
    fn test_directory_defaults_and_context() {
        let directory = ParticipantDirectory::with_default_experts();
        let organizer = directory
            .get(&ParticipantId::new("community_organizer"))
            .unwrap();
        assert_eq!(organizer.display_name, "Community Organizer");
        assert!(organizer.interests.contains(&EventCategory::Community));
        assert!(organizer.interests.contains(&EventCategory::Cultural));

        let unknown = ParticipantId::new("stranger");
        assert!(!directory.is_suitable(&unknown, EventCategory::Social, 0.0));
        assert_eq!(directory.context_for(&unknown).display_name, "stranger");
    }

    #[test]
    fn test_default_profile_is_blank() {
        let profile = ParticipantProfile::default();
        assert_eq!(profile.id.as_str(), "");
        assert!(profile.interests.is_empty());
        assert!(profile.role.is_none());
    }
}
