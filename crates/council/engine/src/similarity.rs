//! Similarity Scorer
//!
//! Compatibility between an incoming event and an existing session is the
//! unweighted mean of the factors whose preconditions hold. A factor with
//! missing data is left out rather than counted as zero, so sessions are
//! only penalized for genuine dissimilarity.

use council_types::{CollaborationSession, Event};
use std::collections::HashSet;

/// Individual factor values; `None` means the factor did not apply
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SimilarityBreakdown {
    pub identity: Option<f64>,
    pub location: Option<f64>,
    pub participants: Option<f64>,
    pub impact: Option<f64>,
}

impl SimilarityBreakdown {
    /// Mean of the applicable factors, 0 when none apply
    pub fn score(&self) -> f64 {
        let factors: Vec<f64> = [self.identity, self.location, self.participants, self.impact]
            .into_iter()
            .flatten()
            .collect();
        if factors.is_empty() {
            return 0.0;
        }
        (factors.iter().sum::<f64>() / factors.len() as f64).clamp(0.0, 1.0)
    }
}

/// Score each factor for `event` against `session`
pub fn breakdown(session: &CollaborationSession, event: &Event) -> SimilarityBreakdown {
    let origin = &session.event;

    let identity = (session.event_id == event.id).then_some(1.0);

    let location = {
        let denominator = event
            .affected_locations
            .len()
            .max(origin.affected_locations.len());
        (!event.affected_locations.is_empty() && !origin.affected_locations.is_empty()).then(|| {
            let theirs: HashSet<&String> = origin.affected_locations.iter().collect();
            let common = unique(&event.affected_locations)
                .filter(|l| theirs.contains(l))
                .count();
            common as f64 / denominator as f64
        })
    };

    let participants = {
        let denominator = event
            .required_participants
            .len()
            .max(session.participants.len());
        (!event.required_participants.is_empty() && !session.participants.is_empty()).then(|| {
            let theirs: HashSet<_> = session.participants.iter().collect();
            let common = unique(&event.required_participants)
                .filter(|p| theirs.contains(p))
                .count();
            common as f64 / denominator as f64
        })
    };

    let impact = match (&event.impact, &origin.impact) {
        (Some(theirs), Some(ours)) => {
            let shared = theirs.shared_dimensions(ours);
            (!shared.is_empty()).then(|| {
                shared
                    .iter()
                    .map(|(a, b)| 1.0 - (a - b).abs())
                    .sum::<f64>()
                    / shared.len() as f64
            })
        }
        _ => None,
    };

    SimilarityBreakdown {
        identity,
        location,
        participants,
        impact,
    }
}

/// Compatibility score in [0, 1]
pub fn score(session: &CollaborationSession, event: &Event) -> f64 {
    breakdown(session, event).score()
}

/// Whether `event` should be folded into `session`
pub fn is_merge_eligible(session: &CollaborationSession, event: &Event, threshold: f64) -> bool {
    !session.is_terminal() && score(session, event) > threshold
}

fn unique<T: Eq + std::hash::Hash>(items: &[T]) -> impl Iterator<Item = &T> {
    let mut seen = HashSet::new();
    items.iter().filter(move |item| seen.insert(*item))
}

#[cfg(test)]
mod tests {
    use super::*;
    use council_types::{EventCategory, ImpactVector, ParticipantId, SessionStatus};
    use proptest::prelude::*;

    fn session_for(event: Event, participants: &[&str]) -> CollaborationSession {
        CollaborationSession::new(
            event,
            participants.iter().map(|p| ParticipantId::new(*p)).collect(),
        )
    }

    fn flood(id: &str) -> Event {
        Event::new(id, "Flood", EventCategory::Emergency)
            .with_locations(&["d1"])
            .with_impact(ImpactVector::new(0.8, 0.9, 0.7))
    }

    #[test]
    fn test_identity_match_scores_one() {
        let event = flood("e1");
        let session = session_for(event.clone(), &["a", "b"]);
        let b = breakdown(&session, &event);
        assert_eq!(b.identity, Some(1.0));
        assert_eq!(b.location, Some(1.0));
        assert_eq!(b.participants, None);
        assert_eq!(score(&session, &event), 1.0);
    }

    #[test]
    fn test_overlap_factors() {
        let session = session_for(flood("e1").with_locations(&["d1", "d2"]), &["a", "b"]);
        let incoming = flood("e2")
            .with_locations(&["d1", "d3", "d4"])
            .with_required(&["a", "b", "c"]);
        let b = breakdown(&session, &incoming);
        assert_eq!(b.identity, None);
        assert!((b.location.unwrap() - 1.0 / 3.0).abs() < 1e-9);
        assert!((b.participants.unwrap() - 2.0 / 3.0).abs() < 1e-9);
        assert!((b.impact.unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_impact_closeness() {
        let session = session_for(flood("e1"), &["a"]);
        let incoming = Event::new("e2", "Fire", EventCategory::Emergency)
            .with_impact(ImpactVector::new(0.4, 0.9, 0.7));
        let b = breakdown(&session, &incoming);
        assert!((b.impact.unwrap() - (0.6 + 1.0 + 1.0) / 3.0).abs() < 1e-9);
        assert_eq!(b.location, None);
    }

    #[test]
    fn test_merge_eligibility_respects_threshold_and_status() {
        let mut session = session_for(flood("e1"), &["a", "b"]);
        let similar = flood("e2").with_required(&["a", "b", "c"]);
        // (location 1 + participants 2/3 + impact 1) / 3 ≈ 0.889
        assert!(is_merge_eligible(&session, &similar, 0.8));

        let dissimilar = flood("e3").with_locations(&["d9"]).with_required(&["x"]);
        assert!(!is_merge_eligible(&session, &dissimilar, 0.8));

        session.status = SessionStatus::Completed;
        assert!(!is_merge_eligible(&session, &similar, 0.8));
    }

    #[test]
    fn test_duplicate_ids_do_not_inflate_overlap() {
        let session = session_for(flood("e1"), &["a", "b"]);
        let incoming = flood("e2").with_required(&["a", "a", "a"]);
        let b = breakdown(&session, &incoming);
        assert!((b.participants.unwrap() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_impact_does_not_count_as_a_match() {
        let session = session_for(
            Event::new("e1", "Flood", EventCategory::Emergency),
            &["fire_chief"],
        );
        let parade = Event::new("e2", "Street parade", EventCategory::Cultural);
        let b = breakdown(&session, &parade);
        assert_eq!(b.impact, None);
        assert_eq!(score(&session, &parade), 0.0);
        assert!(!is_merge_eligible(&session, &parade, 0.8));

        let estimated = parade.with_impact(ImpactVector::new(0.1, 0.8, 0.3));
        assert_eq!(breakdown(&session, &estimated).impact, None);
    }

    #[test]
    fn test_no_applicable_factor_scores_zero() {
        assert_eq!(SimilarityBreakdown::default().score(), 0.0);
    }

    fn unit() -> impl Strategy<Value = f64> {
        0.0..=1.0f64
    }

    proptest! {
        #[test]
        fn property_score_is_bounded(
            a in (unit(), unit(), unit()),
            b in (unit(), unit(), unit()),
            locs_a in proptest::collection::vec("[a-d]", 0..4),
            locs_b in proptest::collection::vec("[a-d]", 0..4),
            req in proptest::collection::vec("[p-s]", 0..4),
        ) {
            let mut origin = Event::new("e1", "x", EventCategory::Social)
                .with_impact(ImpactVector::new(a.0, a.1, a.2));
            origin.affected_locations = locs_a;
            let session = session_for(origin, &["p", "q"]);

            let mut incoming = Event::new("e2", "y", EventCategory::Social)
                .with_impact(ImpactVector::new(b.0, b.1, b.2));
            incoming.affected_locations = locs_b;
            incoming.required_participants = req.into_iter().map(ParticipantId::new).collect();

            let s = score(&session, &incoming);
            prop_assert!((0.0..=1.0).contains(&s));
        }
    }
}
