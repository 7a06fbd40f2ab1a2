//! Keyword topic and sentiment inference for discussion content

const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    ("safety", &["safety", "safe", "evacuat", "hazard", "risk", "rescue"]),
    ("health", &["health", "medical", "hospital", "injur", "clinic"]),
    ("infrastructure", &["infrastructure", "road", "bridge", "power", "utility", "repair"]),
    ("budget", &["budget", "cost", "fund", "donation", "spend", "resource"]),
    ("environment", &["environment", "pollution", "green", "climate", "water", "tree"]),
    ("community", &["community", "resident", "neighbo", "volunteer", "local"]),
    ("culture", &["culture", "cultural", "festival", "heritage", "artist", "tradition"]),
    ("transport", &["transport", "traffic", "transit", "bus", "route", "commute"]),
    ("communication", &["inform", "announce", "communicat", "notify", "outreach"]),
    ("timeline", &["schedule", "timeline", "deadline", "immediate", "phase"]),
];

const POSITIVE: &[&str] = &[
    "agree", "support", "good", "great", "benefit", "improve", "together", "effective",
    "endorse", "yes", "helpful", "success",
];

const NEGATIVE: &[&str] = &[
    "disagree", "oppose", "bad", "concern", "risk", "harm", "fail", "against", "no",
    "problem", "delay", "reject",
];

/// Topics mentioned in `text`, in table order
pub fn infer_topics(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    TOPIC_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(topic, _)| topic.to_string())
        .collect()
}

/// Keyword sentiment in [-1, 1]; 0 when no sentiment word appears
pub fn sentiment(text: &str) -> f64 {
    let lower = text.to_lowercase();
    let (mut positive, mut negative) = (0usize, 0usize);
    for word in lower.split(|c: char| !c.is_alphanumeric()) {
        if POSITIVE.contains(&word) {
            positive += 1;
        } else if NEGATIVE.contains(&word) {
            negative += 1;
        }
    }
    let total = positive + negative;
    if total == 0 {
        return 0.0;
    }
    (positive as f64 - negative as f64) / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_topics() {
        let topics = infer_topics("We must evacuate residents and repair the bridge within budget");
        assert_eq!(topics, vec!["safety", "infrastructure", "budget", "community"]);
        assert!(infer_topics("").is_empty());
    }

    #[test]
    fn test_sentiment() {
        assert_eq!(sentiment("I agree, this is a great plan"), 1.0);
        assert_eq!(sentiment("I oppose this, it will fail"), -1.0);
        assert_eq!(sentiment("I support it but have a concern"), 0.0);
        assert_eq!(sentiment("the weather"), 0.0);
    }
}
