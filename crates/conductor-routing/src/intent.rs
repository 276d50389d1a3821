use conductor_core::Tag;
use serde::{Deserialize, Serialize};

/// One detected sub-intent of a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    /// Rule label, e.g. `calculation` or `weather`.
    pub label: String,
    /// Capability tags this intent asks for.
    pub tags: Vec<Tag>,
    /// Byte offset of the earliest matching keyword in the source text.
    /// Drives deterministic ordering of sibling plan steps.
    pub position: usize,
}

/// A keyword family mapping to capability tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRule {
    /// Intent label.
    pub label: String,
    /// Keywords whose presence (case-insensitive) triggers the rule.
    pub keywords: Vec<String>,
    /// Tags requested when the rule fires.
    pub tags: Vec<Tag>,
}

/// Ordered rule table for sub-intent detection.
///
/// Deliberately dumb: substring keyword matching, no model calls. The
/// pluggable scorer refines candidate ranking afterwards; this table only
/// decides which capability families a query touches and where in the
/// text each one first appears.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRules {
    rules: Vec<IntentRule>,
}

impl IntentRules {
    /// Build from an explicit rule list.
    pub fn new(rules: Vec<IntentRule>) -> Self {
        Self { rules }
    }

    /// The stock rule table: calculation, weather, research, greeting.
    pub fn default_rules() -> Self {
        let rule = |label: &str, keywords: &[&str], tags: &[&str]| IntentRule {
            label: label.to_string(),
            keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
            tags: tags.iter().map(|t| Tag::new(t)).collect(),
        };
        Self::new(vec![
            rule(
                "calculation",
                &["calculate", "compute", "math", "sum", "+", "-", "*", "/", "sqrt"],
                &["math", "calculation"],
            ),
            rule(
                "weather",
                &["weather", "temperature", "forecast", "rain", "sunny"],
                &["weather", "forecast"],
            ),
            rule(
                "research",
                &["research", "find", "search", "look up", "who", "what is"],
                &["research", "search"],
            ),
            rule("greeting", &["hello", "hi ", "help"], &["general", "conversation"]),
        ])
    }

    /// Detect every sub-intent present in `text`, ordered by first
    /// appearance. A query matching no rule yields a single `general`
    /// intent at position 0.
    pub fn detect(&self, text: &str) -> Vec<Intent> {
        let lower = text.to_lowercase();
        let mut found: Vec<Intent> = Vec::new();

        for rule in &self.rules {
            let position = rule
                .keywords
                .iter()
                .filter_map(|kw| lower.find(&kw.to_lowercase()))
                .min();
            if let Some(position) = position {
                found.push(Intent {
                    label: rule.label.clone(),
                    tags: rule.tags.clone(),
                    position,
                });
            }
        }

        if found.is_empty() {
            return vec![Intent {
                label: "general".to_string(),
                tags: vec![Tag::new("general")],
                position: 0,
            }];
        }

        found.sort_by_key(|i| i.position);
        found
    }
}

impl Default for IntentRules {
    fn default() -> Self {
        Self::default_rules()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_intent() {
        let rules = IntentRules::default_rules();
        let intents = rules.detect("Calculate 2 + 2");
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].label, "calculation");
        assert_eq!(intents[0].position, 0);
    }

    #[test]
    fn test_multiple_intents_ordered_by_position() {
        let rules = IntentRules::default_rules();
        let intents = rules.detect("What's the weather in London and calculate 100 * 50?");
        let labels: Vec<_> = intents.iter().map(|i| i.label.as_str()).collect();
        // "What's" does not match the research keyword "what is", so only
        // weather and calculation fire, in text order.
        assert!(labels.contains(&"weather"));
        assert!(labels.contains(&"calculation"));
        let w = intents.iter().position(|i| i.label == "weather").unwrap();
        let c = intents.iter().position(|i| i.label == "calculation").unwrap();
        assert!(w < c);
    }

    #[test]
    fn test_unmatched_query_yields_general() {
        let rules = IntentRules::default_rules();
        let intents = rules.detect("xyzzy");
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].label, "general");
        assert_eq!(intents[0].tags, vec![Tag::new("general")]);
    }

    #[test]
    fn test_case_insensitive_matching() {
        let rules = IntentRules::default_rules();
        let intents = rules.detect("WEATHER FORECAST PLEASE");
        assert_eq!(intents[0].label, "weather");
    }
}
