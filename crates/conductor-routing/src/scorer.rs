use crate::intent::Intent;
use async_trait::async_trait;
use conductor_core::ConductorResult;
use conductor_registry::AgentDescriptor;
use std::collections::HashSet;

/// Pluggable semantic-match scoring strategy.
///
/// The router combines this component with tag overlap and historical
/// success rate. Implementations may call out to a model; the returned
/// score must land in [0,1] (the router clamps defensively anyway).
#[async_trait]
pub trait ScorerPort: Send + Sync {
    /// Score how well `descriptor` semantically matches the query text
    /// for the given sub-intent.
    async fn score(
        &self,
        query_text: &str,
        intent: &Intent,
        descriptor: &AgentDescriptor,
    ) -> ConductorResult<f64>;
}

/// Deterministic token-overlap scorer, the default strategy.
///
/// Tokenizes the query and the descriptor's description + skills and
/// scores the fraction of query tokens the descriptor covers.
#[derive(Debug, Default, Clone)]
pub struct KeywordScorer;

fn tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl ScorerPort for KeywordScorer {
    async fn score(
        &self,
        query_text: &str,
        _intent: &Intent,
        descriptor: &AgentDescriptor,
    ) -> ConductorResult<f64> {
        let query_tokens = tokens(query_text);
        if query_tokens.is_empty() {
            return Ok(0.0);
        }
        let mut agent_tokens = tokens(&descriptor.description);
        for skill in &descriptor.skills {
            agent_tokens.extend(tokens(skill.as_str()));
        }
        let hits = query_tokens.intersection(&agent_tokens).count();
        Ok(hits as f64 / query_tokens.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::Tag;
    use conductor_registry::{AgentDescriptor, AgentManifest};

    fn descriptor(id: &str, description: &str, skills: &[&str]) -> AgentDescriptor {
        AgentDescriptor::from_manifest(
            "http://x",
            &AgentManifest {
                name: id.to_string(),
                description: description.to_string(),
                skills: skills.iter().map(|s| (*s).to_string()).collect(),
            },
        )
    }

    fn intent() -> Intent {
        Intent {
            label: "calculation".to_string(),
            tags: vec![Tag::new("math")],
            position: 0,
        }
    }

    #[tokio::test]
    async fn test_overlap_in_unit_range() {
        let scorer = KeywordScorer;
        let d = descriptor("calc", "mathematical calculation agent", &["math"]);
        let s = scorer
            .score("calculate this mathematical expression", &intent(), &d)
            .await
            .unwrap();
        assert!((0.0..=1.0).contains(&s));
        assert!(s > 0.0);
    }

    #[tokio::test]
    async fn test_unrelated_descriptor_scores_zero() {
        let scorer = KeywordScorer;
        let d = descriptor("weather", "weather forecasting", &["forecast"]);
        let s = scorer
            .score("integrate polynomial", &intent(), &d)
            .await
            .unwrap();
        assert_eq!(s, 0.0);
    }
}
