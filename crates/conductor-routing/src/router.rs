use crate::intent::{Intent, IntentRules};
use crate::scorer::ScorerPort;
use conductor_core::{ConductorError, ConductorResult, Query, RouterConfig};
use conductor_registry::AgentDescriptor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One scored candidate for a sub-intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    /// Candidate agent id (always a member of the healthy candidate set
    /// at decision time).
    pub agent_id: String,
    /// Routing confidence, clamped into [0,1].
    pub confidence: f64,
}

/// Ranked candidates for one detected sub-intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRouting {
    /// The sub-intent this ranking serves.
    pub intent: Intent,
    /// Candidates, best first.
    pub ranked: Vec<RankedCandidate>,
}

impl IntentRouting {
    /// The winning candidate for this sub-intent.
    pub fn top(&self) -> Option<&RankedCandidate> {
        self.ranked.first()
    }
}

/// Routing output consumed by the planner.
///
/// Single-intent queries carry one ranking; queries with several detected
/// sub-intents carry one ranking per sub-intent, in source-text order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// The routed query.
    pub query_id: Uuid,
    /// Per-sub-intent rankings.
    pub rankings: Vec<IntentRouting>,
    /// True when the best confidence fell below the threshold. The
    /// designated default agent is substituted when one is configured and
    /// healthy; otherwise the best-scoring candidate stands. At most one
    /// substitution happens per decision; the reported confidence stays
    /// honest either way.
    pub fallback: bool,
}

impl RoutingDecision {
    /// Best confidence across all sub-intents.
    pub fn best_confidence(&self) -> f64 {
        self.rankings
            .iter()
            .filter_map(|r| r.top().map(|c| c.confidence))
            .fold(0.0, f64::max)
    }
}

/// Scores healthy candidates against a query and returns a ranked
/// decision.
pub struct Router {
    config: RouterConfig,
    rules: IntentRules,
    scorer: Arc<dyn ScorerPort>,
}

impl Router {
    /// Build a router with the given scoring strategy.
    pub fn new(config: RouterConfig, rules: IntentRules, scorer: Arc<dyn ScorerPort>) -> Self {
        Self {
            config,
            rules,
            scorer,
        }
    }

    /// Route a query across the healthy candidate set.
    ///
    /// Score per candidate = `tag_weight * tag_overlap + success_weight *
    /// success_rate + semantic_weight * semantic`. Ties break by lowest
    /// current load, then by id. An empty candidate set fails with
    /// [`ConductorError::NoAgentAvailable`]; a best confidence below the
    /// threshold sets the fallback flag and, when a default agent is
    /// configured and healthy, substitutes it at the head of the first
    /// ranking. Low confidence alone never fails the route.
    pub async fn route(
        &self,
        query: &Query,
        candidates: &[AgentDescriptor],
    ) -> ConductorResult<RoutingDecision> {
        if candidates.is_empty() {
            return Err(ConductorError::NoAgentAvailable);
        }

        let intents = self.rules.detect(&query.text);
        let mut rankings = Vec::with_capacity(intents.len());

        for intent in intents {
            let ranked = self.rank_for_intent(query, &intent, candidates).await;
            debug!(
                query = %query.id,
                intent = %intent.label,
                candidates = ranked.len(),
                "ranked sub-intent"
            );
            rankings.push(IntentRouting { intent, ranked });
        }

        let mut decision = RoutingDecision {
            query_id: query.id,
            rankings,
            fallback: false,
        };

        let best = decision.best_confidence();
        if best < self.config.confidence_threshold {
            self.apply_fallback(&mut decision, candidates, best);
        }

        info!(
            query = %query.id,
            confidence = decision.best_confidence(),
            fallback = decision.fallback,
            sub_intents = decision.rankings.len(),
            "routing decision made"
        );
        Ok(decision)
    }

    async fn rank_for_intent(
        &self,
        query: &Query,
        intent: &Intent,
        candidates: &[AgentDescriptor],
    ) -> Vec<RankedCandidate> {
        let mut scored: Vec<(f64, &AgentDescriptor)> = Vec::with_capacity(candidates.len());

        for descriptor in candidates {
            let semantic = match self.scorer.score(&query.text, intent, descriptor).await {
                Ok(s) => s.clamp(0.0, 1.0),
                Err(e) => {
                    // Strategy failures degrade to tag/history-only scoring.
                    warn!(agent = %descriptor.id, error = %e, "scorer failed");
                    0.0
                }
            };
            let score = self.config.tag_weight * descriptor.tag_overlap(&intent.tags)
                + self.config.success_weight * descriptor.success_rate.clamp(0.0, 1.0)
                + self.config.semantic_weight * semantic;
            scored.push((score.clamp(0.0, 1.0), descriptor));
        }

        scored.sort_by(|(sa, da), (sb, db)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| da.current_load.cmp(&db.current_load))
                .then_with(|| da.id.cmp(&db.id))
        });

        scored
            .into_iter()
            .map(|(confidence, d)| RankedCandidate {
                agent_id: d.id.clone(),
                confidence,
            })
            .collect()
    }

    /// Mark the decision as a low-confidence fallback. When the designated
    /// default agent is configured and in the healthy candidate set it is
    /// substituted at the head of the first ranking; otherwise the best
    /// scoring candidate stands. Applied at most once per decision; the low
    /// confidence is reported as-is, not hidden.
    fn apply_fallback(
        &self,
        decision: &mut RoutingDecision,
        candidates: &[AgentDescriptor],
        best: f64,
    ) {
        decision.fallback = true;

        let healthy_default = self
            .config
            .default_agent
            .as_deref()
            .filter(|id| candidates.iter().any(|d| d.id == *id));
        let Some(default_id) = healthy_default else {
            if self.config.default_agent.is_some() {
                warn!("default agent not in healthy candidate set");
            }
            info!(
                confidence = best,
                threshold = self.config.confidence_threshold,
                "confidence below threshold, keeping best-scoring candidate"
            );
            return;
        };
        let Some(first) = decision.rankings.first_mut() else {
            return;
        };

        info!(
            confidence = best,
            threshold = self.config.confidence_threshold,
            default_agent = %default_id,
            "confidence below threshold, falling back to default agent"
        );
        first.ranked.retain(|c| c.agent_id != default_id);
        first.ranked.insert(
            0,
            RankedCandidate {
                agent_id: default_id.to_string(),
                confidence: best,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::KeywordScorer;
    use conductor_registry::AgentManifest;

    fn descriptor(id: &str, description: &str, skills: &[&str]) -> AgentDescriptor {
        AgentDescriptor::from_manifest(
            format!("http://{id}"),
            &AgentManifest {
                name: id.to_string(),
                description: description.to_string(),
                skills: skills.iter().map(|s| (*s).to_string()).collect(),
            },
        )
    }

    fn router(default_agent: Option<&str>) -> Router {
        Router::new(
            RouterConfig {
                default_agent: default_agent.map(str::to_string),
                ..RouterConfig::default()
            },
            IntentRules::default_rules(),
            Arc::new(KeywordScorer),
        )
    }

    #[tokio::test]
    async fn test_empty_candidates_is_no_agent_available() {
        let r = router(None);
        let q = Query::new("Calculate 2 + 2", "ctx");
        let err = r.route(&q, &[]).await.unwrap_err();
        assert!(matches!(err, ConductorError::NoAgentAvailable));
    }

    #[tokio::test]
    async fn test_tag_match_wins() {
        let r = router(None);
        let q = Query::new("Calculate 2 + 2", "ctx");
        let candidates = vec![
            descriptor("calc", "mathematical calculation agent", &["math", "calculation"]),
            descriptor("weather", "weather forecasts", &["weather"]),
        ];
        let decision = r.route(&q, &candidates).await.unwrap();
        assert_eq!(decision.rankings.len(), 1);
        assert_eq!(decision.rankings[0].top().unwrap().agent_id, "calc");
        assert!(!decision.fallback);
        assert!(decision.best_confidence() >= 0.3);
    }

    #[tokio::test]
    async fn test_confidence_always_in_unit_interval() {
        let r = router(None);
        let q = Query::new("calculate the math sum compute sqrt", "ctx");
        let candidates = vec![descriptor(
            "calc",
            "calculate math sum compute sqrt calculation",
            &["math", "calculation"],
        )];
        let decision = r.route(&q, &candidates).await.unwrap();
        for ranking in &decision.rankings {
            for c in &ranking.ranked {
                assert!((0.0..=1.0).contains(&c.confidence));
            }
        }
    }

    #[tokio::test]
    async fn test_tie_breaks_by_load_then_id() {
        let r = router(None);
        let q = Query::new("xyzzy", "ctx");
        let mut a = descriptor("alpha", "", &["general"]);
        let mut b = descriptor("beta", "", &["general"]);
        a.current_load = 5;
        b.current_load = 1;
        // Same tags/description → identical scores; beta has lower load.
        let decision = r.route(&q, &[a, b]).await.unwrap();
        assert_eq!(decision.rankings[0].ranked[0].agent_id, "beta");

        let a = descriptor("alpha", "", &["general"]);
        let b = descriptor("beta", "", &["general"]);
        let decision = r.route(&q, &[b, a]).await.unwrap();
        // Equal load → lexicographic id.
        assert_eq!(decision.rankings[0].ranked[0].agent_id, "alpha");
    }

    #[tokio::test]
    async fn test_fallback_substitutes_default_agent_once() {
        let r = router(Some("base"));
        // No tag/keyword overlap with any candidate → low confidence.
        let q = Query::new("xyzzy", "ctx");
        let candidates = vec![
            descriptor("calc", "math", &["math"]),
            descriptor("base", "general assistant", &["chat"]),
        ];
        let decision = r.route(&q, &candidates).await.unwrap();
        assert!(decision.fallback);
        assert_eq!(decision.rankings[0].top().unwrap().agent_id, "base");
        // Confidence is reported, not hidden.
        assert!(decision.rankings[0].top().unwrap().confidence < 0.3);
        // At most one fallback entry for the default agent.
        let count = decision.rankings[0]
            .ranked
            .iter()
            .filter(|c| c.agent_id == "base")
            .count();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_low_confidence_without_default_keeps_best_candidate() {
        let r = router(None);
        let q = Query::new("xyzzy", "ctx");
        let candidates = vec![descriptor("calc", "math", &["math"])];
        let decision = r.route(&q, &candidates).await.unwrap();
        // Still routes somewhere; low confidence is an annotation, not an error.
        assert!(decision.fallback);
        assert_eq!(decision.rankings[0].top().unwrap().agent_id, "calc");
        assert!(decision.best_confidence() < 0.3);
    }

    #[tokio::test]
    async fn test_multi_intent_query_gets_ranking_per_intent() {
        let r = router(None);
        let q = Query::new("What's the weather in London and calculate 100 * 50?", "ctx");
        let candidates = vec![
            descriptor("calc", "mathematical calculation", &["math", "calculation"]),
            descriptor("weather", "weather forecasts", &["weather", "forecast"]),
        ];
        let decision = r.route(&q, &candidates).await.unwrap();
        assert_eq!(decision.rankings.len(), 2);
        assert_eq!(decision.rankings[0].intent.label, "weather");
        assert_eq!(decision.rankings[0].top().unwrap().agent_id, "weather");
        assert_eq!(decision.rankings[1].intent.label, "calculation");
        assert_eq!(decision.rankings[1].top().unwrap().agent_id, "calc");
    }

    #[tokio::test]
    async fn test_chosen_agent_is_from_candidate_set() {
        let r = router(Some("base"));
        let q = Query::new("anything at all", "ctx");
        let candidates = vec![descriptor("calc", "math", &["math"])];
        // Default agent "base" is not a healthy candidate → no substitution.
        let decision = r.route(&q, &candidates).await.unwrap();
        assert!(decision.fallback);
        for ranking in &decision.rankings {
            for c in &ranking.ranked {
                assert!(candidates.iter().any(|d| d.id == c.agent_id));
            }
        }
    }
}
