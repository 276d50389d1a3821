use crate::intent::IntentRules;
use crate::plan::{ExecutionPlan, InputBinding, Step, StepInput};
use crate::router::RoutingDecision;
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult, Query, Tag};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// One sub-goal extracted from a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubGoal {
    /// Goal text sent to the target agent.
    pub description: String,
    /// Capability tags the goal asks for.
    pub tags: Vec<Tag>,
    /// Byte offset of the goal in the source text; orders siblings.
    pub position: usize,
    /// Index of an earlier sub-goal whose output feeds this one.
    pub feeds_from: Option<usize>,
}

/// Pluggable query-decomposition strategy.
///
/// May be rule-based or model-based; the planner only consumes the
/// resulting sub-goal list. Decomposition failures are recovered by
/// treating the whole query as a single goal.
#[async_trait]
pub trait DecomposerPort: Send + Sync {
    /// Break a query into sub-goals.
    async fn decompose(&self, query: &Query) -> ConductorResult<Vec<SubGoal>>;
}

/// Rule-based decomposer, the default strategy.
///
/// `" then "` marks an explicit sequential hand-off: every goal after it
/// consumes the output of the previous segment. Within a segment,
/// `" and "` separates independent sibling goals.
pub struct RuleDecomposer {
    rules: IntentRules,
}

impl RuleDecomposer {
    /// Build with the given intent rule table (used to tag each goal).
    pub fn new(rules: IntentRules) -> Self {
        Self { rules }
    }

    fn goal(&self, text: &str, position: usize, feeds_from: Option<usize>) -> SubGoal {
        let tags = self
            .rules
            .detect(text)
            .first()
            .map(|i| i.tags.clone())
            .unwrap_or_default();
        SubGoal {
            description: text.trim().trim_start_matches(',').trim().to_string(),
            tags,
            position,
            feeds_from,
        }
    }
}

impl Default for RuleDecomposer {
    fn default() -> Self {
        Self::new(IntentRules::default_rules())
    }
}

#[async_trait]
impl DecomposerPort for RuleDecomposer {
    async fn decompose(&self, query: &Query) -> ConductorResult<Vec<SubGoal>> {
        let separator = " then ";
        let text = &query.text;
        let mut goals: Vec<SubGoal> = Vec::new();
        let mut offset = 0usize;

        for segment in text.split(separator) {
            // Goals after the first segment consume the previous segment's
            // final output.
            let feeds_from = if goals.is_empty() {
                None
            } else {
                Some(goals.len() - 1)
            };
            for part in segment.split(" and ") {
                let trimmed = part.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let position = text[offset..]
                    .find(trimmed)
                    .map(|p| p + offset)
                    .unwrap_or(offset);
                goals.push(self.goal(trimmed, position, feeds_from));
            }
            // Advance past the separator too, so a later goal repeating an
            // earlier phrase is still located in its own segment.
            offset += segment.len() + separator.len();
        }

        if goals.is_empty() {
            goals.push(self.goal(text, 0, None));
        }
        Ok(goals)
    }
}

/// Turns a query plus its routing decision into a validated execution
/// plan.
pub struct Planner {
    decomposer: Arc<dyn DecomposerPort>,
}

impl Planner {
    /// Build a planner with the given decomposition strategy.
    pub fn new(decomposer: Arc<dyn DecomposerPort>) -> Self {
        Self { decomposer }
    }

    /// Build an acyclic plan: one step per sub-goal, targeted at the top
    /// ranked candidate for the matching sub-intent. Independent goals
    /// become sibling steps; `feeds_from` relations become dependency
    /// edges with artifact bindings. Fails with
    /// [`ConductorError::InvalidPlan`] on any cycle or dangling
    /// reference.
    pub async fn plan(
        &self,
        query: &Query,
        decision: &RoutingDecision,
    ) -> ConductorResult<ExecutionPlan> {
        let goals = match self.decomposer.decompose(query).await {
            Ok(goals) if !goals.is_empty() => goals,
            Ok(_) => vec![whole_query_goal(query)],
            Err(e) => {
                warn!(query = %query.id, error = %e, "decomposition failed, using whole query");
                vec![whole_query_goal(query)]
            }
        };

        let mut steps: Vec<Step> = Vec::with_capacity(goals.len());
        for (idx, goal) in goals.iter().enumerate() {
            let agent_id = self.target_for(goal, decision)?;

            let (depends_on, bindings) = match goal.feeds_from {
                Some(from_idx) => {
                    let upstream = steps.get(from_idx).ok_or_else(|| {
                        ConductorError::InvalidPlan(format!(
                            "sub-goal {idx} feeds from out-of-range goal {from_idx}"
                        ))
                    })?;
                    (
                        vec![upstream.id],
                        vec![InputBinding {
                            from_step: upstream.id,
                            artifact: upstream.name.clone(),
                        }],
                    )
                }
                None => (Vec::new(), Vec::new()),
            };

            steps.push(Step {
                id: Uuid::new_v4(),
                name: format!("step{}_{agent_id}", idx + 1),
                agent_id,
                input: StepInput {
                    text: goal.description.clone(),
                    bindings,
                },
                depends_on,
                position: goal.position,
            });
        }

        // Deterministic declaration order: source-text position, which is
        // also the artifact aggregation order.
        steps.sort_by_key(|s| s.position);

        let plan = ExecutionPlan::new(query.id, query.context_id.clone(), steps);
        plan.validate()?;
        info!(
            query = %query.id,
            plan = %plan.id,
            steps = plan.steps.len(),
            roots = plan.roots().len(),
            "plan built"
        );
        Ok(plan)
    }

    /// Pick the ranking whose sub-intent overlaps the goal's tags; fall
    /// back to the decision's first ranking.
    fn target_for(&self, goal: &SubGoal, decision: &RoutingDecision) -> ConductorResult<String> {
        let ranking = decision
            .rankings
            .iter()
            .find(|r| r.intent.tags.iter().any(|t| goal.tags.contains(t)))
            .or_else(|| decision.rankings.first())
            .ok_or(ConductorError::NoAgentAvailable)?;
        ranking
            .top()
            .map(|c| c.agent_id.clone())
            .ok_or(ConductorError::NoAgentAvailable)
    }
}

fn whole_query_goal(query: &Query) -> SubGoal {
    SubGoal {
        description: query.text.clone(),
        tags: Vec::new(),
        position: 0,
        feeds_from: None,
    }
}
