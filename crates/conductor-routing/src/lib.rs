//! Query routing and execution planning.
//!
//! The router scores healthy registry candidates against a query's
//! detected intents and returns a ranked decision with confidence; the
//! planner turns that decision into an acyclic execution plan whose steps
//! the coordinator dispatches. Semantic scoring and query decomposition
//! are injected strategies ([`ScorerPort`], [`DecomposerPort`]) so tests
//! can substitute deterministic fakes.
//!
//! # Main types
//!
//! - [`Router`] — Scores candidates per sub-intent, applies fallback.
//! - [`RoutingDecision`] — Ranked candidates with confidence ∈ [0,1].
//! - [`Planner`] — Builds a validated step DAG from a decision.
//! - [`ExecutionPlan`] / [`Step`] — The plan the coordinator executes.

/// Rule-based sub-intent detection.
pub mod intent;
/// Execution plan, steps, and DAG validation.
pub mod plan;
/// Query decomposition and plan construction.
pub mod planner;
/// Candidate scoring and routing decisions.
pub mod router;
/// Pluggable semantic-match scoring.
pub mod scorer;

pub use intent::{Intent, IntentRule, IntentRules};
pub use plan::{ExecutionPlan, InputBinding, Step, StepInput};
pub use planner::{DecomposerPort, Planner, RuleDecomposer, SubGoal};
pub use router::{IntentRouting, RankedCandidate, Router, RoutingDecision};
pub use scorer::{KeywordScorer, ScorerPort};
