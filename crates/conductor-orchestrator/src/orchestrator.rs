use crate::client::AgentClient;
use crate::coordinator::Coordinator;
use crate::events::EventBus;
use crate::metrics::Metrics;
use conductor_core::{
    ConductorConfig, ConductorError, ConductorResult, ErrorInfo, Event, EventType, Query, Task,
    TaskState,
};
use conductor_registry::Registry;
use conductor_routing::{
    DecomposerPort, IntentRules, KeywordScorer, Planner, RoutingDecision, Router, RuleDecomposer,
    ScorerPort,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Front door of the engine: routes a query, plans its execution, and
/// hands the plan to the coordinator. Every outcome surfaces as a task;
/// pre-execution failures produce a task that goes straight from
/// `Created` to `Failed` rather than an `Err`.
pub struct Orchestrator {
    registry: Arc<Registry>,
    router: Router,
    planner: Planner,
    coordinator: Arc<Coordinator>,
    events: Arc<EventBus>,
    metrics: Arc<Metrics>,
    confidence_threshold: f64,
}

impl Orchestrator {
    /// Build an orchestrator with the rule-based scorer and decomposer.
    pub fn new(config: ConductorConfig, client: Arc<dyn AgentClient>) -> Self {
        let scorer: Arc<dyn ScorerPort> = Arc::new(KeywordScorer);
        let decomposer: Arc<dyn DecomposerPort> =
            Arc::new(RuleDecomposer::new(IntentRules::default_rules()));
        Self::with_ports(config, client, scorer, decomposer)
    }

    /// Build an orchestrator with injected routing strategies.
    pub fn with_ports(
        config: ConductorConfig,
        client: Arc<dyn AgentClient>,
        scorer: Arc<dyn ScorerPort>,
        decomposer: Arc<dyn DecomposerPort>,
    ) -> Self {
        let registry = Arc::new(Registry::new(config.registry.clone()));
        let events = Arc::new(EventBus::new(config.events.clone()));
        let metrics = Arc::new(Metrics::new());
        let router = Router::new(
            config.router.clone(),
            IntentRules::default_rules(),
            scorer,
        );
        let planner = Planner::new(decomposer);
        let coordinator = Arc::new(Coordinator::new(
            registry.clone(),
            events.clone(),
            metrics.clone(),
            client,
            config.coordinator.clone(),
        ));
        Self {
            registry,
            router,
            planner,
            coordinator,
            events,
            metrics,
            confidence_threshold: config.router.confidence_threshold,
        }
    }

    /// The agent registry, for discovery and health probes.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The event bus, for context subscriptions.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Engine-wide counters and latency histograms.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// The coordinator, for cancel and input delivery.
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Route, plan, and execute one query. Returns the terminal task.
    pub async fn handle(
        &self,
        text: impl Into<String>,
        context_id: impl Into<String>,
    ) -> ConductorResult<Task> {
        self.metrics.record_request();
        let query = Query::new(text, context_id);
        let task = Task::new(&query);
        info!(query = %query.id, task = %task.id, "handling query");

        let decision = match self.decide(&query).await {
            Ok(decision) => decision,
            Err(e) => return Ok(self.reject(task, e)),
        };
        // Low confidence is an annotation on the decision, never a rejection.
        let low_confidence = decision.fallback.then(|| {
            let note = ConductorError::RoutingLowConfidence {
                confidence: decision.best_confidence(),
                threshold: self.confidence_threshold,
            };
            warn!(task = %task.id, note = %note, "routing below confidence threshold");
            ErrorInfo::from_error(&note)
        });
        self.events.publish(Event::new(
            EventType::RoutingDecided,
            query.context_id.clone(),
            task.id,
            serde_json::json!({
                "confidence": decision.best_confidence(),
                "fallback": decision.fallback,
                "sub_intents": decision.rankings.len(),
                "low_confidence": low_confidence,
            }),
        ));

        let plan = match self.planner.plan(&query, &decision).await {
            Ok(plan) => plan,
            Err(e) => return Ok(self.reject(task, e)),
        };
        self.events.publish(Event::new(
            EventType::PlanBuilt,
            query.context_id.clone(),
            task.id,
            serde_json::json!({
                "plan": plan.id,
                "steps": plan.steps.iter().map(|s| s.name.clone()).collect::<Vec<_>>(),
            }),
        ));

        self.coordinator.execute(task, &plan).await
    }

    /// Route the query across the currently healthy agents. Low confidence
    /// surfaces on the decision as a fallback annotation rather than an
    /// error; only an empty candidate set fails here.
    async fn decide(&self, query: &Query) -> ConductorResult<RoutingDecision> {
        let candidates = self.registry.candidates(&[]);
        self.router.route(query, &candidates).await
    }

    /// Fail a task before execution starts: `Created` straight to
    /// `Failed`, with the cause attached.
    fn reject(&self, mut task: Task, cause: ConductorError) -> Task {
        warn!(task = %task.id, error = %cause, "rejecting query before execution");
        self.metrics.record_error(cause.code());
        task.error = Some(ErrorInfo::from_error(&cause));
        task.transition(TaskState::Failed);
        self.events.publish(Event::new(
            EventType::TaskStateChanged,
            task.context_id.clone(),
            task.id,
            serde_json::json!({"state": task.state, "error": task.error}),
        ));
        task
    }
}
