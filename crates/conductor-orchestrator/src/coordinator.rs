use crate::client::{AgentClient, AgentReply, StepCall};
use crate::events::EventBus;
use crate::metrics::Metrics;
use conductor_core::{
    Artifact, ConductorError, ConductorResult, CoordinatorConfig, ErrorInfo, Event, EventType,
    Task, TaskState,
};
use conductor_registry::Registry;
use conductor_routing::{ExecutionPlan, Step};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Internal lifecycle of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepStatus {
    Pending,
    Running,
    AwaitingInput,
    Completed,
    Failed,
    Cancelled,
}

impl StepStatus {
    fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Cancelled
        )
    }
}

/// Outcome of one step execution.
enum StepOutcome {
    Artifact(Artifact),
    NeedsInput(String),
}

type StepResult = (Uuid, ConductorResult<StepOutcome>);

/// Bookkeeping for cancel/resume of a task in flight. Dropped once the
/// task goes terminal; only the terminal state is retained after that.
struct TaskEntry {
    token: CancellationToken,
    input_tx: mpsc::UnboundedSender<String>,
    state: TaskState,
}

/// How many terminal task states are kept for late `cancel`/`task_state`
/// lookups before the oldest is forgotten.
const TERMINAL_RETENTION: usize = 256;

/// Bounded record of recently finished tasks, oldest evicted first.
struct TerminalLog {
    order: VecDeque<Uuid>,
    states: HashMap<Uuid, TaskState>,
}

impl TerminalLog {
    fn new() -> Self {
        Self {
            order: VecDeque::with_capacity(TERMINAL_RETENTION),
            states: HashMap::new(),
        }
    }

    fn record(&mut self, task_id: Uuid, state: TaskState) {
        if self.states.insert(task_id, state).is_none() {
            if self.order.len() == TERMINAL_RETENTION {
                if let Some(evicted) = self.order.pop_front() {
                    self.states.remove(&evicted);
                }
            }
            self.order.push_back(task_id);
        }
    }

    fn get(&self, task_id: &Uuid) -> Option<TaskState> {
        self.states.get(task_id).copied()
    }
}

/// Compute the backoff delay for a retry attempt: `base × factor^attempt`
/// with symmetric jitter applied.
pub fn retry_delay(config: &CoordinatorConfig, attempt: u32) -> Duration {
    let base = config.backoff_base_ms as f64 * config.backoff_factor.powi(attempt as i32);
    let jitter = if config.backoff_jitter > 0.0 {
        rand::thread_rng().gen_range(-config.backoff_jitter..=config.backoff_jitter)
    } else {
        0.0
    };
    Duration::from_millis((base * (1.0 + jitter)).max(0.0) as u64)
}

/// The task-lifecycle state machine.
///
/// Dispatches plan steps respecting dependencies with bounded
/// parallelism, enforces per-call and plan deadlines, retries transient
/// failures with jittered exponential backoff, applies the
/// partial-failure policy, and aggregates artifacts in step-declaration
/// order. A task has exactly one active owner: the `execute` loop is the
/// single writer of its task record; everyone else sees snapshots.
pub struct Coordinator {
    registry: Arc<Registry>,
    events: Arc<EventBus>,
    metrics: Arc<Metrics>,
    client: Arc<dyn AgentClient>,
    config: CoordinatorConfig,
    tasks: Mutex<HashMap<Uuid, TaskEntry>>,
    finished: Mutex<TerminalLog>,
}

impl Coordinator {
    /// Build a coordinator over its collaborators.
    pub fn new(
        registry: Arc<Registry>,
        events: Arc<EventBus>,
        metrics: Arc<Metrics>,
        client: Arc<dyn AgentClient>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            registry,
            events,
            metrics,
            client,
            config,
            tasks: Mutex::new(HashMap::new()),
            finished: Mutex::new(TerminalLog::new()),
        }
    }

    /// Request cancellation of a task.
    ///
    /// Idempotent: cancelling an already-terminal task is a no-op that
    /// returns the retained terminal state. Returns `None` for task ids
    /// the coordinator never saw or has already forgotten.
    pub fn cancel(&self, task_id: Uuid) -> Option<TaskState> {
        if let Some(state) = self.finished.lock().get(&task_id) {
            debug!(task = %task_id, state = %state, "cancel on terminal task is a no-op");
            return Some(state);
        }
        let tasks = self.tasks.lock();
        let entry = tasks.get(&task_id)?;
        if entry.state.is_terminal() {
            return Some(entry.state);
        }
        info!(task = %task_id, "cancellation requested");
        entry.token.cancel();
        Some(entry.state)
    }

    /// Supply the input an `InputRequired` task is waiting for. Returns
    /// `false` if the task is unknown or already terminal.
    pub fn provide_input(&self, task_id: Uuid, input: impl Into<String>) -> bool {
        let tasks = self.tasks.lock();
        match tasks.get(&task_id) {
            Some(entry) if !entry.state.is_terminal() => entry.input_tx.send(input.into()).is_ok(),
            _ => false,
        }
    }

    /// Last known state of a task, if the coordinator has seen it
    /// recently enough.
    pub fn task_state(&self, task_id: Uuid) -> Option<TaskState> {
        if let Some(entry) = self.tasks.lock().get(&task_id) {
            return Some(entry.state);
        }
        self.finished.lock().get(&task_id)
    }

    /// Number of tasks currently holding live bookkeeping (a cancel token
    /// and an input channel). Terminal tasks are not counted.
    pub fn active_task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    fn set_state(&self, task_id: Uuid, state: TaskState) {
        if let Some(entry) = self.tasks.lock().get_mut(&task_id) {
            entry.state = state;
        }
    }

    /// Drop the live entry for a finished task, keeping only its terminal
    /// state in the bounded log.
    fn retire(&self, task_id: Uuid, state: TaskState) {
        self.tasks.lock().remove(&task_id);
        self.finished.lock().record(task_id, state);
    }

    /// Execute a validated plan, driving the owning task to a terminal
    /// state. The task must be freshly created.
    pub async fn execute(&self, mut task: Task, plan: &ExecutionPlan) -> ConductorResult<Task> {
        plan.validate()?;

        let token = CancellationToken::new();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        self.tasks.lock().insert(
            task.id,
            TaskEntry {
                token: token.clone(),
                input_tx,
                state: TaskState::Created,
            },
        );

        self.metrics.task_started();
        self.publish_task_state(&task);

        task.transition(TaskState::Working);
        self.set_state(task.id, TaskState::Working);
        self.publish_task_state(&task);

        info!(task = %task.id, plan = %plan.id, steps = plan.steps.len(), "executing plan");
        self.run_plan(&mut task, plan, &token, input_rx).await;

        self.retire(task.id, task.state);
        self.metrics.task_finished();
        if let Some(err) = &task.error {
            self.metrics.record_error(&err.code);
        }
        info!(task = %task.id, state = %task.state, degraded = task.degraded, "task terminal");
        Ok(task)
    }

    /// Main dispatch loop. Leaves `task` in a terminal state.
    async fn run_plan(
        &self,
        task: &mut Task,
        plan: &ExecutionPlan,
        token: &CancellationToken,
        mut input_rx: mpsc::UnboundedReceiver<String>,
    ) {
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.plan_timeout_secs);
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallelism));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<StepResult>();

        let mut status: HashMap<Uuid, StepStatus> = plan
            .steps
            .iter()
            .map(|s| (s.id, StepStatus::Pending))
            .collect();
        let mut artifacts: HashMap<Uuid, Artifact> = HashMap::new();
        let mut awaiting_input: Vec<Uuid> = Vec::new();
        let mut supplements: HashMap<Uuid, String> = HashMap::new();

        loop {
            self.propagate_cancellations(task, plan, &mut status);

            if status.values().all(|s| s.is_terminal()) {
                self.aggregate(task, plan, &mut artifacts);
                return;
            }

            let started = self.dispatch_ready(
                task, plan, &status, &supplements, &artifacts, token, &semaphore, &done_tx,
            );
            for id in started {
                status.insert(id, StepStatus::Running);
            }

            let waiting = !awaiting_input.is_empty();
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    self.unwind(task, plan, &mut status, &mut done_rx, &mut artifacts, ConductorError::Cancelled).await;
                    return;
                }

                _ = tokio::time::sleep_until(deadline) => {
                    warn!(task = %task.id, "plan timeout expired");
                    token.cancel();
                    self.unwind(task, plan, &mut status, &mut done_rx, &mut artifacts, ConductorError::Cancelled).await;
                    return;
                }

                input = input_rx.recv(), if waiting => {
                    let Some(input) = input else { continue };
                    task.transition(TaskState::Working);
                    self.set_state(task.id, TaskState::Working);
                    self.publish_task_state(task);
                    for step_id in awaiting_input.drain(..) {
                        supplements.insert(step_id, input.clone());
                        status.insert(step_id, StepStatus::Pending);
                    }
                }

                result = done_rx.recv() => {
                    // Sender side lives as long as this loop; recv cannot
                    // yield None here.
                    let Some((step_id, outcome)) = result else { return };
                    let escalate = self.handle_step_result(
                        task, plan, &mut status, &mut artifacts, &mut awaiting_input, step_id, outcome,
                    );
                    if let Some(cause) = escalate {
                        token.cancel();
                        self.unwind(task, plan, &mut status, &mut done_rx, &mut artifacts, cause).await;
                        return;
                    }
                }
            }
        }
    }

    /// Steps whose dependencies can no longer all succeed are cancelled,
    /// transitively.
    fn propagate_cancellations(
        &self,
        task: &Task,
        plan: &ExecutionPlan,
        status: &mut HashMap<Uuid, StepStatus>,
    ) {
        loop {
            let doomed: Vec<Uuid> = plan
                .steps
                .iter()
                .filter(|s| status[&s.id] == StepStatus::Pending)
                .filter(|s| {
                    s.depends_on.iter().any(|d| {
                        matches!(status[d], StepStatus::Failed | StepStatus::Cancelled)
                    })
                })
                .map(|s| s.id)
                .collect();
            if doomed.is_empty() {
                return;
            }
            for id in doomed {
                status.insert(id, StepStatus::Cancelled);
                self.publish_step(task, plan, id, EventType::StepCancelled, None);
            }
        }
    }

    /// Dispatch every pending step whose dependencies are all completed.
    /// Returns the ids that moved to `Running`.
    #[allow(clippy::too_many_arguments)]
    fn dispatch_ready(
        &self,
        task: &Task,
        plan: &ExecutionPlan,
        status: &HashMap<Uuid, StepStatus>,
        supplements: &HashMap<Uuid, String>,
        artifacts: &HashMap<Uuid, Artifact>,
        token: &CancellationToken,
        semaphore: &Arc<Semaphore>,
        done_tx: &mpsc::UnboundedSender<StepResult>,
    ) -> Vec<Uuid> {
        let mut started = Vec::new();
        for step in &plan.steps {
            if status[&step.id] != StepStatus::Pending {
                continue;
            }
            let ready = step
                .depends_on
                .iter()
                .all(|d| status[d] == StepStatus::Completed);
            if !ready {
                continue;
            }

            let inputs: Vec<Artifact> = step
                .input
                .bindings
                .iter()
                .filter_map(|b| artifacts.get(&b.from_step).cloned())
                .collect();

            self.publish_step(task, plan, step.id, EventType::StepStarted, None);
            started.push(step.id);

            tokio::spawn(Self::run_step(
                self.registry.clone(),
                self.events.clone(),
                self.metrics.clone(),
                self.client.clone(),
                self.config.clone(),
                step.clone(),
                task.id,
                task.context_id.clone(),
                inputs,
                supplements.get(&step.id).cloned(),
                token.child_token(),
                semaphore.clone(),
                done_tx.clone(),
            ));
        }
        started
    }

    /// Fold a finished step back into the plan state. Returns the cause
    /// to escalate with when a critical-path step failed.
    #[allow(clippy::too_many_arguments)]
    fn handle_step_result(
        &self,
        task: &mut Task,
        plan: &ExecutionPlan,
        status: &mut HashMap<Uuid, StepStatus>,
        artifacts: &mut HashMap<Uuid, Artifact>,
        awaiting_input: &mut Vec<Uuid>,
        step_id: Uuid,
        outcome: ConductorResult<StepOutcome>,
    ) -> Option<ConductorError> {
        match outcome {
            Ok(StepOutcome::Artifact(artifact)) => {
                status.insert(step_id, StepStatus::Completed);
                self.publish_step(
                    task,
                    plan,
                    step_id,
                    EventType::StepCompleted,
                    None,
                );
                self.publish_step(
                    task,
                    plan,
                    step_id,
                    EventType::ArtifactProduced,
                    Some(serde_json::json!({"artifact": artifact.name})),
                );
                artifacts.insert(step_id, artifact);
                None
            }
            Ok(StepOutcome::NeedsInput(prompt)) => {
                status.insert(step_id, StepStatus::AwaitingInput);
                awaiting_input.push(step_id);
                task.transition(TaskState::InputRequired);
                self.set_state(task.id, TaskState::InputRequired);
                self.publish_event(
                    task,
                    EventType::TaskStateChanged,
                    serde_json::json!({"state": task.state, "prompt": prompt}),
                );
                None
            }
            Err(ConductorError::Cancelled) => {
                status.insert(step_id, StepStatus::Cancelled);
                self.publish_step(task, plan, step_id, EventType::StepCancelled, None);
                None
            }
            Err(err) => {
                status.insert(step_id, StepStatus::Failed);
                self.publish_step(
                    task,
                    plan,
                    step_id,
                    EventType::StepFailed,
                    Some(serde_json::json!({"error": err.to_string()})),
                );
                self.metrics.record_error(err.code());

                if plan.is_critical(step_id) {
                    let name = plan.step(step_id).map(|s| s.name.clone()).unwrap_or_default();
                    error!(task = %task.id, step = %name, error = %err, "critical-path step failed");
                    return Some(ConductorError::PlanFailed(format!(
                        "critical step '{name}' failed: {err}"
                    )));
                }

                // Off the critical path: record the absence and continue
                // degraded.
                if let Some(step) = plan.step(step_id) {
                    warn!(task = %task.id, step = %step.name, error = %err, "non-critical step failed, degrading result");
                    artifacts.insert(step_id, Artifact::absent(step.name.clone(), step_id));
                }
                None
            }
        }
    }

    /// Cooperative shutdown: give in-flight steps the grace period to
    /// finish, then mark every non-terminal step cancelled and drive the
    /// task to its terminal state. No further events are published for
    /// the context afterwards.
    async fn unwind(
        &self,
        task: &mut Task,
        plan: &ExecutionPlan,
        status: &mut HashMap<Uuid, StepStatus>,
        done_rx: &mut mpsc::UnboundedReceiver<StepResult>,
        artifacts: &mut HashMap<Uuid, Artifact>,
        cause: ConductorError,
    ) {
        let grace = tokio::time::Instant::now()
            + Duration::from_millis(self.config.cancel_grace_ms);

        while status.values().any(|s| *s == StepStatus::Running) {
            match tokio::time::timeout_at(grace, done_rx.recv()).await {
                Ok(Some((step_id, Ok(StepOutcome::Artifact(artifact))))) => {
                    // Finished cleanly inside the grace period.
                    status.insert(step_id, StepStatus::Completed);
                    artifacts.insert(step_id, artifact);
                }
                Ok(Some((step_id, _))) => {
                    status.insert(step_id, StepStatus::Cancelled);
                    self.publish_step(task, plan, step_id, EventType::StepCancelled, None);
                }
                Ok(None) | Err(_) => break, // grace expired; abandon the rest
            }
        }

        for step in &plan.steps {
            if !status[&step.id].is_terminal() {
                status.insert(step.id, StepStatus::Cancelled);
                self.publish_step(task, plan, step.id, EventType::StepCancelled, None);
            }
        }

        // Partial results survive the unwind rather than being dropped.
        for step in &plan.steps {
            if let Some(artifact) = artifacts.remove(&step.id) {
                task.add_artifact(artifact);
            }
        }

        let terminal = match &cause {
            ConductorError::Cancelled => TaskState::Cancelled,
            _ => TaskState::Failed,
        };
        task.error = Some(ErrorInfo::from_error(&cause));
        task.transition(terminal);
        self.set_state(task.id, terminal);
        self.publish_task_state(task);
    }

    /// Merge artifacts in step-declaration order and complete the task.
    /// A single-step plan passes its artifact through unchanged.
    fn aggregate(
        &self,
        task: &mut Task,
        plan: &ExecutionPlan,
        artifacts: &mut HashMap<Uuid, Artifact>,
    ) {
        for step in &plan.steps {
            if let Some(artifact) = artifacts.remove(&step.id) {
                task.add_artifact(artifact);
            }
        }
        task.transition(TaskState::Completed);
        self.set_state(task.id, TaskState::Completed);
        self.publish_task_state(task);
    }

    /// One step's attempt loop: deadline per call, jittered exponential
    /// backoff between retries, cooperative cancellation throughout.
    #[allow(clippy::too_many_arguments)]
    async fn run_step(
        registry: Arc<Registry>,
        events: Arc<EventBus>,
        metrics: Arc<Metrics>,
        client: Arc<dyn AgentClient>,
        config: CoordinatorConfig,
        step: Step,
        task_id: Uuid,
        context_id: String,
        inputs: Vec<Artifact>,
        supplement: Option<String>,
        token: CancellationToken,
        semaphore: Arc<Semaphore>,
        done_tx: mpsc::UnboundedSender<StepResult>,
    ) {
        let Ok(_permit) = semaphore.acquire_owned().await else {
            let _ = done_tx.send((step.id, Err(ConductorError::Cancelled)));
            return;
        };

        let result = Self::attempt_loop(
            &registry, &events, &metrics, &*client, &config, &step, task_id, &context_id,
            &inputs, supplement.as_deref(), &token,
        )
        .await;
        let _ = done_tx.send((step.id, result));
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt_loop(
        registry: &Registry,
        events: &Arc<EventBus>,
        metrics: &Metrics,
        client: &dyn AgentClient,
        config: &CoordinatorConfig,
        step: &Step,
        task_id: Uuid,
        context_id: &str,
        inputs: &[Artifact],
        supplement: Option<&str>,
        token: &CancellationToken,
    ) -> ConductorResult<StepOutcome> {
        let Some(descriptor) = registry.get(&step.agent_id) else {
            return Err(ConductorError::StepFailed {
                step_id: step.id,
                reason: format!("agent '{}' not registered", step.agent_id),
            });
        };
        let deadline = Duration::from_secs(config.step_timeout_secs);
        let timeout_ms = deadline.as_millis() as u64;
        let text = match supplement {
            Some(extra) => format!("{}\n{extra}", step.input.text),
            None => step.input.text.clone(),
        };

        let mut last_err: Option<ConductorError> = None;
        for attempt in 0..=config.max_retries {
            if token.is_cancelled() {
                return Err(ConductorError::Cancelled);
            }

            if attempt > 0 {
                let delay = retry_delay(config, attempt - 1);
                debug!(
                    step = %step.name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after backoff"
                );
                events.publish(Event::new(
                    EventType::StepRetrying,
                    context_id,
                    task_id,
                    serde_json::json!({"step": step.name, "attempt": attempt}),
                ));
                tokio::select! {
                    _ = token.cancelled() => return Err(ConductorError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let (progress_tx, progress_rx) = mpsc::channel(16);
            Self::forward_progress(
                events.clone(),
                context_id.to_string(),
                task_id,
                step.name.clone(),
                progress_rx,
            );

            let call = StepCall {
                step_id: step.id,
                context_id: context_id.to_string(),
                text: text.clone(),
                inputs: inputs.to_vec(),
                progress: progress_tx,
            };

            registry.begin_call(&step.agent_id);
            let started = tokio::time::Instant::now();
            let outcome = tokio::select! {
                _ = token.cancelled() => {
                    registry.end_call(&step.agent_id);
                    return Err(ConductorError::Cancelled);
                }
                res = tokio::time::timeout(deadline, client.invoke(&descriptor, call)) => res,
            };
            registry.end_call(&step.agent_id);
            metrics.observe_latency(&step.agent_id, started.elapsed().as_millis() as u64);

            match outcome {
                Ok(Ok(AgentReply::Artifact { name, content })) => {
                    registry.record_outcome(&step.agent_id, true);
                    let artifact =
                        Artifact::new(name.unwrap_or_else(|| step.name.clone()), content, step.id);
                    return Ok(StepOutcome::Artifact(artifact));
                }
                Ok(Ok(AgentReply::InputRequired { prompt })) => {
                    // Not a failure; the agent is waiting on the caller.
                    return Ok(StepOutcome::NeedsInput(prompt));
                }
                Ok(Err(e)) => {
                    registry.record_outcome(&step.agent_id, false);
                    if !e.is_retryable() {
                        warn!(step = %step.name, attempt, error = %e, "step failed permanently");
                        last_err = Some(e);
                        break;
                    }
                    warn!(step = %step.name, attempt, error = %e, "step attempt failed");
                    last_err = Some(e);
                }
                Err(_elapsed) => {
                    registry.record_outcome(&step.agent_id, false);
                    metrics.record_error("step_timeout");
                    warn!(step = %step.name, attempt, timeout_ms, "step attempt timed out");
                    last_err = Some(ConductorError::StepTimeout {
                        step_id: step.id,
                        timeout_ms,
                    });
                }
            }
        }

        let reason = last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown failure".to_string());
        Err(ConductorError::StepFailed {
            step_id: step.id,
            reason,
        })
    }

    /// Bridge an agent's intermediate progress strings onto the event
    /// stream.
    fn forward_progress(
        events: Arc<EventBus>,
        context_id: String,
        task_id: Uuid,
        step_name: String,
        mut rx: mpsc::Receiver<String>,
    ) {
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                events.publish(Event::new(
                    EventType::StepProgress,
                    context_id.clone(),
                    task_id,
                    serde_json::json!({"step": step_name, "message": message}),
                ));
            }
        });
    }

    fn publish_task_state(&self, task: &Task) {
        self.publish_event(
            task,
            EventType::TaskStateChanged,
            serde_json::json!({"state": task.state}),
        );
    }

    fn publish_event(&self, task: &Task, event_type: EventType, payload: serde_json::Value) {
        self.events
            .publish(Event::new(event_type, task.context_id.clone(), task.id, payload));
    }

    fn publish_step(
        &self,
        task: &Task,
        plan: &ExecutionPlan,
        step_id: Uuid,
        event_type: EventType,
        extra: Option<serde_json::Value>,
    ) {
        let name = plan
            .step(step_id)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        let mut payload = serde_json::json!({"step": name});
        if let (Some(obj), Some(serde_json::Value::Object(extra))) =
            (payload.as_object_mut(), extra)
        {
            obj.extend(extra);
        }
        self.publish_event(task, event_type, payload);
    }
}
