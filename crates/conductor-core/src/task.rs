use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A normalized capability tag.
///
/// Tags are the explicit skill vocabulary agents declare and queries are
/// matched against. Construction lowercases and trims so that matching is
/// a plain set operation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    /// Create a tag, normalizing case and surrounding whitespace.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_lowercase())
    }

    /// The normalized tag string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Tag {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// One user request needing routing and orchestration.
///
/// Immutable once created; everything downstream (decision, plan, task)
/// references it by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// Unique identifier for this query.
    pub id: Uuid,
    /// Raw query text.
    pub text: String,
    /// Conversation context this query belongs to.
    pub context_id: String,
    /// UTC arrival time.
    pub received_at: DateTime<Utc>,
}

impl Query {
    /// Create a new query in the given context.
    pub fn new(text: impl Into<String>, context_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            context_id: context_id.into(),
            received_at: Utc::now(),
        }
    }
}

/// Lifecycle state of a [`Task`].
///
/// Transitions: `Created → Working → {InputRequired, Completed, Failed,
/// Cancelled}`, plus `InputRequired → Working` on resumed input and
/// `Created → Failed` when routing/planning fails before execution starts.
/// `Completed`, `Failed`, and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Task accepted, plan not yet running.
    Created,
    /// Steps are being dispatched.
    Working,
    /// The task is suspended waiting for additional caller input.
    InputRequired,
    /// Every step reached a terminal state and artifacts were aggregated.
    Completed,
    /// A critical-path step or a pre-execution stage failed.
    Failed,
    /// The caller or the plan timeout cancelled the task.
    Cancelled,
}

impl TaskState {
    /// Whether this state admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Whether the state machine permits moving from `self` to `to`.
    pub fn can_transition(self, to: TaskState) -> bool {
        use TaskState::*;
        match (self, to) {
            (Created, Working) | (Created, Failed) | (Created, Cancelled) => true,
            (Working, InputRequired)
            | (Working, Completed)
            | (Working, Failed)
            | (Working, Cancelled) => true,
            (InputRequired, Working) | (InputRequired, Cancelled) | (InputRequired, Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Created => "created",
            TaskState::Working => "working",
            TaskState::InputRequired => "input_required",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A named output fragment produced by a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Fragment name (unique within a task).
    pub name: String,
    /// Textual content. Empty when `degraded` is set.
    pub content: String,
    /// The step that produced (or failed to produce) this fragment.
    pub step_id: Uuid,
    /// True when the producing step failed off the critical path and the
    /// fragment is absent.
    pub degraded: bool,
    /// UTC creation time.
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// A successfully produced fragment.
    pub fn new(name: impl Into<String>, content: impl Into<String>, step_id: Uuid) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            step_id,
            degraded: false,
            created_at: Utc::now(),
        }
    }

    /// Placeholder for a fragment whose producing step failed off the
    /// critical path.
    pub fn absent(name: impl Into<String>, step_id: Uuid) -> Self {
        Self {
            name: name.into(),
            content: String::new(),
            step_id,
            degraded: true,
            created_at: Utc::now(),
        }
    }
}

/// Tracked unit of work executing a plan for one query.
///
/// Single-writer invariant: after submission only the coordinator's run
/// loop mutates a task; readers see cloned snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier.
    pub id: Uuid,
    /// Conversation context the task belongs to.
    pub context_id: String,
    /// The query this task executes.
    pub query_id: Uuid,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Terminal error, when `state` is `Failed` or `Cancelled` with cause.
    pub error: Option<crate::error::ErrorInfo>,
    /// True when at least one non-critical step failed and its artifact is
    /// absent.
    pub degraded: bool,
    /// Ordered output fragments, merged in step-declaration order.
    pub artifacts: Vec<Artifact>,
    /// UTC creation time.
    pub created_at: DateTime<Utc>,
    /// UTC time of the last state change.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a task in [`TaskState::Created`] for a query.
    pub fn new(query: &Query) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            context_id: query.context_id.clone(),
            query_id: query.id,
            state: TaskState::Created,
            error: None,
            degraded: false,
            artifacts: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Attempt a state transition. Returns `false` (leaving the task
    /// untouched) if the state machine forbids it.
    pub fn transition(&mut self, to: TaskState) -> bool {
        if !self.state.can_transition(to) {
            return false;
        }
        self.state = to;
        self.updated_at = Utc::now();
        true
    }

    /// Record an output fragment.
    pub fn add_artifact(&mut self, artifact: Artifact) {
        if artifact.degraded {
            self.degraded = true;
        }
        self.artifacts.push(artifact);
    }
}
