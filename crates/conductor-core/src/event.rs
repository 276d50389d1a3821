use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of progress event emitted while a task executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// The task moved to a new lifecycle state.
    TaskStateChanged,
    /// A routing decision was made for the query.
    RoutingDecided,
    /// The planner produced an execution plan.
    PlanBuilt,
    /// A step was dispatched to its target agent.
    StepStarted,
    /// The target agent emitted intermediate progress for a step.
    StepProgress,
    /// A step finished successfully.
    StepCompleted,
    /// A step is being retried after a transient failure.
    StepRetrying,
    /// A step exhausted its retries or failed permanently.
    StepFailed,
    /// A step was cancelled before reaching a terminal result.
    StepCancelled,
    /// A step produced an output fragment.
    ArtifactProduced,
}

/// An ordered, per-context progress event.
///
/// `seq` is assigned by the event bus and is strictly increasing within a
/// context; there is no ordering relation across contexts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event kind.
    pub event_type: EventType,
    /// Context this event belongs to.
    pub context_id: String,
    /// Task that produced the event.
    pub task_id: Uuid,
    /// Per-context sequence number, assigned at publish time.
    pub seq: u64,
    /// Structured payload; shape depends on `event_type`.
    pub payload: serde_json::Value,
    /// UTC publish time.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Build an event with an unassigned sequence number (the bus fills it
    /// in at publish time).
    pub fn new(
        event_type: EventType,
        context_id: impl Into<String>,
        task_id: Uuid,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            context_id: context_id.into(),
            task_id,
            seq: 0,
            payload,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_serialization() {
        let json = serde_json::to_string(&EventType::StepRetrying).unwrap();
        assert_eq!(json, "\"step_retrying\"");
    }

    #[test]
    fn test_event_roundtrip() {
        let ev = Event::new(
            EventType::StepCompleted,
            "ctx-1",
            Uuid::new_v4(),
            serde_json::json!({"step": "s1"}),
        );
        let json = serde_json::to_string(&ev).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type, EventType::StepCompleted);
        assert_eq!(parsed.context_id, "ctx-1");
        assert_eq!(parsed.seq, 0);
    }
}
