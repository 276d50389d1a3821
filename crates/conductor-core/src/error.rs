use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for the Conductor engine.
///
/// Each variant corresponds to a stage of the routing/orchestration
/// pipeline that can fail. Recovery rules: discovery and probe failures
/// are absorbed by the registry (descriptor marked unhealthy) and never
/// surface here; low routing confidence is recovered via fallback selection
/// and reaches callers only as the `routing_low_confidence` annotation code;
/// step timeouts retry transparently before becoming
/// [`ConductorError::StepFailed`].
#[derive(Debug, Error)]
pub enum ConductorError {
    /// An agent endpoint was unreachable or returned a malformed manifest.
    #[error("discovery error: {0}")]
    Discovery(String),

    /// No healthy agent matched the query's requested capabilities.
    #[error("no agent available for query")]
    NoAgentAvailable,

    /// Best routing confidence fell below the configured threshold.
    /// Non-fatal: the router always recovers, substituting the default
    /// agent when one is configured and otherwise keeping the best
    /// candidate with the fallback flag set.
    #[error("routing confidence {confidence:.2} below threshold {threshold:.2}")]
    RoutingLowConfidence {
        /// Best confidence observed across candidates.
        confidence: f64,
        /// Configured minimum confidence.
        threshold: f64,
    },

    /// The planner produced or was given a graph with a cycle or a
    /// dependency on a step that does not exist.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// A single step invocation exceeded its per-call deadline.
    #[error("step {step_id} timed out after {timeout_ms}ms")]
    StepTimeout {
        /// Step that timed out.
        step_id: uuid::Uuid,
        /// Deadline that was exceeded, in milliseconds.
        timeout_ms: u64,
    },

    /// A step exhausted its retries and is permanently failed.
    #[error("step {step_id} failed: {reason}")]
    StepFailed {
        /// The failed step.
        step_id: uuid::Uuid,
        /// Terminal failure reason (last error observed).
        reason: String,
    },

    /// A critical-path step failed, failing the whole plan.
    #[error("plan failed: {0}")]
    PlanFailed(String),

    /// The task was cancelled by the caller or by the plan-level timeout.
    #[error("cancelled")]
    Cancelled,

    /// An error in configuration parsing or validation.
    #[error("config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConductorError {
    /// Stable error code string, used as the `ErrorInfo::code` on terminal
    /// tasks and as the cause label on the errors-total counter.
    pub fn code(&self) -> &'static str {
        match self {
            ConductorError::Discovery(_) => "discovery_error",
            ConductorError::NoAgentAvailable => "no_agent_available",
            ConductorError::RoutingLowConfidence { .. } => "routing_low_confidence",
            ConductorError::InvalidPlan(_) => "invalid_plan",
            ConductorError::StepTimeout { .. } => "step_timeout",
            ConductorError::StepFailed { .. } => "step_failed",
            ConductorError::PlanFailed(_) => "plan_failed",
            ConductorError::Cancelled => "cancelled",
            ConductorError::Config(_) => "config_error",
            ConductorError::Json(_) => "json_error",
            ConductorError::Io(_) => "io_error",
        }
    }

    /// Whether a failed attempt may succeed if tried again. Timeouts and
    /// transport-level failures are transient; everything else is treated
    /// as permanent and not retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConductorError::StepTimeout { .. }
                | ConductorError::Io(_)
                | ConductorError::Discovery(_)
        )
    }
}

/// A convenience `Result` alias using [`ConductorError`].
pub type ConductorResult<T> = Result<T, ConductorError>;

/// Error surface attached to a terminal task.
///
/// A terminal task always exposes its state, this optional error, and its
/// artifacts; failed data is flagged, never silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine-readable code (see [`ConductorError::code`]).
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorInfo {
    /// Build the caller-visible error info from an engine error.
    pub fn from_error(err: &ConductorError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(ConductorError::NoAgentAvailable.code(), "no_agent_available");
        assert_eq!(
            ConductorError::PlanFailed("x".into()).code(),
            "plan_failed"
        );
        assert_eq!(ConductorError::Cancelled.code(), "cancelled");
    }

    #[test]
    fn test_error_info_from_error() {
        let err = ConductorError::StepFailed {
            step_id: uuid::Uuid::new_v4(),
            reason: "connection reset".to_string(),
        };
        let info = ErrorInfo::from_error(&err);
        assert_eq!(info.code, "step_failed");
        assert!(info.message.contains("connection reset"));
    }

    #[test]
    fn test_retryable_classification() {
        let timeout = ConductorError::StepTimeout {
            step_id: uuid::Uuid::new_v4(),
            timeout_ms: 1000,
        };
        assert!(timeout.is_retryable());
        assert!(ConductorError::Discovery("connection refused".into()).is_retryable());

        let failed = ConductorError::StepFailed {
            step_id: uuid::Uuid::new_v4(),
            reason: "division by zero".to_string(),
        };
        assert!(!failed.is_retryable());
        assert!(!ConductorError::InvalidPlan("cycle".into()).is_retryable());
        assert!(!ConductorError::Cancelled.is_retryable());
    }

    #[test]
    fn test_low_confidence_display() {
        let err = ConductorError::RoutingLowConfidence {
            confidence: 0.12,
            threshold: 0.3,
        };
        let msg = err.to_string();
        assert!(msg.contains("0.12"));
        assert!(msg.contains("0.30"));
    }
}
