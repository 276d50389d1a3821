use serde::{Deserialize, Serialize};

/// Registry and health-probe tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Seconds between health-probe rounds.
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    /// Consecutive failed probes before a descriptor is marked unhealthy.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Per-probe deadline in seconds.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_probe_interval_secs() -> u64 {
    10
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_probe_timeout_secs() -> u64 {
    5
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval_secs(),
            failure_threshold: default_failure_threshold(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl RegistryConfig {
    /// Consecutive failures after which a descriptor is removed entirely.
    /// Unhealthy-but-known agents come back on one good probe; agents past
    /// this point must be re-discovered.
    pub fn removal_threshold(&self) -> u32 {
        self.failure_threshold.saturating_mul(2)
    }
}

/// Router scoring weights and fallback threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Minimum confidence before falling back to the default agent.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Weight of the tag-overlap component.
    #[serde(default = "default_tag_weight")]
    pub tag_weight: f64,
    /// Weight of the historical success-rate component.
    #[serde(default = "default_success_weight")]
    pub success_weight: f64,
    /// Weight of the pluggable semantic-match component.
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    /// Id of the designated default/general agent used for fallback.
    #[serde(default)]
    pub default_agent: Option<String>,
}

fn default_confidence_threshold() -> f64 {
    0.3
}

fn default_tag_weight() -> f64 {
    0.5
}

fn default_success_weight() -> f64 {
    0.2
}

fn default_semantic_weight() -> f64 {
    0.3
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            tag_weight: default_tag_weight(),
            success_weight: default_success_weight(),
            semantic_weight: default_semantic_weight(),
            default_agent: None,
        }
    }
}

/// Coordinator dispatch, retry, and timeout tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Maximum in-flight steps per plan.
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
    /// Per-step call deadline in seconds.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    /// Whole-plan deadline in seconds.
    #[serde(default = "default_plan_timeout_secs")]
    pub plan_timeout_secs: u64,
    /// Retries per step after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Backoff multiplier per attempt.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Symmetric jitter fraction applied to each backoff delay.
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,
    /// Grace period in milliseconds granted to in-flight steps after a
    /// cooperative cancellation signal, before forced abandonment.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

fn default_max_parallelism() -> usize {
    8
}

fn default_step_timeout_secs() -> u64 {
    30
}

fn default_plan_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_backoff_jitter() -> f64 {
    0.2
}

fn default_cancel_grace_ms() -> u64 {
    500
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_parallelism: default_max_parallelism(),
            step_timeout_secs: default_step_timeout_secs(),
            plan_timeout_secs: default_plan_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_factor: default_backoff_factor(),
            backoff_jitter: default_backoff_jitter(),
            cancel_grace_ms: default_cancel_grace_ms(),
        }
    }
}

/// Event-bus buffering tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Ring-buffer capacity per context. Events older than the buffer are
    /// permanently lost; there is no full replay guarantee.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_buffer_size() -> usize {
    256
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
        }
    }
}

/// Aggregated configuration for the whole engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConductorConfig {
    /// Registry and health probing.
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Router scoring and fallback.
    #[serde(default)]
    pub router: RouterConfig,
    /// Coordinator dispatch and retry.
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    /// Event buffering.
    #[serde(default)]
    pub events: EventsConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ConductorConfig::default();
        assert_eq!(cfg.router.confidence_threshold, 0.3);
        assert_eq!(cfg.coordinator.max_parallelism, 8);
        assert_eq!(cfg.coordinator.step_timeout_secs, 30);
        assert_eq!(cfg.coordinator.plan_timeout_secs, 120);
        assert_eq!(cfg.coordinator.max_retries, 2);
        assert_eq!(cfg.coordinator.backoff_base_ms, 500);
        assert_eq!(cfg.events.buffer_size, 256);
        assert_eq!(cfg.registry.failure_threshold, 3);
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let cfg: ConductorConfig =
            serde_json::from_str(r#"{"router": {"confidence_threshold": 0.5}}"#).unwrap();
        assert_eq!(cfg.router.confidence_threshold, 0.5);
        assert_eq!(cfg.router.tag_weight, 0.5);
        assert_eq!(cfg.coordinator.max_retries, 2);
    }

    #[test]
    fn test_removal_threshold_is_double_failure_threshold() {
        let cfg = RegistryConfig::default();
        assert_eq!(cfg.removal_threshold(), 6);
    }
}
