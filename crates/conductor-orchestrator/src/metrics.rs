use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Latency histogram bucket upper bounds, in milliseconds. The final
/// implicit bucket is +Inf.
pub const LATENCY_BUCKETS_MS: [u64; 10] = [10, 50, 100, 250, 500, 1000, 2500, 5000, 10_000, 30_000];

/// Per-agent request latency histogram.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Histogram {
    /// Cumulative counts per bucket, one extra slot for +Inf.
    pub bucket_counts: Vec<u64>,
    /// Total observations.
    pub count: u64,
    /// Sum of observed values in milliseconds.
    pub sum_ms: u64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            bucket_counts: vec![0; LATENCY_BUCKETS_MS.len() + 1],
            count: 0,
            sum_ms: 0,
        }
    }

    fn observe(&mut self, value_ms: u64) {
        let idx = LATENCY_BUCKETS_MS
            .iter()
            .position(|&bound| value_ms <= bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len());
        self.bucket_counts[idx] += 1;
        self.count += 1;
        self.sum_ms += value_ms;
    }
}

/// Passive counters consumed by an external monitoring/autoscaling
/// collaborator.
///
/// Counter names mirror the conventional a2a surface: requests total,
/// active-tasks gauge, per-agent request-duration histogram, and errors
/// by cause. This core only reports; it never mutates deployment
/// topology. The wire format is the scraper's problem — [`Metrics::snapshot`]
/// hands over a serializable view.
#[derive(Debug, Default)]
pub struct Metrics {
    requests_total: AtomicU64,
    active_tasks: AtomicI64,
    latency: Mutex<HashMap<String, Histogram>>,
    errors: Mutex<HashMap<String, u64>>,
}

impl Metrics {
    /// Create a zeroed emitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one inbound request.
    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    /// A task started executing.
    pub fn task_started(&self) {
        self.active_tasks.fetch_add(1, Ordering::Relaxed);
    }

    /// A task reached a terminal state.
    pub fn task_finished(&self) {
        self.active_tasks.fetch_sub(1, Ordering::Relaxed);
    }

    /// Observe one agent invocation's duration.
    pub fn observe_latency(&self, agent_id: &str, duration_ms: u64) {
        self.latency
            .lock()
            .entry(agent_id.to_string())
            .or_insert_with(Histogram::new)
            .observe(duration_ms);
    }

    /// Count one error by cause code.
    pub fn record_error(&self, cause: &str) {
        *self.errors.lock().entry(cause.to_string()).or_insert(0) += 1;
    }

    /// Read-only view for the external scraper.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            request_duration: self.latency.lock().clone(),
            errors_total: self.errors.lock().clone(),
        }
    }
}

/// Point-in-time view of every counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Total requests handled since start.
    pub requests_total: u64,
    /// Tasks currently executing.
    pub active_tasks: i64,
    /// Per-agent latency histograms.
    pub request_duration: HashMap<String, Histogram>,
    /// Error counts by cause code.
    pub errors_total: HashMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_counter() {
        let m = Metrics::new();
        m.record_request();
        m.record_request();
        assert_eq!(m.snapshot().requests_total, 2);
    }

    #[test]
    fn test_active_tasks_gauge() {
        let m = Metrics::new();
        m.task_started();
        m.task_started();
        m.task_finished();
        assert_eq!(m.snapshot().active_tasks, 1);
    }

    #[test]
    fn test_latency_histogram_buckets() {
        let m = Metrics::new();
        m.observe_latency("calc", 5); // → first bucket (≤10)
        m.observe_latency("calc", 700); // → ≤1000 bucket
        m.observe_latency("calc", 60_000); // → +Inf bucket

        let snap = m.snapshot();
        let h = &snap.request_duration["calc"];
        assert_eq!(h.count, 3);
        assert_eq!(h.sum_ms, 60_705);
        assert_eq!(h.bucket_counts[0], 1);
        assert_eq!(h.bucket_counts[5], 1);
        assert_eq!(h.bucket_counts[LATENCY_BUCKETS_MS.len()], 1);
    }

    #[test]
    fn test_errors_by_cause() {
        let m = Metrics::new();
        m.record_error("step_timeout");
        m.record_error("step_timeout");
        m.record_error("plan_failed");
        let snap = m.snapshot();
        assert_eq!(snap.errors_total["step_timeout"], 2);
        assert_eq!(snap.errors_total["plan_failed"], 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let m = Metrics::new();
        m.record_request();
        m.observe_latency("calc", 42);
        let json = serde_json::to_string(&m.snapshot()).unwrap();
        assert!(json.contains("requests_total"));
        assert!(json.contains("calc"));
    }
}
