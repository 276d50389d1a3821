use crate::descriptor::{AgentDescriptor, AgentManifest, Health};
use crate::probe::DiscoveryClient;
use conductor_core::{ConductorError, ConductorResult, RegistryConfig, Tag};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-agent record plus the health bookkeeping that drives transitions.
struct AgentEntry {
    descriptor: AgentDescriptor,
    consecutive_probe_failures: u32,
}

/// Shared, read-mostly directory of known agents.
///
/// The map lock is held only for insert/remove and entry lookup; all
/// mutation (health, load, success rate) happens under the per-entry
/// mutex, so probe churn for one agent never blocks lookups for others.
/// Readers receive cloned descriptor snapshots.
pub struct Registry {
    agents: RwLock<HashMap<String, Arc<Mutex<AgentEntry>>>>,
    config: RegistryConfig,
}

impl Registry {
    /// Create an empty registry.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Fetch and validate an agent's manifest, then register it.
    pub async fn discover(
        &self,
        client: &dyn DiscoveryClient,
        endpoint: &str,
    ) -> ConductorResult<AgentDescriptor> {
        let manifest = client
            .fetch_manifest(endpoint)
            .await
            .map_err(|e| ConductorError::Discovery(format!("{endpoint} unreachable: {e}")))?;
        manifest
            .validate()
            .map_err(|reason| ConductorError::Discovery(format!("malformed manifest: {reason}")))?;

        let descriptor = AgentDescriptor::from_manifest(endpoint, &manifest);
        self.register(descriptor.clone());
        Ok(descriptor)
    }

    /// Register (or replace) a descriptor.
    pub fn register(&self, descriptor: AgentDescriptor) {
        info!(agent = %descriptor.id, endpoint = %descriptor.endpoint, "registered agent");
        let entry = Arc::new(Mutex::new(AgentEntry {
            descriptor: descriptor.clone(),
            consecutive_probe_failures: 0,
        }));
        self.agents.write().insert(descriptor.id, entry);
    }

    /// Remove a descriptor. Returns `true` if it existed.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.agents.write().remove(id).is_some();
        if removed {
            info!(agent = %id, "removed agent");
        }
        removed
    }

    /// Snapshot of a single descriptor.
    pub fn get(&self, id: &str) -> Option<AgentDescriptor> {
        let entry = self.agents.read().get(id).cloned()?;
        let guard = entry.lock();
        Some(guard.descriptor.clone())
    }

    /// Snapshots of every registered descriptor, healthy or not.
    pub fn snapshot(&self) -> Vec<AgentDescriptor> {
        let entries: Vec<_> = self.agents.read().values().cloned().collect();
        let mut out: Vec<_> = entries
            .iter()
            .map(|e| e.lock().descriptor.clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Healthy descriptors matching ANY of the requested tags.
    /// An empty tag list matches all healthy descriptors. No scoring here.
    pub fn candidates(&self, tags: &[Tag]) -> Vec<AgentDescriptor> {
        self.snapshot()
            .into_iter()
            .filter(|d| d.health == Health::Healthy)
            .filter(|d| tags.is_empty() || d.matches_any(tags))
            .collect()
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }

    /// Record the result of a health probe.
    ///
    /// One success restores `Healthy` and clears the failure streak.
    /// `failure_threshold` consecutive failures mark the descriptor
    /// unhealthy; twice that many remove it entirely.
    pub fn record_probe(&self, id: &str, ok: bool) {
        let Some(entry) = self.agents.read().get(id).cloned() else {
            return;
        };

        let remove = {
            let mut guard = entry.lock();
            if ok {
                if guard.descriptor.health == Health::Unhealthy {
                    info!(agent = %id, "agent recovered after successful probe");
                }
                guard.consecutive_probe_failures = 0;
                guard.descriptor.health = Health::Healthy;
                false
            } else {
                guard.consecutive_probe_failures += 1;
                let failures = guard.consecutive_probe_failures;
                if failures == self.config.failure_threshold {
                    warn!(agent = %id, failures, "marking agent unhealthy");
                    guard.descriptor.health = Health::Unhealthy;
                }
                failures >= self.config.removal_threshold()
            }
        };

        if remove {
            warn!(agent = %id, "removing agent after repeated probe failures");
            self.remove(id);
        }
    }

    /// Refresh a descriptor's declared skills and description from a newer
    /// manifest, keeping health and call history intact.
    pub fn refresh_manifest(&self, id: &str, manifest: &AgentManifest) {
        if let Some(entry) = self.agents.read().get(id).cloned() {
            let mut guard = entry.lock();
            guard.descriptor.skills = manifest.skills.iter().map(Tag::new).collect();
            guard.descriptor.description = manifest.description.clone();
            debug!(agent = %id, skills = manifest.skills.len(), "refreshed manifest");
        }
    }

    /// Fold one invocation outcome into the rolling success rate.
    pub fn record_outcome(&self, id: &str, success: bool) {
        if let Some(entry) = self.agents.read().get(id).cloned() {
            let mut guard = entry.lock();
            let outcome = if success { 1.0 } else { 0.0 };
            // Exponentially weighted average: recent calls dominate.
            guard.descriptor.success_rate =
                guard.descriptor.success_rate * 0.9 + outcome * 0.1;
            debug!(
                agent = %id,
                success,
                rate = guard.descriptor.success_rate,
                "recorded invocation outcome"
            );
        }
    }

    /// Increment the in-flight load counter for an agent.
    pub fn begin_call(&self, id: &str) {
        if let Some(entry) = self.agents.read().get(id).cloned() {
            entry.lock().descriptor.current_load += 1;
        }
    }

    /// Decrement the in-flight load counter for an agent.
    pub fn end_call(&self, id: &str) {
        if let Some(entry) = self.agents.read().get(id).cloned() {
            let mut guard = entry.lock();
            guard.descriptor.current_load = guard.descriptor.current_load.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::AgentManifest;

    fn descriptor(id: &str, skills: &[&str]) -> AgentDescriptor {
        AgentDescriptor::from_manifest(
            format!("http://{id}.local"),
            &AgentManifest {
                name: id.to_string(),
                description: String::new(),
                skills: skills.iter().map(|s| (*s).to_string()).collect(),
            },
        )
    }

    fn registry() -> Registry {
        Registry::new(RegistryConfig::default())
    }

    #[test]
    fn test_register_and_get() {
        let reg = registry();
        reg.register(descriptor("calc", &["math"]));
        assert_eq!(reg.len(), 1);
        let d = reg.get("calc").unwrap();
        assert_eq!(d.health, Health::Healthy);
    }

    #[test]
    fn test_candidates_filter_by_tag() {
        let reg = registry();
        reg.register(descriptor("calc", &["math"]));
        reg.register(descriptor("weather", &["weather", "forecast"]));

        let c = reg.candidates(&[Tag::new("math")]);
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].id, "calc");

        // Any-tag semantics.
        let c = reg.candidates(&[Tag::new("math"), Tag::new("forecast")]);
        assert_eq!(c.len(), 2);

        // Empty request matches all healthy agents.
        assert_eq!(reg.candidates(&[]).len(), 2);
    }

    #[test]
    fn test_unhealthy_excluded_from_candidates() {
        let reg = registry();
        reg.register(descriptor("calc", &["math"]));
        for _ in 0..3 {
            reg.record_probe("calc", false);
        }
        assert_eq!(reg.get("calc").unwrap().health, Health::Unhealthy);
        assert!(reg.candidates(&[Tag::new("math")]).is_empty());
        // Still registered, just excluded.
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_one_success_recovers_health() {
        let reg = registry();
        reg.register(descriptor("calc", &["math"]));
        for _ in 0..3 {
            reg.record_probe("calc", false);
        }
        reg.record_probe("calc", true);
        assert_eq!(reg.get("calc").unwrap().health, Health::Healthy);
        assert_eq!(reg.candidates(&[Tag::new("math")]).len(), 1);
    }

    #[test]
    fn test_removal_after_sustained_failures() {
        let reg = registry();
        reg.register(descriptor("calc", &["math"]));
        for _ in 0..6 {
            reg.record_probe("calc", false);
        }
        assert!(reg.get("calc").is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_rolling_success_rate() {
        let reg = registry();
        reg.register(descriptor("calc", &["math"]));
        reg.record_outcome("calc", false);
        let rate = reg.get("calc").unwrap().success_rate;
        assert!((rate - 0.9).abs() < 1e-9);
        reg.record_outcome("calc", true);
        let rate = reg.get("calc").unwrap().success_rate;
        assert!(rate > 0.9 && rate < 1.0);
    }

    #[test]
    fn test_load_counters() {
        let reg = registry();
        reg.register(descriptor("calc", &["math"]));
        reg.begin_call("calc");
        reg.begin_call("calc");
        assert_eq!(reg.get("calc").unwrap().current_load, 2);
        reg.end_call("calc");
        assert_eq!(reg.get("calc").unwrap().current_load, 1);
        // Never underflows.
        reg.end_call("calc");
        reg.end_call("calc");
        assert_eq!(reg.get("calc").unwrap().current_load, 0);
    }

    #[test]
    fn test_refresh_manifest_updates_skills_only() {
        let reg = registry();
        reg.register(descriptor("calc", &["math"]));
        reg.record_outcome("calc", false);
        let before = reg.get("calc").unwrap();

        reg.refresh_manifest(
            "calc",
            &AgentManifest {
                name: "calc".to_string(),
                description: "now with algebra".to_string(),
                skills: vec!["math".to_string(), "algebra".to_string()],
            },
        );
        let after = reg.get("calc").unwrap();
        assert!(after.skills.contains(&Tag::new("algebra")));
        assert_eq!(after.description, "now with algebra");
        // History survives the refresh.
        assert_eq!(after.success_rate, before.success_rate);
    }

    #[test]
    fn test_snapshot_sorted_by_id() {
        let reg = registry();
        reg.register(descriptor("zeta", &["a"]));
        reg.register(descriptor("alpha", &["a"]));
        let snap = reg.snapshot();
        assert_eq!(snap[0].id, "alpha");
        assert_eq!(snap[1].id, "zeta");
    }
}
