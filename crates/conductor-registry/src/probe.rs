use crate::descriptor::{AgentManifest, ProbeReport};
use crate::registry::Registry;
use async_trait::async_trait;
use conductor_core::{ConductorResult, RegistryConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Port for the outbound discovery/liveness surface.
///
/// Production implementations speak whatever transport the deployment
/// uses; the orchestration core only needs these two calls. Tests inject
/// deterministic fakes.
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// Fetch the skill manifest from an agent endpoint.
    async fn fetch_manifest(&self, endpoint: &str) -> ConductorResult<AgentManifest>;

    /// Lightweight liveness check. May carry a refreshed manifest.
    async fn probe(&self, endpoint: &str) -> ConductorResult<ProbeReport>;
}

/// Periodic health-probe loop.
///
/// Every interval, probes each registered agent with a per-probe deadline
/// and feeds the result into [`Registry::record_probe`]. Probe errors are
/// recovered locally (the descriptor is excluded from routing) and never
/// surfaced to callers.
pub struct HealthProber {
    registry: Arc<Registry>,
    client: Arc<dyn DiscoveryClient>,
    config: RegistryConfig,
}

impl HealthProber {
    /// Build a prober over a registry and discovery client.
    pub fn new(
        registry: Arc<Registry>,
        client: Arc<dyn DiscoveryClient>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            registry,
            client,
            config,
        }
    }

    /// Run probe rounds until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.probe_interval_secs));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("health prober shutting down");
                    return;
                }
                _ = interval.tick() => {
                    self.probe_round().await;
                }
            }
        }
    }

    /// Probe every registered agent once.
    pub async fn probe_round(&self) {
        let deadline = Duration::from_secs(self.config.probe_timeout_secs);
        for descriptor in self.registry.snapshot() {
            let ok = match tokio::time::timeout(deadline, self.client.probe(&descriptor.endpoint))
                .await
            {
                Ok(Ok(report)) => {
                    // Probes may carry a refreshed skill manifest.
                    if let Some(manifest) = &report.manifest {
                        if manifest.validate().is_ok() {
                            self.registry.refresh_manifest(&descriptor.id, manifest);
                        }
                    }
                    report.alive
                }
                Ok(Err(e)) => {
                    warn!(agent = %descriptor.id, error = %e, "probe failed");
                    false
                }
                Err(_) => {
                    warn!(agent = %descriptor.id, "probe timed out");
                    false
                }
            };
            self.registry.record_probe(&descriptor.id, ok);
        }
    }
}
