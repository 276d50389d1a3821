use conductor_core::Tag;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Health of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    /// Responding to probes; eligible for routing.
    Healthy,
    /// Too many consecutive failed probes; excluded from routing.
    Unhealthy,
}

/// Registry record for a discoverable remote agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Stable agent id (unique within the registry).
    pub id: String,
    /// Address the agent is invoked and probed at.
    pub endpoint: String,
    /// Declared capability tags.
    pub skills: BTreeSet<Tag>,
    /// Free-text description from the agent's manifest.
    pub description: String,
    /// Current health; only healthy descriptors are routing candidates.
    pub health: Health,
    /// Rolling success rate of invocations, in [0,1].
    pub success_rate: f64,
    /// Number of in-flight invocations right now.
    pub current_load: u32,
}

impl AgentDescriptor {
    /// Build a healthy descriptor from a fetched manifest.
    pub fn from_manifest(endpoint: impl Into<String>, manifest: &AgentManifest) -> Self {
        Self {
            id: manifest.name.clone(),
            endpoint: endpoint.into(),
            skills: manifest.skills.iter().map(Tag::new).collect(),
            description: manifest.description.clone(),
            health: Health::Healthy,
            // Optimistic prior; converges with observed outcomes.
            success_rate: 1.0,
            current_load: 0,
        }
    }

    /// Whether this agent declares any of the requested tags.
    pub fn matches_any(&self, tags: &[Tag]) -> bool {
        tags.iter().any(|t| self.skills.contains(t))
    }

    /// Fraction of the requested tags this agent declares, in [0,1].
    /// An empty request matches fully.
    pub fn tag_overlap(&self, tags: &[Tag]) -> f64 {
        if tags.is_empty() {
            return 1.0;
        }
        let hits = tags.iter().filter(|t| self.skills.contains(t)).count();
        hits as f64 / tags.len() as f64
    }
}

/// Skill manifest returned by an agent's discovery endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentManifest {
    /// Agent name, used as the registry id.
    pub name: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Declared skill tags.
    pub skills: Vec<String>,
}

impl AgentManifest {
    /// Validate the manifest shape. A manifest with no name or no skills
    /// is considered malformed.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("manifest has empty name".to_string());
        }
        if self.skills.is_empty() {
            return Err(format!("manifest for '{}' declares no skills", self.name));
        }
        Ok(())
    }
}

/// Result of a liveness probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    /// Whether the agent answered within the probe deadline.
    pub alive: bool,
    /// Refreshed manifest, when the agent includes one in its reply.
    pub manifest: Option<AgentManifest>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(name: &str, skills: &[&str]) -> AgentManifest {
        AgentManifest {
            name: name.to_string(),
            description: String::new(),
            skills: skills.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    #[test]
    fn test_descriptor_from_manifest() {
        let d = AgentDescriptor::from_manifest(
            "http://localhost:8002",
            &manifest("calculator", &["Math", "calculation"]),
        );
        assert_eq!(d.id, "calculator");
        assert_eq!(d.health, Health::Healthy);
        assert!(d.skills.contains(&Tag::new("math")));
        assert_eq!(d.success_rate, 1.0);
    }

    #[test]
    fn test_tag_overlap() {
        let d = AgentDescriptor::from_manifest(
            "http://x",
            &manifest("weather", &["weather", "forecast"]),
        );
        assert_eq!(d.tag_overlap(&[Tag::new("weather")]), 1.0);
        assert_eq!(
            d.tag_overlap(&[Tag::new("weather"), Tag::new("math")]),
            0.5
        );
        assert_eq!(d.tag_overlap(&[]), 1.0);
        assert!(!d.matches_any(&[Tag::new("math")]));
    }

    #[test]
    fn test_manifest_validation() {
        assert!(manifest("ok", &["a"]).validate().is_ok());
        assert!(manifest("", &["a"]).validate().is_err());
        assert!(manifest("no-skills", &[]).validate().is_err());
    }
}
