//! Capability registry for remote specialist agents.
//!
//! Tracks known agents, the skills they declare, and their health. Reads
//! are cheap cloned snapshots; health mutation is serialized per
//! descriptor so churn on one agent never blocks lookups for others.
//!
//! # Main types
//!
//! - [`Registry`] — The shared, read-mostly agent directory.
//! - [`AgentDescriptor`] — One registered agent with skills and health.
//! - [`DiscoveryClient`] — Port for manifest fetches and liveness probes.
//! - [`HealthProber`] — Periodic probe loop driving health transitions.

/// Agent descriptor, manifest, and health types.
pub mod descriptor;
/// Periodic health probing.
pub mod probe;
/// The registry proper.
pub mod registry;

pub use descriptor::{AgentDescriptor, AgentManifest, Health, ProbeReport};
pub use probe::{DiscoveryClient, HealthProber};
pub use registry::Registry;
