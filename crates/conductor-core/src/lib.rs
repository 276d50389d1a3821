//! Core types and error definitions for the Conductor orchestration engine.
//!
//! This crate provides the foundational types shared across all Conductor
//! crates: the error taxonomy, the query/task/artifact data model, the
//! per-context event types, and the configuration structs with their
//! serde-backed defaults.
//!
//! # Main types
//!
//! - [`ConductorError`] — Unified error enum for all Conductor subsystems.
//! - [`ConductorResult`] — Convenience alias for `Result<T, ConductorError>`.
//! - [`Query`] — A single user request entering the router.
//! - [`Task`] — The tracked unit of work executing a plan for one query.
//! - [`Artifact`] — A named output fragment produced by a completed step.
//! - [`Event`] — An ordered, per-context progress event.
//! - [`ConductorConfig`] — Aggregated tunables for every subsystem.

/// Configuration structs and their defaults.
pub mod config;
/// Error taxonomy and result alias.
pub mod error;
/// Per-context progress events.
pub mod event;
/// Query, task lifecycle, and artifact types.
pub mod task;

pub use config::{
    ConductorConfig, CoordinatorConfig, EventsConfig, RegistryConfig, RouterConfig,
};
pub use error::{ConductorError, ConductorResult, ErrorInfo};
pub use event::{Event, EventType};
pub use task::{Artifact, Query, Tag, Task, TaskState};
