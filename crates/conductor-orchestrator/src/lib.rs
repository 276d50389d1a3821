//! Task orchestration: coordinator state machine, event stream, metrics.
//!
//! The [`Orchestrator`] is the engine's front door: it routes a query,
//! plans its execution, and drives the plan through the [`Coordinator`],
//! which owns the task lifecycle. Progress streams out through the
//! [`EventBus`] as ordered per-context events, and the [`Metrics`]
//! registry counts requests, active tasks, latencies, and errors. Calls
//! to remote agents go through the [`AgentClient`] port so transports
//! and tests plug in behind the same seam.
//!
//! # Main types
//!
//! - [`Orchestrator`] — Route, plan, execute; every outcome is a task.
//! - [`Coordinator`] — Bounded-parallelism step dispatch with retries,
//!   deadlines, cancellation, and partial-failure degradation.
//! - [`EventBus`] / [`Subscription`] — Ordered per-context progress
//!   events with replay from a sequence number.
//! - [`Metrics`] — Counters and latency histograms, snapshot on demand.

/// The agent invocation port.
pub mod client;
/// The task-lifecycle state machine.
pub mod coordinator;
/// Ordered per-context event delivery.
pub mod events;
/// Request, task, latency, and error accounting.
pub mod metrics;
/// The route-plan-execute facade.
pub mod orchestrator;

pub use client::{AgentClient, AgentReply, StepCall};
pub use coordinator::{retry_delay, Coordinator};
pub use events::{EventBus, Subscription};
pub use metrics::{Metrics, MetricsSnapshot};
pub use orchestrator::Orchestrator;
