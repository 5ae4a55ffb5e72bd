//! vitalgrid-health: probe registry, execution, history and aggregation.
//!
//! [`HealthEngine`] owns one worker pool and wires every subsystem to it:
//!
//! # Architecture
//!
//! ```text
//! HealthEngine
//!   ├── SharedScheduler (worker pool, lifecycle)
//!   ├── EventBus ───────────────────────────────┐
//!   ├── Registry (probes + aggregators) ────────┤ Registered / Removed / AllCleared
//!   ├── PeriodicScheduler ──tick──┐             │
//!   └── Executor ◄────────────────┘             │
//!         │ probe.check() on the pool           │
//!         │ retry / backoff (ExecutionStrategy) │
//!         │ timing + fault translation          │
//!         ▼                                     │
//!       History (one async mutex) ──────────────┤ Checked / StatusChanged / Failed
//!         └── aggregators over latest results ──┘ Aggregated / AggregatedChanged
//! ```
//!
//! Probe faults never surface as errors: a failing check becomes an
//! UNHEALTHY result, a panicking one a FAILED result, and both are
//! announced with a `Failed` event.

pub mod aggregator;
pub mod engine;
pub mod error;
pub mod executor;
pub mod history;
pub mod registry;
pub mod strategy;

pub use aggregator::{
    Aggregator, AggregatorRef, MostSevereAggregator, Snapshot, WeightedAggregator,
};
pub use engine::HealthEngine;
pub use error::{HealthError, HealthResult};
pub use executor::{Executor, INTERRUPTED_MESSAGE};
pub use history::History;
pub use registry::Registry;
pub use strategy::ExecutionStrategy;
