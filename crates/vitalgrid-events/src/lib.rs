//! vitalgrid-events: delivers [`HealthEvent`]s to listeners.
//!
//! Listeners subscribe per [`EventKind`] (or to the `Any` wildcard) with a
//! [`Filter`]. Each matching listener is notified in its own task on the
//! shared worker pool:
//!
//! ```text
//! Registry / History / Executor
//!   └── EventBus::publish(event)
//!         ├── exact-kind subscriptions  ─┐ filter.matches(event.filter_context())
//!         ├── wildcard subscriptions    ─┘ (each listener at most once)
//!         └── SharedScheduler::execute(listener.handle(&event))
//! ```
//!
//! [`HealthEvent`]: vital_core::HealthEvent
//! [`EventKind`]: vital_core::EventKind
//! [`Filter`]: vital_core::Filter

pub mod bus;

pub use bus::EventBus;
