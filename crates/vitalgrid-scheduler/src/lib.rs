//! vitalgrid-scheduler: the worker pool every engine subsystem runs on.
//!
//! One [`SharedScheduler`] per engine owns a dedicated multi-thread tokio
//! runtime. Probe runs, listener notifications and periodic triggers are all
//! submitted to it; no other component spawns threads.
//!
//! # Architecture
//!
//! ```text
//! SharedScheduler (lifecycle: INITIALIZED → RUNNING → SHUTTING_DOWN → SHUTDOWN)
//!   ├── execute / submit / schedule (one-shot work)
//!   ├── schedule_with_fixed_delay / schedule_at_fixed_rate → TaskHandle
//!   └── pool-wide CancelSignal (fires on shutdown)
//!
//! PeriodicScheduler
//!   └── name → TaskHandle, each tick calls TriggerFn(name, CancelSignal)
//! ```

pub mod error;
pub mod periodic;
pub mod pool;

pub use error::{SchedulerError, SchedulerResult};
pub use periodic::{PeriodicScheduler, TriggerFn};
pub use pool::{CancelSignal, SchedulerState, SharedScheduler, TaskHandle};
