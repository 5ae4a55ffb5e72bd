//! vital-core: shared types for the vitalgrid health engine.
//!
//! Everything the subsystems exchange lives here: the probe contract,
//! check results and statuses, filters, events and the listener trait, and
//! the engine configuration.
//!
//! # Data model
//!
//! ```text
//! Probe (ProbeDescriptor: name + tags, async check())
//!   └── check() → CheckResult
//!         ├── status / message / fault / time_to_live / data
//!         └── ExecutionMeta (attached by the executor)
//!
//! HealthEvent ── kind() → EventKind
//!   └── filter_context() → FilterContext ── Filter::matches()
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod probe;
pub mod retry;
pub mod types;

pub use config::{EngineConfig, PeriodicSchedule, ScheduleMode, SchedulerConfig, parse_duration};
pub use error::{CoreError, CoreResult};
pub use event::{EventKind, HealthEvent, HealthListener, ListenerRef};
pub use filter::{Filter, FilterBuilder, FilterContext};
pub use probe::{BoxFuture, FnProbe, Interrupted, Probe, ProbeDescriptor, ProbeRef, probe_fn};
pub use retry::RetryPolicy;
pub use types::{
    CheckResult, CheckResultBuilder, ExecutionMeta, Fault, FaultKind, HealthStatus, SEVERITY_ORDER,
};
