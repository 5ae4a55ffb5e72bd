//! Health events and the listener contract.
//!
//! Every state change in the engine is published as a [`HealthEvent`].
//! Listeners implement [`HealthListener`]; the default `handle` dispatches to
//! one no-op method per event kind, so a listener overrides only what it
//! cares about.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::filter::FilterContext;
use crate::probe::ProbeRef;
use crate::types::{CheckResult, Fault};

static NO_TAGS: BTreeSet<String> = BTreeSet::new();

/// Shared handle to a registered listener.
pub type ListenerRef = Arc<dyn HealthListener>;

/// Closed set of engine events.
#[derive(Debug, Clone)]
pub enum HealthEvent {
    /// A probe was added to the registry.
    Registered {
        name: String,
        tags: BTreeSet<String>,
        probe: ProbeRef,
    },
    /// A probe was removed from the registry.
    Removed {
        name: String,
        tags: BTreeSet<String>,
        probe: ProbeRef,
    },
    /// A probe run completed and was recorded.
    Checked {
        name: String,
        tags: BTreeSet<String>,
        probe: ProbeRef,
        result: CheckResult,
    },
    /// A probe run failed, panicked or was interrupted.
    Failed {
        name: String,
        tags: BTreeSet<String>,
        probe: ProbeRef,
        message: Option<String>,
        fault: Fault,
    },
    /// The latest result of a probe differs from the one before it.
    StatusChanged {
        name: String,
        tags: BTreeSet<String>,
        probe: ProbeRef,
        previous: Option<CheckResult>,
        current: CheckResult,
    },
    /// An aggregator produced a result.
    Aggregated {
        aggregator: String,
        result: CheckResult,
    },
    /// The aggregated result differs from the previous one.
    AggregatedChanged {
        aggregator: String,
        previous: Option<CheckResult>,
        current: CheckResult,
    },
    /// The registry was cleared.
    AllCleared,
}

impl HealthEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            HealthEvent::Registered { .. } => EventKind::Registered,
            HealthEvent::Removed { .. } => EventKind::Removed,
            HealthEvent::Checked { .. } => EventKind::Checked,
            HealthEvent::Failed { .. } => EventKind::Failed,
            HealthEvent::StatusChanged { .. } => EventKind::StatusChanged,
            HealthEvent::Aggregated { .. } => EventKind::Aggregated,
            HealthEvent::AggregatedChanged { .. } => EventKind::AggregatedChanged,
            HealthEvent::AllCleared => EventKind::AllCleared,
        }
    }

    /// Probe or aggregator name the event is about.
    pub fn name(&self) -> Option<&str> {
        match self {
            HealthEvent::Registered { name, .. }
            | HealthEvent::Removed { name, .. }
            | HealthEvent::Checked { name, .. }
            | HealthEvent::Failed { name, .. }
            | HealthEvent::StatusChanged { name, .. } => Some(name),
            HealthEvent::Aggregated { aggregator, .. }
            | HealthEvent::AggregatedChanged { aggregator, .. } => Some(aggregator),
            HealthEvent::AllCleared => None,
        }
    }

    pub fn probe(&self) -> Option<&ProbeRef> {
        match self {
            HealthEvent::Registered { probe, .. }
            | HealthEvent::Removed { probe, .. }
            | HealthEvent::Checked { probe, .. }
            | HealthEvent::Failed { probe, .. }
            | HealthEvent::StatusChanged { probe, .. } => Some(probe),
            _ => None,
        }
    }

    /// The result a filter sees. Failed events expose none; the fault is
    /// carried separately.
    pub fn result(&self) -> Option<&CheckResult> {
        match self {
            HealthEvent::Checked { result, .. } | HealthEvent::Aggregated { result, .. } => {
                Some(result)
            }
            HealthEvent::StatusChanged { current, .. }
            | HealthEvent::AggregatedChanged { current, .. } => Some(current),
            _ => None,
        }
    }

    /// Tags of the probe; aggregator and engine-wide events have none.
    pub fn tags(&self) -> &BTreeSet<String> {
        match self {
            HealthEvent::Registered { tags, .. }
            | HealthEvent::Removed { tags, .. }
            | HealthEvent::Checked { tags, .. }
            | HealthEvent::Failed { tags, .. }
            | HealthEvent::StatusChanged { tags, .. } => tags,
            _ => &NO_TAGS,
        }
    }

    /// Build the context listener filters are evaluated against.
    pub fn filter_context(&self) -> FilterContext<'_> {
        FilterContext::new(self.name(), self.probe(), self.result(), self.tags())
    }
}

/// Event discriminant used to key listener subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Registered,
    Removed,
    Checked,
    Failed,
    StatusChanged,
    Aggregated,
    AggregatedChanged,
    AllCleared,
    /// Wildcard subscription. No event has this kind.
    Any,
}

impl EventKind {
    /// Every concrete kind, wildcard excluded.
    pub const CONCRETE: [EventKind; 8] = [
        EventKind::Registered,
        EventKind::Removed,
        EventKind::Checked,
        EventKind::Failed,
        EventKind::StatusChanged,
        EventKind::Aggregated,
        EventKind::AggregatedChanged,
        EventKind::AllCleared,
    ];
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Registered => "registered",
            EventKind::Removed => "removed",
            EventKind::Checked => "checked",
            EventKind::Failed => "failed",
            EventKind::StatusChanged => "status_changed",
            EventKind::Aggregated => "aggregated",
            EventKind::AggregatedChanged => "aggregated_changed",
            EventKind::AllCleared => "all_cleared",
            EventKind::Any => "any",
        };
        f.write_str(s)
    }
}

/// Receives engine events.
///
/// Notifications run on the engine's worker pool; implementations must not
/// block for long. Ordering across events is not guaranteed.
#[allow(unused_variables)]
pub trait HealthListener: Send + Sync + 'static {
    /// Entry point called by the event bus.
    fn handle(&self, event: &HealthEvent) {
        match event {
            HealthEvent::Registered { name, tags, probe } => self.on_registered(name, tags, probe),
            HealthEvent::Removed { name, tags, probe } => self.on_removed(name, tags, probe),
            HealthEvent::Checked {
                name,
                tags,
                probe,
                result,
            } => self.on_checked(name, tags, probe, result),
            HealthEvent::Failed {
                name,
                tags,
                probe,
                message,
                fault,
            } => self.on_failed(name, tags, probe, message.as_deref(), fault),
            HealthEvent::StatusChanged {
                name,
                tags,
                probe,
                previous,
                current,
            } => self.on_status_changed(name, tags, probe, previous.as_ref(), current),
            HealthEvent::Aggregated { aggregator, result } => {
                self.on_aggregated(aggregator, result)
            }
            HealthEvent::AggregatedChanged {
                aggregator,
                previous,
                current,
            } => self.on_aggregation_changed(aggregator, previous.as_ref(), current),
            HealthEvent::AllCleared => self.on_all_cleared(),
        }
    }

    /// Name used in logs.
    fn label(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn on_checked(
        &self,
        name: &str,
        tags: &BTreeSet<String>,
        probe: &ProbeRef,
        result: &CheckResult,
    ) {
    }

    fn on_failed(
        &self,
        name: &str,
        tags: &BTreeSet<String>,
        probe: &ProbeRef,
        message: Option<&str>,
        fault: &Fault,
    ) {
    }

    fn on_status_changed(
        &self,
        name: &str,
        tags: &BTreeSet<String>,
        probe: &ProbeRef,
        previous: Option<&CheckResult>,
        current: &CheckResult,
    ) {
    }

    fn on_registered(&self, name: &str, tags: &BTreeSet<String>, probe: &ProbeRef) {}

    fn on_removed(&self, name: &str, tags: &BTreeSet<String>, probe: &ProbeRef) {}

    fn on_aggregated(&self, aggregator: &str, result: &CheckResult) {}

    fn on_aggregation_changed(
        &self,
        aggregator: &str,
        previous: Option<&CheckResult>,
        current: &CheckResult,
    ) {
    }

    fn on_all_cleared(&self) {}
}
