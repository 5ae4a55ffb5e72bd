//! History: bounded per-name result logs, change detection and aggregation.
//!
//! Every recorded probe result goes through one critical section that
//! appends it, announces it, detects a change against the previous entry,
//! and re-runs every aggregator over the latest result of each registered
//! probe. Aggregated results are kept in the same store under the
//! aggregator's name.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error};

use vital_core::error::panic_message;
use vital_core::{CheckResult, CoreError, CoreResult, Filter, FilterContext, HealthEvent, ProbeRef};
use vitalgrid_events::EventBus;

use crate::aggregator::Snapshot;
use crate::registry::Registry;

/// Bounded result history. Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct History {
    capacity: usize,
    entries: Arc<Mutex<HashMap<String, VecDeque<CheckResult>>>>,
    registry: Registry,
    bus: EventBus,
}

impl History {
    /// `capacity` results are kept per name; it must be at least 1.
    pub fn new(capacity: usize, registry: Registry, bus: EventBus) -> CoreResult<Self> {
        if capacity == 0 {
            return Err(CoreError::InvalidArgument(
                "history capacity must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            capacity,
            entries: Arc::new(Mutex::new(HashMap::new())),
            registry,
            bus,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append `result` for `probe`, publish Checked and StatusChanged, then
    /// recompute and record every aggregator.
    pub(crate) async fn record(&self, probe: &ProbeRef, result: CheckResult) {
        let mut entries = self.entries.lock().await;

        let name = probe.name().to_string();
        let previous = push_bounded(&mut entries, &name, result.clone(), self.capacity);
        debug!(%name, status = %result.status().label(), "result recorded");

        let tags = probe.tags();
        self.bus
            .publish(HealthEvent::Checked {
                name: name.clone(),
                tags: tags.clone(),
                probe: Arc::clone(probe),
                result: result.clone(),
            })
            .await;

        if previous.as_ref() != Some(&result) {
            debug!(
                %name,
                previous = previous.as_ref().map(|r| r.status().label()),
                current = %result.status().label(),
                "status changed"
            );
            self.bus
                .publish(HealthEvent::StatusChanged {
                    name,
                    tags,
                    probe: Arc::clone(probe),
                    previous,
                    current: result,
                })
                .await;
        }

        let snapshot = self.snapshot(&entries).await;
        for aggregator in self.registry.all_aggregators().await {
            let aggregator_name = aggregator.name().to_string();
            let outcome =
                std::panic::catch_unwind(AssertUnwindSafe(|| aggregator.aggregate(&snapshot)));
            let aggregated = match outcome {
                Ok(aggregated) => aggregated,
                Err(payload) => {
                    error!(
                        aggregator = %aggregator_name,
                        panic = %panic_message(payload.as_ref()),
                        "aggregator panicked"
                    );
                    continue;
                }
            };

            let previous =
                push_bounded(&mut entries, &aggregator_name, aggregated.clone(), self.capacity);
            self.bus
                .publish(HealthEvent::Aggregated {
                    aggregator: aggregator_name.clone(),
                    result: aggregated.clone(),
                })
                .await;

            if previous.as_ref() != Some(&aggregated) {
                debug!(
                    aggregator = %aggregator_name,
                    status = %aggregated.status().label(),
                    "aggregated status changed"
                );
                self.bus
                    .publish(HealthEvent::AggregatedChanged {
                        aggregator: aggregator_name,
                        previous,
                        current: aggregated,
                    })
                    .await;
            }
        }
    }

    /// Latest entry of every registered probe that has one.
    async fn snapshot(&self, entries: &HashMap<String, VecDeque<CheckResult>>) -> Snapshot {
        let mut snapshot = Snapshot::new();
        for probe in self.registry.all().await {
            if let Some(latest) = entries.get(probe.name()).and_then(|q| q.back()) {
                snapshot.insert(Arc::clone(&probe), latest.clone());
            }
        }
        snapshot
    }

    /// Results recorded under `name`, oldest first.
    pub async fn history(&self, name: &str) -> Vec<CheckResult> {
        self.entries
            .lock()
            .await
            .get(name)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Most recent result recorded under `name`.
    pub async fn latest(&self, name: &str) -> Option<CheckResult> {
        self.entries
            .lock()
            .await
            .get(name)
            .and_then(|q| q.back().cloned())
    }

    /// Every stored result (probes and aggregators) that passes `filter`,
    /// grouped by name in name order, oldest first within a name. Entries
    /// that do not belong to a registered probe are seen without a probe
    /// or tags.
    pub async fn filter_history(&self, filter: &Filter) -> Vec<CheckResult> {
        let entries = self.entries.lock().await;
        let mut names: Vec<&String> = entries.keys().collect();
        names.sort();

        let mut matched = Vec::new();
        for name in names {
            let probe = self.registry.get(name).await;
            let tags = probe.as_ref().map(|p| p.tags()).unwrap_or_default();
            for result in entries.get(name).into_iter().flatten() {
                let context =
                    FilterContext::new(Some(name.as_str()), probe.as_ref(), Some(result), &tags);
                if filter.matches(&context) {
                    matched.push(result.clone());
                }
            }
        }
        matched
    }

    /// Names with at least one stored result.
    pub async fn names(&self) -> BTreeSet<String> {
        self.entries.lock().await.keys().cloned().collect()
    }

    pub async fn clear_history(&self) {
        self.entries.lock().await.clear();
        debug!("history cleared");
    }
}

/// Append to the log for `name`, evicting the oldest entries at capacity.
/// Returns the entry that was latest before the append.
fn push_bounded(
    entries: &mut HashMap<String, VecDeque<CheckResult>>,
    name: &str,
    result: CheckResult,
    capacity: usize,
) -> Option<CheckResult> {
    let queue = entries
        .entry(name.to_string())
        .or_insert_with(|| VecDeque::with_capacity(capacity));
    let previous = queue.back().cloned();
    while queue.len() >= capacity {
        queue.pop_front();
    }
    queue.push_back(result);
    previous
}
