//! Aggregators: fold the latest result of every probe into one result.

use std::collections::BTreeMap;
use std::sync::Arc;

use vital_core::error::validate_name;
use vital_core::{CheckResult, CoreResult, HealthStatus, ProbeRef};

/// Shared handle to a registered aggregator.
pub type AggregatorRef = Arc<dyn Aggregator>;

/// Latest result per registered probe, keyed by probe name. Probes that have
/// never run are absent.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: BTreeMap<String, (ProbeRef, CheckResult)>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, probe: ProbeRef, result: CheckResult) {
        self.entries
            .insert(probe.name().to_string(), (probe, result));
    }

    pub fn get(&self, name: &str) -> Option<&CheckResult> {
        self.entries.get(name).map(|(_, result)| result)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&ProbeRef, &CheckResult)> {
        self.entries.values().map(|(probe, result)| (probe, result))
    }

    pub fn results(&self) -> impl Iterator<Item = &CheckResult> {
        self.entries.values().map(|(_, result)| result)
    }
}

/// A named, pure function from a [`Snapshot`] to a result.
pub trait Aggregator: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn aggregate(&self, snapshot: &Snapshot) -> CheckResult;
}

// ── Most severe ───────────────────────────────────────────────────

/// Reports the most severe ranked status in the snapshot.
#[derive(Debug, Clone)]
pub struct MostSevereAggregator {
    name: String,
}

impl MostSevereAggregator {
    pub const DEFAULT_NAME: &'static str = "most_severe";

    pub fn new(name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self { name })
    }
}

impl Default for MostSevereAggregator {
    fn default() -> Self {
        Self {
            name: Self::DEFAULT_NAME.to_string(),
        }
    }
}

impl Aggregator for MostSevereAggregator {
    fn name(&self) -> &str {
        &self.name
    }

    fn aggregate(&self, snapshot: &Snapshot) -> CheckResult {
        let worst = snapshot
            .results()
            .filter_map(|r| r.status().severity_rank().map(|rank| (rank, r.status())))
            .min_by_key(|(rank, _)| *rank)
            .map(|(_, status)| status)
            .unwrap_or(HealthStatus::Unknown);

        CheckResult::builder()
            .status(worst)
            .message("Aggregated health status")
            .build()
    }
}

// ── Weighted scoring ──────────────────────────────────────────────

/// Averages per-status weights and maps the score back onto a status.
#[derive(Debug, Clone)]
pub struct WeightedAggregator {
    name: String,
}

impl WeightedAggregator {
    pub const DEFAULT_NAME: &'static str = "weighted_scoring";

    pub fn new(name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self { name })
    }

    /// Weight of a ranked status; `None` for statuses that are not scored.
    pub fn weight(status: HealthStatus) -> Option<u32> {
        match status {
            HealthStatus::Critical => Some(100),
            HealthStatus::Unhealthy => Some(75),
            HealthStatus::Degraded => Some(50),
            HealthStatus::Warning => Some(25),
            HealthStatus::Unknown => Some(10),
            HealthStatus::Healthy => Some(0),
            _ => None,
        }
    }

    fn status_for_score(average: u32) -> HealthStatus {
        match average {
            75.. => HealthStatus::Critical,
            50.. => HealthStatus::Unhealthy,
            25.. => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl Default for WeightedAggregator {
    fn default() -> Self {
        Self {
            name: Self::DEFAULT_NAME.to_string(),
        }
    }
}

impl Aggregator for WeightedAggregator {
    fn name(&self) -> &str {
        &self.name
    }

    fn aggregate(&self, snapshot: &Snapshot) -> CheckResult {
        let weights: Vec<u32> = snapshot
            .results()
            .filter_map(|r| Self::weight(r.status()))
            .collect();

        let status = if weights.is_empty() {
            HealthStatus::Unknown
        } else {
            let total: u32 = weights.iter().sum();
            Self::status_for_score(total / weights.len() as u32)
        };

        CheckResult::builder()
            .status(status)
            .message("Weighted aggregated health status")
            .build()
    }
}
