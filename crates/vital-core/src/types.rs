//! Check results and health statuses.
//!
//! A [`CheckResult`] is the immutable outcome of one probe run or one
//! aggregation. Results produced by the executor additionally carry an
//! [`ExecutionMeta`] attachment (probe name, tags, timing). This is composition
//! rather than a separate result type.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::probe::Interrupted;

// ── Status ────────────────────────────────────────────────────────

/// Health status reported by a probe or an aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Failed,
    Degraded,
    Unknown,
    Critical,
    Initializing,
    Maintenance,
    Warning,
    Recovering,
    Disabled,
}

/// Ranked statuses, most severe first. Statuses not listed here have no
/// severity and are skipped by aggregation.
pub const SEVERITY_ORDER: [HealthStatus; 6] = [
    HealthStatus::Critical,
    HealthStatus::Unhealthy,
    HealthStatus::Degraded,
    HealthStatus::Warning,
    HealthStatus::Healthy,
    HealthStatus::Unknown,
];

impl HealthStatus {
    /// Position in [`SEVERITY_ORDER`] (0 = most severe), or `None` for
    /// non-ranked statuses.
    pub fn severity_rank(self) -> Option<usize> {
        SEVERITY_ORDER.iter().position(|s| *s == self)
    }

    /// Whether this status takes part in severity comparison.
    pub fn is_ranked(self) -> bool {
        self.severity_rank().is_some()
    }

    /// Upper-case status label.
    pub fn label(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "HEALTHY",
            HealthStatus::Unhealthy => "UNHEALTHY",
            HealthStatus::Failed => "FAILED",
            HealthStatus::Degraded => "DEGRADED",
            HealthStatus::Unknown => "UNKNOWN",
            HealthStatus::Critical => "CRITICAL",
            HealthStatus::Initializing => "INITIALIZING",
            HealthStatus::Maintenance => "MAINTENANCE",
            HealthStatus::Warning => "WARNING",
            HealthStatus::Recovering => "RECOVERING",
            HealthStatus::Disabled => "DISABLED",
        }
    }

    /// Human-readable description of the status.
    pub fn description(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "Fully operational, no issues.",
            HealthStatus::Unhealthy => "Significant issues, action needed.",
            HealthStatus::Failed => "Internal error occurred during health check execution.",
            HealthStatus::Degraded => "Operational but with reduced functionality or performance.",
            HealthStatus::Unknown => "State is undetermined, possibly due to lack of data.",
            HealthStatus::Critical => "Severe issues requiring immediate attention.",
            HealthStatus::Initializing => "Component is starting up, health unknown.",
            HealthStatus::Maintenance => "Component intentionally offline for maintenance.",
            HealthStatus::Warning => "Potential issue detected; requires attention.",
            HealthStatus::Recovering => "Transitioning from unhealthy to healthy.",
            HealthStatus::Disabled => "Checks are intentionally disabled or paused.",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.label(), self.description())
    }
}

// ── Fault ─────────────────────────────────────────────────────────

/// Classification of a captured fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The probe returned an error.
    Error,
    /// The probe was cancelled while running.
    Interrupted,
    /// The probe panicked.
    Panic,
}

/// An error captured from a probe run.
///
/// Stored by value so results stay comparable and cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    kind: FaultKind,
    message: String,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Capture a probe error. An [`Interrupted`] anywhere in the chain
    /// classifies the fault as an interruption.
    pub fn from_error(err: &anyhow::Error) -> Self {
        let kind = if err.chain().any(|e| e.is::<Interrupted>()) {
            FaultKind::Interrupted
        } else {
            FaultKind::Error
        };
        Self::new(kind, format!("{err:#}"))
    }

    pub fn interrupted() -> Self {
        Self::new(FaultKind::Interrupted, Interrupted.to_string())
    }

    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

// ── Execution metadata ────────────────────────────────────────────

/// Execution details attached to results produced by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionMeta {
    probe_name: String,
    tags: BTreeSet<String>,
    timestamp: SystemTime,
    duration: Duration,
    /// `None` when `timestamp + time_to_live` is not representable; such
    /// results never expire.
    expires_at: Option<SystemTime>,
}

impl ExecutionMeta {
    /// Capture execution metadata now.
    pub fn capture(
        probe_name: impl Into<String>,
        tags: BTreeSet<String>,
        duration: Duration,
        time_to_live: Duration,
    ) -> Self {
        let timestamp = SystemTime::now();
        Self {
            probe_name: probe_name.into(),
            tags,
            timestamp,
            duration,
            expires_at: timestamp.checked_add(time_to_live),
        }
    }

    pub fn probe_name(&self) -> &str {
        &self.probe_name
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at
    }

    /// Whether the result is past its time-to-live.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => SystemTime::now() > at,
            None => false,
        }
    }
}

// ── CheckResult ───────────────────────────────────────────────────

/// Outcome of a single check or aggregation.
///
/// Equality compares the outcome only (status, message, fault, TTL and
/// data); the execution attachment is ignored, so two runs reporting the
/// same thing are equal.
#[derive(Debug, Clone)]
pub struct CheckResult {
    status: HealthStatus,
    message: Option<String>,
    fault: Option<Fault>,
    time_to_live: Duration,
    data: HashMap<String, Bytes>,
    execution: Option<ExecutionMeta>,
}

impl CheckResult {
    pub fn builder() -> CheckResultBuilder {
        CheckResultBuilder::default()
    }

    /// Result with the given status and nothing else.
    pub fn of(status: HealthStatus) -> Self {
        Self::builder().status(status).build()
    }

    pub fn healthy() -> Self {
        Self::of(HealthStatus::Healthy)
    }

    /// Builder seeded with a copy of this result.
    pub fn to_builder(&self) -> CheckResultBuilder {
        CheckResultBuilder::from_result(self)
    }

    /// Attach execution metadata.
    pub fn with_execution(mut self, meta: ExecutionMeta) -> Self {
        self.execution = Some(meta);
        self
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    pub fn time_to_live(&self) -> Duration {
        self.time_to_live
    }

    pub fn data(&self) -> &HashMap<String, Bytes> {
        &self.data
    }

    pub fn execution(&self) -> Option<&ExecutionMeta> {
        self.execution.as_ref()
    }
}

impl PartialEq for CheckResult {
    fn eq(&self, other: &Self) -> bool {
        self.status == other.status
            && self.message == other.message
            && self.fault == other.fault
            && self.time_to_live == other.time_to_live
            && self.data == other.data
    }
}

impl Eq for CheckResult {}

/// Mutable builder for [`CheckResult`].
#[derive(Debug, Clone)]
pub struct CheckResultBuilder {
    status: HealthStatus,
    message: Option<String>,
    fault: Option<Fault>,
    time_to_live: Duration,
    data: HashMap<String, Bytes>,
}

impl Default for CheckResultBuilder {
    fn default() -> Self {
        Self {
            status: HealthStatus::Initializing,
            message: None,
            fault: None,
            time_to_live: Duration::ZERO,
            data: HashMap::new(),
        }
    }
}

impl CheckResultBuilder {
    /// Seed a builder from an existing result (copy-then-override).
    pub fn from_result(result: &CheckResult) -> Self {
        Self {
            status: result.status,
            message: result.message.clone(),
            fault: result.fault.clone(),
            time_to_live: result.time_to_live,
            data: result.data.clone(),
        }
    }

    pub fn status(self, status: HealthStatus) -> Self {
        Self { status, ..self }
    }

    pub fn message(self, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..self
        }
    }

    pub fn fault(self, fault: Fault) -> Self {
        Self {
            fault: Some(fault),
            ..self
        }
    }

    pub fn time_to_live(self, time_to_live: Duration) -> Self {
        Self {
            time_to_live,
            ..self
        }
    }

    /// Add an opaque data entry, replacing any previous value for `key`.
    pub fn data(mut self, key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> CheckResult {
        CheckResult {
            status: self.status,
            message: self.message,
            fault: self.fault,
            time_to_live: self.time_to_live,
            data: self.data,
            execution: None,
        }
    }
}
