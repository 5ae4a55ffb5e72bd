//! Engine configuration.
//!
//! Loaded from TOML; durations are written as human strings ("250us",
//! "500ms", "5s", "2m", or a bare number of seconds).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::retry::RetryPolicy;

pub const DEFAULT_HISTORY_CAPACITY: usize = 5;
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "vitalgrid";

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Results kept per probe and per aggregator.
    pub history_capacity: usize,
    pub scheduler: SchedulerConfig,
    /// Retry failed checks; `None` runs each check once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            scheduler: SchedulerConfig::default(),
            retry: None,
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::ConfigRead(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| CoreError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> CoreResult<String> {
        toml::to_string_pretty(self).map_err(|e| CoreError::ConfigParse(e.to_string()))
    }

    pub fn with_history_capacity(self, history_capacity: usize) -> Self {
        Self {
            history_capacity,
            ..self
        }
    }

    pub fn with_scheduler(self, scheduler: SchedulerConfig) -> Self {
        Self { scheduler, ..self }
    }

    pub fn with_retry(self, retry: RetryPolicy) -> Self {
        Self {
            retry: Some(retry),
            ..self
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.history_capacity == 0 {
            return Err(CoreError::InvalidArgument("history_capacity must be at least 1".into()));
        }
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        self.scheduler.validate()
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub pool_size: usize,
    /// How long `shutdown` waits for in-flight work before cancelling it.
    #[serde(with = "duration_str")]
    pub shutdown_timeout: Duration,
    pub thread_name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            pool_size: cpus.max(2),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_pool_size(self, pool_size: usize) -> Self {
        Self { pool_size, ..self }
    }

    pub fn with_shutdown_timeout(self, shutdown_timeout: Duration) -> Self {
        Self {
            shutdown_timeout,
            ..self
        }
    }

    pub fn with_thread_name_prefix(self, prefix: impl Into<String>) -> Self {
        Self {
            thread_name_prefix: prefix.into(),
            ..self
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.pool_size == 0 {
            return Err(CoreError::InvalidArgument("pool_size must be at least 1".into()));
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(CoreError::InvalidArgument("thread_name_prefix must not be empty".into()));
        }
        Ok(())
    }
}

// ── Periodic schedules ────────────────────────────────────────────

/// How the gap between periodic runs is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    /// `period` is the pause between the end of one run and the start of
    /// the next.
    #[default]
    FixedDelay,
    /// Runs start every `period`; late ticks are delayed, never bursted.
    FixedRate,
}

/// Recurring execution settings for one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicSchedule {
    #[serde(with = "duration_str", default)]
    pub initial_delay: Duration,
    #[serde(with = "duration_str")]
    pub period: Duration,
    #[serde(default)]
    pub mode: ScheduleMode,
}

impl PeriodicSchedule {
    pub fn fixed_delay(initial_delay: Duration, period: Duration) -> Self {
        Self {
            initial_delay,
            period,
            mode: ScheduleMode::FixedDelay,
        }
    }

    pub fn fixed_rate(initial_delay: Duration, period: Duration) -> Self {
        Self {
            initial_delay,
            period,
            mode: ScheduleMode::FixedRate,
        }
    }

    /// The period must be non-zero.
    pub fn validate(&self) -> CoreResult<()> {
        if self.period.is_zero() {
            return Err(CoreError::InvalidArgument("period must be greater than zero".into()));
        }
        Ok(())
    }
}

// ── Durations ─────────────────────────────────────────────────────

/// Parse a duration string like "30s", "500ms", "250us", "2m" or "10"
/// (seconds).
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(nanos) = s.strip_suffix("ns") {
        nanos.parse::<u64>().ok().map(Duration::from_nanos)
    } else if let Some(micros) = s.strip_suffix("us") {
        micros.parse::<u64>().ok().map(Duration::from_micros)
    } else if let Some(millis) = s.strip_suffix("ms") {
        millis.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Render a duration in the largest unit `parse_duration` reads back
/// exactly.
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos % 1_000 != 0 {
        return format!("{nanos}ns");
    }
    if nanos % 1_000_000 != 0 {
        return format!("{}us", nanos / 1_000);
    }
    let millis = nanos / 1_000_000;
    if millis % 1000 != 0 {
        format!("{millis}ms")
    } else if millis != 0 && millis % 60_000 == 0 {
        format!("{}m", millis / 60_000)
    } else {
        format!("{}s", millis / 1000)
    }
}

pub(crate) mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    use super::{format_duration, parse_duration};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).ok_or_else(|| de::Error::custom(format!("invalid duration: {s:?}")))
    }
}
