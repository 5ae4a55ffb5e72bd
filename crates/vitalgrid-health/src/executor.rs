//! Executor: runs probes on the worker pool and records what happened.
//!
//! Callers get a `JoinHandle` immediately. The run itself measures the
//! check (including any retries its [`ExecutionStrategy`] makes), attaches
//! execution metadata and records the result in history.
//! Probe errors, panics and interruptions never escape; each becomes a
//! result plus a `Failed` event.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use vital_core::error::{panic_message, validate_name};
use vital_core::{
    CheckResult, ExecutionMeta, Fault, FaultKind, Filter, HealthEvent, HealthStatus, Probe,
    ProbeRef,
};
use vitalgrid_events::EventBus;
use vitalgrid_scheduler::{CancelSignal, SharedScheduler};

use crate::error::{HealthError, HealthResult};
use crate::history::History;
use crate::registry::Registry;
use crate::strategy::ExecutionStrategy;

pub const INTERRUPTED_MESSAGE: &str = "Execution was interrupted";

/// How a single check ended.
enum Outcome {
    Completed(CheckResult),
    Errored(anyhow::Error),
    Panicked(String),
    Interrupted,
}

/// Runs probes. Cloning yields another handle to the same components.
#[derive(Clone)]
pub struct Executor {
    pool: SharedScheduler,
    registry: Registry,
    history: History,
    bus: EventBus,
    strategy: ExecutionStrategy,
}

impl Executor {
    pub fn new(pool: SharedScheduler, registry: Registry, history: History, bus: EventBus) -> Self {
        Self {
            pool,
            registry,
            history,
            bus,
            strategy: ExecutionStrategy::Direct,
        }
    }

    pub fn with_strategy(self, strategy: ExecutionStrategy) -> Self {
        Self { strategy, ..self }
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    /// Run the probe registered under `name`.
    pub async fn execute(&self, name: &str) -> HealthResult<JoinHandle<CheckResult>> {
        validate_name(name)?;
        let probe = self
            .registry
            .get(name)
            .await
            .ok_or_else(|| HealthError::NotFound(name.to_string()))?;
        self.execute_probe(probe)
    }

    /// Run `probe`, registered or not.
    pub fn execute_probe(&self, probe: ProbeRef) -> HealthResult<JoinHandle<CheckResult>> {
        let signal = self.pool.signal();
        let this = self.clone();
        let handle = self
            .pool
            .submit(async move { this.run(probe, signal).await })?;
        Ok(handle)
    }

    /// Run every registered probe matching `filter`.
    pub async fn execute_matching(
        &self,
        filter: &Filter,
    ) -> HealthResult<Vec<JoinHandle<CheckResult>>> {
        self.registry
            .filter(filter)
            .await
            .into_iter()
            .map(|probe| self.execute_probe(probe))
            .collect()
    }

    /// Run every registered probe.
    pub async fn execute_all(&self) -> HealthResult<Vec<JoinHandle<CheckResult>>> {
        self.execute_matching(&Filter::all()).await
    }

    /// Periodic tick: run `name` inline on the calling task, observing the
    /// tick's cancellation signal. A name that is no longer registered is
    /// skipped.
    pub(crate) async fn execute_scheduled(&self, name: String, signal: CancelSignal) {
        match self.registry.get(&name).await {
            Some(probe) => {
                self.run(probe, signal).await;
            }
            None => debug!(%name, "scheduled probe no longer registered, skipping"),
        }
    }

    async fn run(&self, probe: ProbeRef, mut signal: CancelSignal) -> CheckResult {
        let started = Instant::now();

        let target = Arc::clone(&probe);
        let strategy = self.strategy;
        let mut check = match self.pool.submit(async move {
            let target: &dyn Probe = target.as_ref();
            strategy.execute(move || target.check()).await
        }) {
            Ok(check) => check,
            Err(e) => {
                debug!(name = %probe.name(), error = %e, "probe not started");
                return self.record_outcome(&probe, Outcome::Interrupted, started).await;
            }
        };

        let outcome = tokio::select! {
            biased;
            joined = &mut check => match joined {
                Ok(Ok(result)) => Outcome::Completed(result),
                Ok(Err(err)) => Outcome::Errored(err),
                Err(join) if join.is_panic() => {
                    Outcome::Panicked(panic_message(join.into_panic().as_ref()))
                }
                Err(_) => Outcome::Interrupted,
            },
            _ = signal.cancelled() => {
                check.abort();
                Outcome::Interrupted
            }
        };

        self.record_outcome(&probe, outcome, started).await
    }

    async fn record_outcome(
        &self,
        probe: &ProbeRef,
        outcome: Outcome,
        started: Instant,
    ) -> CheckResult {
        let name = probe.name().to_string();
        match outcome {
            Outcome::Completed(result) => {
                let duration = started.elapsed();
                let meta =
                    ExecutionMeta::capture(&name, probe.tags(), duration, result.time_to_live());
                let result = result.with_execution(meta);
                debug!(%name, status = %result.status().label(), ?duration, "probe checked");
                self.history.record(probe, result.clone()).await;
                result
            }
            Outcome::Errored(err) => {
                let fault = Fault::from_error(&err);
                let message = if fault.kind() == FaultKind::Interrupted {
                    debug!(%name, "probe reported interruption");
                    INTERRUPTED_MESSAGE.to_string()
                } else {
                    warn!(%name, error = %fault.message(), "probe failed");
                    fault.message().to_string()
                };
                self.record_fault(probe, HealthStatus::Unhealthy, message, fault).await
            }
            Outcome::Panicked(panic) => {
                error!(%name, %panic, "probe panicked");
                let fault = Fault::new(FaultKind::Panic, panic.clone());
                let message = format!("Probe panicked: {panic}");
                self.record_fault(probe, HealthStatus::Failed, message, fault).await
            }
            Outcome::Interrupted => {
                debug!(%name, "probe interrupted");
                self.record_fault(
                    probe,
                    HealthStatus::Unhealthy,
                    INTERRUPTED_MESSAGE.to_string(),
                    Fault::interrupted(),
                )
                .await
            }
        }
    }

    /// Record a fault result (duration zero) and publish `Failed`.
    async fn record_fault(
        &self,
        probe: &ProbeRef,
        status: HealthStatus,
        message: String,
        fault: Fault,
    ) -> CheckResult {
        let name = probe.name().to_string();
        let tags = probe.tags();
        let result = CheckResult::builder()
            .status(status)
            .message(message.clone())
            .fault(fault.clone())
            .build()
            .with_execution(ExecutionMeta::capture(
                &name,
                tags.clone(),
                Duration::ZERO,
                Duration::ZERO,
            ));

        self.history.record(probe, result.clone()).await;
        self.bus
            .publish(HealthEvent::Failed {
                name,
                tags,
                probe: Arc::clone(probe),
                message: Some(message),
                fault,
            })
            .await;
        result
    }
}
