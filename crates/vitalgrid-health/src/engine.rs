//! HealthEngine: the top-level owner.
//!
//! Builds one [`SharedScheduler`] from configuration and injects it into the
//! event bus, registry, history, executor and periodic scheduler. All public
//! operations are delegates, except that removing a probe also cancels its
//! periodic schedule.

use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use vital_core::error::validate_name;
use vital_core::{
    BoxFuture, CheckResult, EngineConfig, EventKind, Filter, ListenerRef, PeriodicSchedule,
    ProbeRef,
};
use vitalgrid_events::EventBus;
use vitalgrid_scheduler::{
    CancelSignal, PeriodicScheduler, SchedulerState, SharedScheduler, TriggerFn,
};

use crate::aggregator::AggregatorRef;
use crate::error::{HealthError, HealthResult};
use crate::executor::Executor;
use crate::history::History;
use crate::registry::Registry;
use crate::strategy::ExecutionStrategy;

/// Embeddable health-monitoring engine.
///
/// Dropping the engine stops its worker pool without draining; call
/// [`HealthEngine::shutdown`] first for a graceful stop.
pub struct HealthEngine {
    config: EngineConfig,
    pool: SharedScheduler,
    bus: EventBus,
    registry: Registry,
    history: History,
    executor: Executor,
    periodic: PeriodicScheduler,
}

impl HealthEngine {
    pub fn new(config: EngineConfig) -> HealthResult<Self> {
        config.validate()?;

        let pool = SharedScheduler::new(config.scheduler.clone())?;
        let bus = EventBus::new(pool.clone());
        let registry = Registry::new(bus.clone());
        let history = History::new(config.history_capacity, registry.clone(), bus.clone())?;
        let executor = Executor::new(pool.clone(), registry.clone(), history.clone(), bus.clone())
            .with_strategy(ExecutionStrategy::from(config.retry));

        let tick_executor = executor.clone();
        let trigger: TriggerFn = Arc::new(
            move |name: String, signal: CancelSignal| -> BoxFuture<'static, ()> {
                let executor = tick_executor.clone();
                Box::pin(async move { executor.execute_scheduled(name, signal).await })
            },
        );
        let periodic = PeriodicScheduler::new(pool.clone(), trigger);

        info!(
            history_capacity = config.history_capacity,
            pool_size = config.scheduler.pool_size,
            retry = config.retry.is_some(),
            "health engine started"
        );

        Ok(Self {
            config,
            pool,
            bus,
            registry,
            history,
            executor,
            periodic,
        })
    }

    pub fn with_defaults() -> HealthResult<Self> {
        Self::new(EngineConfig::default())
    }

    /// Load configuration from a TOML file and start an engine.
    pub fn from_file(path: &Path) -> HealthResult<Self> {
        Self::new(EngineConfig::from_file(path)?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &SharedScheduler {
        &self.pool
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn state(&self) -> SchedulerState {
        self.pool.state()
    }

    // ── Probes ────────────────────────────────────────────────────

    /// Register `probe`. Returns `false` if the name is taken.
    pub async fn register(&self, probe: ProbeRef) -> bool {
        self.registry.register(probe).await
    }

    /// Register `probe` and start running it on `schedule`.
    ///
    /// Returns `Ok(false)` without scheduling if the name is taken. An
    /// invalid schedule is rejected before anything is registered.
    pub async fn register_periodic(
        &self,
        probe: ProbeRef,
        schedule: PeriodicSchedule,
    ) -> HealthResult<bool> {
        schedule.validate()?;
        let name = probe.name().to_string();
        if !self.registry.register(probe).await {
            return Ok(false);
        }
        if let Err(e) = self.periodic.schedule(&name, schedule).await {
            self.registry.unregister(&name).await;
            return Err(e.into());
        }
        Ok(true)
    }

    /// Start running an already registered probe on `schedule`.
    pub async fn schedule(&self, name: &str, schedule: PeriodicSchedule) -> HealthResult<()> {
        validate_name(name)?;
        if !self.registry.is_registered(name).await {
            return Err(HealthError::NotFound(name.to_string()));
        }
        self.periodic.schedule(name, schedule).await?;
        Ok(())
    }

    pub async fn schedule_with_cron(&self, name: &str, expression: &str) -> HealthResult<()> {
        self.periodic.schedule_with_cron(name, expression).await?;
        Ok(())
    }

    pub async fn cancel_schedule(&self, name: &str) -> bool {
        self.periodic.cancel(name).await
    }

    pub async fn is_scheduled(&self, name: &str) -> bool {
        self.periodic.is_scheduled(name).await
    }

    pub async fn scheduled(&self) -> Vec<String> {
        self.periodic.scheduled().await
    }

    pub async fn unregister(&self, name: &str) -> Option<ProbeRef> {
        let removed = self.registry.unregister(name).await?;
        self.cancel_if_scheduled(name).await;
        Some(removed)
    }

    /// Remove `probe` only if that exact instance is registered.
    pub async fn unregister_probe(&self, probe: &ProbeRef) -> Option<ProbeRef> {
        let removed = self.registry.unregister_probe(probe).await?;
        self.cancel_if_scheduled(removed.name()).await;
        Some(removed)
    }

    pub async fn unregister_matching(&self, filter: &Filter) -> Option<Vec<ProbeRef>> {
        let removed = self.registry.unregister_matching(filter).await?;
        for probe in &removed {
            self.cancel_if_scheduled(probe.name()).await;
        }
        Some(removed)
    }

    /// Remove every probe and cancel every periodic schedule.
    pub async fn clear(&self) -> Vec<ProbeRef> {
        let removed = self.registry.clear().await;
        self.periodic.cancel_all().await;
        removed
    }

    async fn cancel_if_scheduled(&self, name: &str) {
        if self.periodic.is_scheduled(name).await {
            self.periodic.cancel(name).await;
        } else {
            debug!(%name, "removed probe had no periodic schedule");
        }
    }

    pub async fn get(&self, name: &str) -> Option<ProbeRef> {
        self.registry.get(name).await
    }

    pub async fn is_registered(&self, name: &str) -> bool {
        self.registry.is_registered(name).await
    }

    /// Registered probes, sorted by name.
    pub async fn probes(&self) -> Vec<ProbeRef> {
        self.registry.all().await
    }

    pub async fn filter(&self, filter: &Filter) -> Vec<ProbeRef> {
        self.registry.filter(filter).await
    }

    // ── Aggregators ───────────────────────────────────────────────

    pub async fn register_aggregator(&self, aggregator: AggregatorRef) -> bool {
        self.registry.register_aggregator(aggregator).await
    }

    pub async fn unregister_aggregator(&self, name: &str) -> Option<AggregatorRef> {
        self.registry.unregister_aggregator(name).await
    }

    pub async fn is_aggregator_registered(&self, name: &str) -> bool {
        self.registry.is_aggregator_registered(name).await
    }

    pub async fn get_aggregator(&self, name: &str) -> Option<AggregatorRef> {
        self.registry.get_aggregator(name).await
    }

    pub async fn aggregators(&self) -> Vec<AggregatorRef> {
        self.registry.all_aggregators().await
    }

    pub async fn clear_aggregators(&self) {
        self.registry.clear_aggregators().await
    }

    // ── Execution ─────────────────────────────────────────────────

    pub async fn execute(&self, name: &str) -> HealthResult<JoinHandle<CheckResult>> {
        self.executor.execute(name).await
    }

    pub fn execute_probe(&self, probe: ProbeRef) -> HealthResult<JoinHandle<CheckResult>> {
        self.executor.execute_probe(probe)
    }

    pub async fn execute_matching(
        &self,
        filter: &Filter,
    ) -> HealthResult<Vec<JoinHandle<CheckResult>>> {
        self.executor.execute_matching(filter).await
    }

    pub async fn execute_all(&self) -> HealthResult<Vec<JoinHandle<CheckResult>>> {
        self.executor.execute_all().await
    }

    // ── History ───────────────────────────────────────────────────

    /// Recorded results for a probe or aggregator, oldest first.
    pub async fn history(&self, name: &str) -> Vec<CheckResult> {
        self.history.history(name).await
    }

    pub async fn latest(&self, name: &str) -> Option<CheckResult> {
        self.history.latest(name).await
    }

    pub async fn filter_history(&self, filter: &Filter) -> Vec<CheckResult> {
        self.history.filter_history(filter).await
    }

    pub async fn clear_history(&self) {
        self.history.clear_history().await
    }

    // ── Listeners ─────────────────────────────────────────────────

    pub async fn add_listener(&self, listener: ListenerRef) {
        self.bus.add_listener(listener).await
    }

    pub async fn add_listener_with_filter(&self, listener: ListenerRef, filter: Filter) {
        self.bus.add_listener_with_filter(listener, filter).await
    }

    pub async fn add_listener_for_kinds<I>(&self, listener: ListenerRef, kinds: I)
    where
        I: IntoIterator<Item = EventKind>,
    {
        self.bus.add_listener_for_kinds(listener, kinds).await
    }

    pub async fn add_filtered_listener<I>(&self, listener: ListenerRef, filter: Filter, kinds: I)
    where
        I: IntoIterator<Item = EventKind>,
    {
        self.bus.add_filtered_listener(listener, filter, kinds).await
    }

    pub async fn remove_listener(&self, listener: &ListenerRef) -> bool {
        self.bus.remove_listener(listener).await
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    /// Cancel periodic schedules, then drain and stop the worker pool.
    pub async fn shutdown(&self) {
        self.periodic.cancel_all().await;
        self.pool.shutdown().await;
    }

    /// Shut down and start a fresh worker pool. Periodic schedules are not
    /// restored.
    pub async fn restart(&self) -> HealthResult<()> {
        self.periodic.cancel_all().await;
        self.pool.restart().await?;
        Ok(())
    }
}

impl Drop for HealthEngine {
    fn drop(&mut self) {
        self.pool.shutdown_now();
    }
}
