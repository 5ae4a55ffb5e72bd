//! PeriodicScheduler: recurring triggers keyed by probe name.
//!
//! Each scheduled name owns one recurring task on the [`SharedScheduler`].
//! A tick calls the configured [`TriggerFn`] with the name and the task's
//! [`CancelSignal`]; what the trigger does (normally: execute the probe) is
//! up to the owner.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use vital_core::{BoxFuture, PeriodicSchedule, ScheduleMode};

use crate::error::{SchedulerError, SchedulerResult};
use crate::pool::{CancelSignal, SharedScheduler, TaskHandle};

/// Callback invoked on every tick with the scheduled name.
pub type TriggerFn = Arc<dyn Fn(String, CancelSignal) -> BoxFuture<'static, ()> + Send + Sync>;

/// Registry of recurring triggers.
pub struct PeriodicScheduler {
    pool: SharedScheduler,
    trigger: TriggerFn,
    /// Active tasks: name → handle.
    tasks: Arc<RwLock<HashMap<String, TaskHandle>>>,
}

impl PeriodicScheduler {
    pub fn new(pool: SharedScheduler, trigger: TriggerFn) -> Self {
        Self {
            pool,
            trigger,
            tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start triggering `name` on `schedule`.
    ///
    /// Fails with `AlreadyScheduled` if a live task exists for the name; the
    /// existing task is never replaced. The check and the insert happen
    /// under one write lock.
    pub async fn schedule(&self, name: &str, schedule: PeriodicSchedule) -> SchedulerResult<()> {
        vital_core::error::validate_name(name)?;
        schedule.validate()?;

        let mut tasks = self.tasks.write().await;
        if let Some(existing) = tasks.get(name) {
            if !existing.is_finished() {
                return Err(SchedulerError::AlreadyScheduled(name.to_string()));
            }
            debug!(%name, "replacing finished periodic task");
        }

        let trigger = Arc::clone(&self.trigger);
        let owned = name.to_string();
        let tick = move |signal: CancelSignal| trigger(owned.clone(), signal);

        let handle = match schedule.mode {
            ScheduleMode::FixedDelay => {
                self.pool
                    .schedule_with_fixed_delay(schedule.initial_delay, schedule.period, tick)?
            }
            ScheduleMode::FixedRate => {
                self.pool
                    .schedule_at_fixed_rate(schedule.initial_delay, schedule.period, tick)?
            }
        };
        tasks.insert(name.to_string(), handle);

        info!(
            %name,
            period = ?schedule.period,
            initial_delay = ?schedule.initial_delay,
            mode = ?schedule.mode,
            "periodic schedule started"
        );
        Ok(())
    }

    /// Cron expressions are not supported.
    pub async fn schedule_with_cron(&self, name: &str, expression: &str) -> SchedulerResult<()> {
        warn!(%name, %expression, "cron scheduling requested but not supported");
        Err(SchedulerError::CronUnsupported(expression.to_string()))
    }

    /// Cancel and forget the task for `name`. Returns `false` (and logs a
    /// warning) if nothing was scheduled.
    pub async fn cancel(&self, name: &str) -> bool {
        let removed = self.tasks.write().await.remove(name);
        match removed {
            Some(handle) => {
                handle.cancel();
                info!(%name, "periodic schedule cancelled");
                true
            }
            None => {
                warn!(%name, "no periodic schedule to cancel");
                false
            }
        }
    }

    /// Cancel every task.
    pub async fn cancel_all(&self) {
        let mut tasks = self.tasks.write().await;
        let count = tasks.len();
        for (name, handle) in tasks.drain() {
            handle.cancel();
            debug!(%name, "periodic schedule cancelled");
        }
        if count > 0 {
            info!(count, "all periodic schedules cancelled");
        }
    }

    pub async fn is_scheduled(&self, name: &str) -> bool {
        self.tasks
            .read()
            .await
            .get(name)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Names with a live task, sorted.
    pub async fn scheduled(&self) -> Vec<String> {
        let tasks = self.tasks.read().await;
        let mut names: Vec<String> = tasks
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use vital_core::SchedulerConfig;

    use super::*;

    fn test_pool() -> SharedScheduler {
        SharedScheduler::new(
            SchedulerConfig::default()
                .with_pool_size(2)
                .with_shutdown_timeout(Duration::from_secs(2)),
        )
        .unwrap()
    }

    /// Trigger that records every tick's name.
    fn recording_trigger() -> (TriggerFn, Arc<Mutex<Vec<String>>>) {
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ticks);
        let trigger: TriggerFn =
            Arc::new(move |name: String, _: CancelSignal| -> BoxFuture<'static, ()> {
                let sink = Arc::clone(&sink);
                Box::pin(async move {
                    sink.lock().unwrap().push(name);
                })
            });
        (trigger, ticks)
    }

    fn every(ms: u64) -> PeriodicSchedule {
        PeriodicSchedule::fixed_delay(Duration::ZERO, Duration::from_millis(ms))
    }

    #[tokio::test]
    async fn schedule_triggers_by_name() {
        let pool = test_pool();
        let (trigger, ticks) = recording_trigger();
        let periodic = PeriodicScheduler::new(pool.clone(), trigger);

        periodic.schedule("db", every(10)).await.unwrap();
        assert!(periodic.is_scheduled("db").await);
        assert_eq!(periodic.scheduled().await, vec!["db".to_string()]);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(periodic.cancel("db").await);
        assert!(!periodic.is_scheduled("db").await);

        let ticks = ticks.lock().unwrap().clone();
        assert!(ticks.len() >= 2);
        assert!(ticks.iter().all(|n| n == "db"));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_schedule_is_rejected() {
        let pool = test_pool();
        let (trigger, _) = recording_trigger();
        let periodic = PeriodicScheduler::new(pool.clone(), trigger);

        periodic.schedule("db", every(1000)).await.unwrap();
        let err = periodic.schedule("db", every(10)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyScheduled(ref n) if n == "db"));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_duplicate_schedules_admit_one() {
        let pool = test_pool();
        let (trigger, _) = recording_trigger();
        let periodic = Arc::new(PeriodicScheduler::new(pool.clone(), trigger));

        let mut joins = Vec::new();
        for _ in 0..8 {
            let periodic = Arc::clone(&periodic);
            joins.push(tokio::spawn(async move {
                periodic.schedule("db", every(1000)).await.is_ok()
            }));
        }
        let mut accepted = 0;
        for join in joins {
            if join.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn cancel_unknown_name_is_noop() {
        let pool = test_pool();
        let (trigger, _) = recording_trigger();
        let periodic = PeriodicScheduler::new(pool.clone(), trigger);
        assert!(!periodic.cancel("missing").await);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_schedules_are_rejected() {
        let pool = test_pool();
        let (trigger, _) = recording_trigger();
        let periodic = PeriodicScheduler::new(pool.clone(), trigger);

        let zero = PeriodicSchedule::fixed_rate(Duration::ZERO, Duration::ZERO);
        assert!(matches!(
            periodic.schedule("db", zero).await,
            Err(SchedulerError::InvalidArgument(_))
        ));
        assert!(matches!(
            periodic.schedule(" ", every(10)).await,
            Err(SchedulerError::InvalidArgument(_))
        ));
        assert!(matches!(
            periodic.schedule_with_cron("db", "*/5 * * * *").await,
            Err(SchedulerError::CronUnsupported(_))
        ));
        assert!(periodic.scheduled().await.is_empty());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn schedule_on_stopped_pool_is_rejected() {
        let pool = test_pool();
        let (trigger, _) = recording_trigger();
        let periodic = PeriodicScheduler::new(pool.clone(), trigger);
        pool.shutdown().await;

        let err = periodic.schedule("db", every(10)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Rejected { .. }));
        assert!(!periodic.is_scheduled("db").await);
    }

    #[tokio::test]
    async fn cancel_all_stops_everything() {
        let pool = test_pool();
        let (trigger, _) = recording_trigger();
        let periodic = PeriodicScheduler::new(pool.clone(), trigger);

        periodic.schedule("db", every(50)).await.unwrap();
        periodic
            .schedule(
                "cache",
                PeriodicSchedule::fixed_rate(Duration::ZERO, Duration::from_millis(50)),
            )
            .await
            .unwrap();
        assert_eq!(
            periodic.scheduled().await,
            vec!["cache".to_string(), "db".to_string()]
        );

        periodic.cancel_all().await;
        assert!(periodic.scheduled().await.is_empty());
        pool.shutdown().await;
    }
}
