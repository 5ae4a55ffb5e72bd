//! Registry: the concurrent store of probes and aggregators.
//!
//! Probe names are unique. Probes and aggregators share one namespace, since
//! history keys results by name. Registration is first-wins; every
//! successful registration and removal is announced on the event bus.
//! Aggregator changes are silent.
//!
//! Lock order is probes, then aggregators.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use vital_core::{Filter, FilterContext, HealthEvent, ProbeRef};
use vitalgrid_events::EventBus;

use crate::aggregator::AggregatorRef;

/// Named probes and aggregators. Cloning yields another handle to the same
/// store.
#[derive(Clone)]
pub struct Registry {
    probes: Arc<RwLock<HashMap<String, ProbeRef>>>,
    aggregators: Arc<RwLock<HashMap<String, AggregatorRef>>>,
    bus: EventBus,
}

impl Registry {
    pub fn new(bus: EventBus) -> Self {
        Self {
            probes: Arc::new(RwLock::new(HashMap::new())),
            aggregators: Arc::new(RwLock::new(HashMap::new())),
            bus,
        }
    }

    // ── Probes ────────────────────────────────────────────────────

    /// Add a probe. Returns `false`, without publishing anything, if the
    /// name is taken by a probe or an aggregator.
    pub async fn register(&self, probe: ProbeRef) -> bool {
        let name = probe.name().to_string();
        {
            let mut probes = self.probes.write().await;
            if probes.contains_key(&name) {
                debug!(%name, "probe already registered");
                return false;
            }
            if self.aggregators.read().await.contains_key(&name) {
                warn!(%name, "name already used by an aggregator");
                return false;
            }
            probes.insert(name.clone(), Arc::clone(&probe));
        }

        info!(%name, "probe registered");
        self.bus
            .publish(HealthEvent::Registered {
                name,
                tags: probe.tags(),
                probe,
            })
            .await;
        true
    }

    /// Remove a probe by name.
    pub async fn unregister(&self, name: &str) -> Option<ProbeRef> {
        let removed = self.probes.write().await.remove(name)?;
        self.announce_removed(&removed).await;
        Some(removed)
    }

    /// Remove `probe` if it is the instance registered under its name.
    pub async fn unregister_probe(&self, probe: &ProbeRef) -> Option<ProbeRef> {
        let removed = {
            let mut probes = self.probes.write().await;
            let same = probes
                .get(probe.name())
                .is_some_and(|current| Arc::ptr_eq(current, probe));
            if same {
                probes.remove(probe.name())
            } else {
                None
            }
        }?;
        self.announce_removed(&removed).await;
        Some(removed)
    }

    /// Remove every probe matching `filter`. Returns `None` when nothing
    /// matched.
    pub async fn unregister_matching(&self, filter: &Filter) -> Option<Vec<ProbeRef>> {
        let removed: Vec<ProbeRef> = {
            let mut probes = self.probes.write().await;
            let names: Vec<String> = probes
                .iter()
                .filter(|(name, probe)| matches_probe(filter, name, probe))
                .map(|(name, _)| name.clone())
                .collect();
            names
                .iter()
                .filter_map(|name| probes.remove(name))
                .collect()
        };

        if removed.is_empty() {
            return None;
        }
        for probe in &removed {
            self.announce_removed(probe).await;
        }
        Some(removed)
    }

    async fn announce_removed(&self, probe: &ProbeRef) {
        info!(name = %probe.name(), "probe unregistered");
        self.bus
            .publish(HealthEvent::Removed {
                name: probe.name().to_string(),
                tags: probe.tags(),
                probe: Arc::clone(probe),
            })
            .await;
    }

    pub async fn get(&self, name: &str) -> Option<ProbeRef> {
        self.probes.read().await.get(name).cloned()
    }

    pub async fn is_registered(&self, name: &str) -> bool {
        self.probes.read().await.contains_key(name)
    }

    /// Every probe, in name order.
    pub async fn all(&self) -> Vec<ProbeRef> {
        self.filter(&Filter::all()).await
    }

    /// Probes matching `filter`, in name order. The filter sees no result.
    pub async fn filter(&self, filter: &Filter) -> Vec<ProbeRef> {
        let probes = self.probes.read().await;
        let mut matched: Vec<ProbeRef> = probes
            .iter()
            .filter(|(name, probe)| matches_probe(filter, name, probe))
            .map(|(_, probe)| Arc::clone(probe))
            .collect();
        matched.sort_by(|a, b| a.name().cmp(b.name()));
        matched
    }

    pub async fn len(&self) -> usize {
        self.probes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.probes.read().await.is_empty()
    }

    /// Remove every probe and publish a single `AllCleared`. Returns what
    /// was removed.
    pub async fn clear(&self) -> Vec<ProbeRef> {
        let removed: Vec<ProbeRef> = self
            .probes
            .write()
            .await
            .drain()
            .map(|(_, probe)| probe)
            .collect();

        info!(count = removed.len(), "registry cleared");
        self.bus.publish(HealthEvent::AllCleared).await;
        removed
    }

    // ── Aggregators ───────────────────────────────────────────────

    /// Add an aggregator. Returns `false` if the name is taken by a probe
    /// or another aggregator.
    pub async fn register_aggregator(&self, aggregator: AggregatorRef) -> bool {
        let name = aggregator.name().to_string();
        let probes = self.probes.read().await;
        if probes.contains_key(&name) {
            warn!(%name, "name already used by a probe");
            return false;
        }
        let mut aggregators = self.aggregators.write().await;
        if aggregators.contains_key(&name) {
            return false;
        }
        aggregators.insert(name.clone(), aggregator);
        debug!(%name, "aggregator registered");
        true
    }

    pub async fn is_aggregator_registered(&self, name: &str) -> bool {
        self.aggregators.read().await.contains_key(name)
    }

    pub async fn unregister_aggregator(&self, name: &str) -> Option<AggregatorRef> {
        let removed = self.aggregators.write().await.remove(name);
        if removed.is_some() {
            debug!(%name, "aggregator unregistered");
        }
        removed
    }

    pub async fn get_aggregator(&self, name: &str) -> Option<AggregatorRef> {
        self.aggregators.read().await.get(name).cloned()
    }

    /// Every aggregator, in name order.
    pub async fn all_aggregators(&self) -> Vec<AggregatorRef> {
        let aggregators = self.aggregators.read().await;
        let mut all: Vec<AggregatorRef> = aggregators.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    pub async fn clear_aggregators(&self) {
        self.aggregators.write().await.clear();
        debug!("aggregators cleared");
    }
}

fn matches_probe(filter: &Filter, name: &str, probe: &ProbeRef) -> bool {
    let tags = probe.tags();
    filter.matches(&FilterContext::new(Some(name), Some(probe), None, &tags))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use vital_core::{
        CheckResult, EventKind, HealthListener, HealthStatus, SchedulerConfig, probe_fn,
    };
    use vitalgrid_scheduler::SharedScheduler;

    use super::*;
    use crate::aggregator::{MostSevereAggregator, WeightedAggregator};

    struct KindListener {
        tx: mpsc::UnboundedSender<(EventKind, Option<String>)>,
    }

    impl HealthListener for KindListener {
        fn handle(&self, event: &HealthEvent) {
            let _ = self
                .tx
                .send((event.kind(), event.name().map(str::to_string)));
        }
    }

    async fn test_registry() -> (
        Registry,
        SharedScheduler,
        mpsc::UnboundedReceiver<(EventKind, Option<String>)>,
    ) {
        let pool = SharedScheduler::new(
            SchedulerConfig::default()
                .with_pool_size(2)
                .with_shutdown_timeout(Duration::from_secs(2)),
        )
        .unwrap();
        let bus = EventBus::new(pool.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        bus.add_listener(Arc::new(KindListener { tx })).await;
        (Registry::new(bus), pool, rx)
    }

    fn test_probe(name: &str, tags: &[&str]) -> ProbeRef {
        probe_fn(name, tags.iter().copied(), || async {
            Ok(CheckResult::of(HealthStatus::Healthy))
        })
        .unwrap()
    }

    async fn drain(
        rx: &mut mpsc::UnboundedReceiver<(EventKind, Option<String>)>,
    ) -> Vec<(EventKind, Option<String>)> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn register_is_first_wins_and_silent_on_failure() {
        let (registry, pool, mut rx) = test_registry().await;
        let first = test_probe("db", &["sql"]);
        let second = test_probe("db", &["other"]);

        assert!(registry.register(Arc::clone(&first)).await);
        assert!(!registry.register(second).await);

        let stored = registry.get("db").await.unwrap();
        assert!(Arc::ptr_eq(&stored, &first));

        let events = drain(&mut rx).await;
        assert_eq!(events, vec![(EventKind::Registered, Some("db".to_string()))]);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_registration_of_distinct_names() {
        let (registry, pool, _rx) = test_registry().await;
        let mut joins = Vec::new();
        for i in 0..32 {
            let registry = registry.clone();
            joins.push(tokio::spawn(async move {
                registry.register(test_probe(&format!("probe-{i}"), &[])).await
            }));
        }
        for join in joins {
            assert!(join.await.unwrap());
        }
        assert_eq!(registry.len().await, 32);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_registration_of_same_name_admits_one() {
        let (registry, pool, _rx) = test_registry().await;
        let mut joins = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            joins.push(tokio::spawn(async move {
                registry.register(test_probe("db", &[])).await
            }));
        }
        let mut winners = 0;
        for join in joins {
            if join.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn unregister_by_name_and_instance() {
        let (registry, pool, mut rx) = test_registry().await;
        let db = test_probe("db", &[]);
        let cache = test_probe("cache", &[]);
        registry.register(Arc::clone(&db)).await;
        registry.register(Arc::clone(&cache)).await;

        assert!(registry.unregister("db").await.is_some());
        assert!(registry.unregister("db").await.is_none());
        assert!(!registry.is_registered("db").await);

        // A different instance with the same name is not removed.
        let impostor = test_probe("cache", &[]);
        assert!(registry.unregister_probe(&impostor).await.is_none());
        assert!(registry.unregister_probe(&cache).await.is_some());
        assert!(registry.is_empty().await);

        let removed: Vec<_> = drain(&mut rx)
            .await
            .into_iter()
            .filter(|(kind, _)| *kind == EventKind::Removed)
            .collect();
        assert_eq!(removed.len(), 2);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn removing_an_absent_name_publishes_nothing() {
        let (registry, pool, mut rx) = test_registry().await;
        registry.register(test_probe("db", &[])).await;
        drain(&mut rx).await;

        assert!(registry.unregister("missing").await.is_none());
        assert!(registry.unregister_probe(&test_probe("missing", &[])).await.is_none());
        assert!(registry.unregister_matching(&Filter::by_name("missing")).await.is_none());

        assert!(drain(&mut rx).await.is_empty());
        assert!(registry.is_registered("db").await);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn unregister_matching_emits_one_event_per_probe() {
        let (registry, pool, mut rx) = test_registry().await;
        registry.register(test_probe("db-primary", &["sql"])).await;
        registry.register(test_probe("db-replica", &["sql"])).await;
        registry.register(test_probe("cache", &["kv"])).await;
        drain(&mut rx).await;

        let removed = registry
            .unregister_matching(&Filter::by_tag("sql"))
            .await
            .unwrap();
        assert_eq!(removed.len(), 2);
        assert!(registry.is_registered("cache").await);
        assert!(
            registry
                .unregister_matching(&Filter::by_tag("sql"))
                .await
                .is_none()
        );

        let events = drain(&mut rx).await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|(kind, _)| *kind == EventKind::Removed));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn filter_and_all_are_sorted() {
        let (registry, pool, _rx) = test_registry().await;
        registry.register(test_probe("b", &["x"])).await;
        registry.register(test_probe("a", &["x"])).await;
        registry.register(test_probe("c", &["y"])).await;

        let names: Vec<String> = registry
            .all()
            .await
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        let tagged: Vec<String> = registry
            .filter(&Filter::by_tag("x"))
            .await
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(tagged, vec!["a", "b"]);

        // No result is visible to registry filters.
        assert!(
            registry
                .filter(&Filter::by_status(HealthStatus::Healthy))
                .await
                .is_empty()
        );
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn clear_publishes_single_event() {
        let (registry, pool, mut rx) = test_registry().await;
        registry.register(test_probe("a", &[])).await;
        registry.register(test_probe("b", &[])).await;
        drain(&mut rx).await;

        let removed = registry.clear().await;
        assert_eq!(removed.len(), 2);
        assert!(registry.is_empty().await);

        let events = drain(&mut rx).await;
        assert_eq!(events, vec![(EventKind::AllCleared, None)]);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn probes_and_aggregators_share_one_namespace() {
        let (registry, pool, mut rx) = test_registry().await;
        assert!(registry.register(test_probe("overall", &[])).await);
        let clash = MostSevereAggregator::new("overall").unwrap();
        assert!(!registry.register_aggregator(Arc::new(clash)).await);
        assert!(!registry.is_aggregator_registered("overall").await);

        assert!(
            registry
                .register_aggregator(Arc::new(MostSevereAggregator::default()))
                .await
        );
        drain(&mut rx).await;
        assert!(!registry.register(test_probe("most_severe", &[])).await);
        assert!(!registry.is_registered("most_severe").await);
        assert!(drain(&mut rx).await.is_empty());

        // Freed names can be reused by the other kind.
        registry.unregister("overall").await;
        let reuse = MostSevereAggregator::new("overall").unwrap();
        assert!(registry.register_aggregator(Arc::new(reuse)).await);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn aggregators_are_silent() {
        let (registry, pool, mut rx) = test_registry().await;
        assert!(
            registry
                .register_aggregator(Arc::new(MostSevereAggregator::default()))
                .await
        );
        assert!(
            !registry
                .register_aggregator(Arc::new(MostSevereAggregator::default()))
                .await
        );
        registry
            .register_aggregator(Arc::new(WeightedAggregator::default()))
            .await;

        assert!(registry.is_aggregator_registered("most_severe").await);
        let names: Vec<String> = registry
            .all_aggregators()
            .await
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        assert_eq!(names, vec!["most_severe", "weighted_scoring"]);

        assert!(registry.get_aggregator("weighted_scoring").await.is_some());
        assert!(
            registry
                .unregister_aggregator("weighted_scoring")
                .await
                .is_some()
        );
        registry.clear_aggregators().await;
        assert!(registry.all_aggregators().await.is_empty());

        assert!(drain(&mut rx).await.is_empty());
        pool.shutdown().await;
    }
}
