//! EventBus: the listener table and event dispatch.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use vital_core::error::panic_message;
use vital_core::{EventKind, Filter, HealthEvent, ListenerRef};
use vitalgrid_scheduler::SharedScheduler;

/// Listener identity: the address of its shared allocation.
type ListenerId = usize;

fn listener_id(listener: &ListenerRef) -> ListenerId {
    Arc::as_ptr(listener) as *const () as usize
}

struct Subscription {
    listener: ListenerRef,
    filter: Filter,
}

/// Per-kind listener table with asynchronous delivery.
#[derive(Clone)]
pub struct EventBus {
    pool: SharedScheduler,
    /// kind → listener id → subscription.
    table: Arc<RwLock<HashMap<EventKind, HashMap<ListenerId, Subscription>>>>,
}

impl EventBus {
    pub fn new(pool: SharedScheduler) -> Self {
        Self {
            pool,
            table: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    // ── Subscription ──────────────────────────────────────────────

    /// Subscribe to every event.
    pub async fn add_listener(&self, listener: ListenerRef) {
        self.add_filtered_listener(listener, Filter::all(), [EventKind::Any]).await;
    }

    /// Subscribe to every event that passes `filter`.
    pub async fn add_listener_with_filter(&self, listener: ListenerRef, filter: Filter) {
        self.add_filtered_listener(listener, filter, [EventKind::Any]).await;
    }

    pub async fn add_listener_for(&self, listener: ListenerRef, kind: EventKind) {
        self.add_filtered_listener(listener, Filter::all(), [kind]).await;
    }

    pub async fn add_listener_for_kinds<I>(&self, listener: ListenerRef, kinds: I)
    where
        I: IntoIterator<Item = EventKind>,
    {
        self.add_filtered_listener(listener, Filter::all(), kinds).await;
    }

    /// Subscribe `listener` with `filter` to each of `kinds`. A listener that
    /// is already subscribed to a kind keeps its existing filter for it.
    pub async fn add_filtered_listener<I>(&self, listener: ListenerRef, filter: Filter, kinds: I)
    where
        I: IntoIterator<Item = EventKind>,
    {
        let id = listener_id(&listener);
        let mut table = self.table.write().await;
        for kind in kinds {
            let subscriptions = table.entry(kind).or_default();
            if subscriptions.contains_key(&id) {
                debug!(listener = listener.label(), %kind, "listener already subscribed");
                continue;
            }
            subscriptions.insert(
                id,
                Subscription {
                    listener: Arc::clone(&listener),
                    filter: filter.clone(),
                },
            );
            debug!(listener = listener.label(), %kind, ?filter, "listener added");
        }
    }

    /// Remove `listener` from every kind. Returns whether it was subscribed
    /// anywhere.
    pub async fn remove_listener(&self, listener: &ListenerRef) -> bool {
        let id = listener_id(listener);
        let mut table = self.table.write().await;
        let mut removed = false;
        for subscriptions in table.values_mut() {
            removed |= subscriptions.remove(&id).is_some();
        }
        table.retain(|_, subscriptions| !subscriptions.is_empty());

        if removed {
            debug!(listener = listener.label(), "listener removed from all kinds");
        } else {
            warn!(listener = listener.label(), "attempted to remove unregistered listener");
        }
        removed
    }

    pub async fn remove_listener_for(&self, listener: &ListenerRef, kind: EventKind) -> bool {
        let id = listener_id(listener);
        let mut table = self.table.write().await;
        let removed = match table.get_mut(&kind) {
            Some(subscriptions) => {
                let removed = subscriptions.remove(&id).is_some();
                if subscriptions.is_empty() {
                    table.remove(&kind);
                }
                removed
            }
            None => false,
        };

        if removed {
            debug!(listener = listener.label(), %kind, "listener removed");
        } else {
            warn!(listener = listener.label(), %kind, "attempted to remove unregistered listener");
        }
        removed
    }

    pub async fn remove_listener_for_kinds<I>(&self, listener: &ListenerRef, kinds: I)
    where
        I: IntoIterator<Item = EventKind>,
    {
        for kind in kinds {
            self.remove_listener_for(listener, kind).await;
        }
    }

    /// Every subscribed listener, each once.
    pub async fn listeners(&self) -> Vec<ListenerRef> {
        let table = self.table.read().await;
        let mut seen = HashSet::new();
        table
            .values()
            .flat_map(|subscriptions| subscriptions.iter())
            .filter(|(id, _)| seen.insert(**id))
            .map(|(_, sub)| Arc::clone(&sub.listener))
            .collect()
    }

    /// Listeners subscribed to exactly `kind`. Wildcard subscribers are only
    /// listed for `EventKind::Any`.
    pub async fn listeners_for(&self, kind: EventKind) -> Vec<ListenerRef> {
        let table = self.table.read().await;
        table
            .get(&kind)
            .map(|subscriptions| {
                subscriptions
                    .values()
                    .map(|sub| Arc::clone(&sub.listener))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn is_registered(&self, listener: &ListenerRef) -> bool {
        let id = listener_id(listener);
        let table = self.table.read().await;
        table
            .values()
            .any(|subscriptions| subscriptions.contains_key(&id))
    }

    pub async fn is_registered_for(&self, listener: &ListenerRef, kind: EventKind) -> bool {
        let id = listener_id(listener);
        let table = self.table.read().await;
        table
            .get(&kind)
            .is_some_and(|subscriptions| subscriptions.contains_key(&id))
    }

    pub async fn clear(&self) {
        self.table.write().await.clear();
        debug!("all listeners cleared");
    }

    // ── Dispatch ──────────────────────────────────────────────────

    /// Notify every matching listener. Returns without waiting for delivery.
    pub async fn publish(&self, event: HealthEvent) {
        let targets = {
            let table = self.table.read().await;
            if table.is_empty() {
                return;
            }

            let context = event.filter_context();
            let mut notified = HashSet::new();
            let mut targets = Vec::new();
            for kind in [event.kind(), EventKind::Any] {
                let Some(subscriptions) = table.get(&kind) else {
                    continue;
                };
                for (id, sub) in subscriptions {
                    if notified.contains(id) || !sub.filter.matches(&context) {
                        continue;
                    }
                    notified.insert(*id);
                    targets.push(Arc::clone(&sub.listener));
                }
            }
            targets
        };

        if targets.is_empty() {
            return;
        }
        let event = Arc::new(event);
        for listener in targets {
            self.notify(listener, Arc::clone(&event));
        }
    }

    fn notify(&self, listener: ListenerRef, event: Arc<HealthEvent>) {
        let kind = event.kind();
        let submitted = self.pool.execute(async move {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| listener.handle(&event)));
            if let Err(payload) = outcome {
                error!(
                    listener = listener.label(),
                    %kind,
                    panic = %panic_message(payload.as_ref()),
                    "listener panicked"
                );
            }
        });
        if let Err(e) = submitted {
            warn!(%kind, error = %e, "event dropped, scheduler not accepting work");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use vital_core::{
        CheckResult, HealthListener, HealthStatus, ProbeRef, SchedulerConfig, probe_fn,
    };

    use super::*;

    struct ChannelListener {
        tx: mpsc::UnboundedSender<HealthEvent>,
    }

    impl HealthListener for ChannelListener {
        fn handle(&self, event: &HealthEvent) {
            let _ = self.tx.send(event.clone());
        }
    }

    struct PanickingListener;

    impl HealthListener for PanickingListener {
        fn on_all_cleared(&self) {
            panic!("listener bug");
        }
    }

    fn recording_listener() -> (ListenerRef, mpsc::UnboundedReceiver<HealthEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(ChannelListener { tx }), rx)
    }

    fn test_bus() -> (EventBus, SharedScheduler) {
        let pool = SharedScheduler::new(
            SchedulerConfig::default()
                .with_pool_size(2)
                .with_shutdown_timeout(Duration::from_secs(2)),
        )
        .unwrap();
        (EventBus::new(pool.clone()), pool)
    }

    fn test_probe(name: &str) -> ProbeRef {
        probe_fn(name, ["test"], || async { Ok(CheckResult::healthy()) }).unwrap()
    }

    fn checked(name: &str, status: HealthStatus) -> HealthEvent {
        let probe = test_probe(name);
        HealthEvent::Checked {
            name: name.to_string(),
            tags: probe.tags(),
            probe,
            result: CheckResult::of(status),
        }
    }

    fn registered(name: &str) -> HealthEvent {
        let probe = test_probe(name);
        HealthEvent::Registered {
            name: name.to_string(),
            tags: probe.tags(),
            probe,
        }
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<HealthEvent>) -> HealthEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event not delivered")
            .expect("channel closed")
    }

    async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<HealthEvent>) {
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err(), "unexpected event delivered");
    }

    #[tokio::test]
    async fn wildcard_listener_sees_every_kind() {
        let (bus, pool) = test_bus();
        let (listener, mut rx) = recording_listener();
        bus.add_listener(listener).await;

        bus.publish(registered("db")).await;
        assert_eq!(next(&mut rx).await.kind(), EventKind::Registered);
        bus.publish(HealthEvent::AllCleared).await;
        assert_eq!(next(&mut rx).await.kind(), EventKind::AllCleared);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn kind_subscription_is_exact() {
        let (bus, pool) = test_bus();
        let (listener, mut rx) = recording_listener();
        bus.add_listener_for(listener, EventKind::Checked).await;

        bus.publish(registered("db")).await;
        bus.publish(checked("db", HealthStatus::Healthy)).await;

        assert_eq!(next(&mut rx).await.kind(), EventKind::Checked);
        assert_quiet(&mut rx).await;
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn filter_gates_delivery() {
        let (bus, pool) = test_bus();
        let (listener, mut rx) = recording_listener();
        bus.add_listener_with_filter(listener, Filter::by_name("db")).await;

        bus.publish(checked("cache", HealthStatus::Healthy)).await;
        bus.publish(checked("db", HealthStatus::Degraded)).await;

        let event = next(&mut rx).await;
        assert_eq!(event.name(), Some("db"));
        assert_quiet(&mut rx).await;
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn exact_and_wildcard_deliver_once() {
        let (bus, pool) = test_bus();
        let (listener, mut rx) = recording_listener();
        bus.add_listener_for(Arc::clone(&listener), EventKind::Checked).await;
        bus.add_listener(Arc::clone(&listener)).await;

        bus.publish(checked("db", HealthStatus::Healthy)).await;
        next(&mut rx).await;
        assert_quiet(&mut rx).await;
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn wildcard_filter_applies_when_exact_filter_rejects() {
        let (bus, pool) = test_bus();
        let (listener, mut rx) = recording_listener();
        bus.add_filtered_listener(
            Arc::clone(&listener),
            Filter::by_name("cache"),
            [EventKind::Checked],
        )
        .await;
        bus.add_listener_with_filter(listener, Filter::by_status(HealthStatus::Critical)).await;

        bus.publish(checked("db", HealthStatus::Critical)).await;
        assert_eq!(next(&mut rx).await.name(), Some("db"));
        assert_quiet(&mut rx).await;
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_subscription_keeps_first_filter() {
        let (bus, pool) = test_bus();
        let (listener, mut rx) = recording_listener();
        bus.add_filtered_listener(
            Arc::clone(&listener),
            Filter::by_name("db"),
            [EventKind::Checked],
        )
        .await;
        bus.add_listener_for(Arc::clone(&listener), EventKind::Checked).await;
        assert_eq!(bus.listeners_for(EventKind::Checked).await.len(), 1);

        bus.publish(checked("cache", HealthStatus::Healthy)).await;
        assert_quiet(&mut rx).await;
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn registration_queries_and_removal() {
        let (bus, pool) = test_bus();
        let (first, _rx1) = recording_listener();
        let (second, _rx2) = recording_listener();

        bus.add_listener_for_kinds(
            Arc::clone(&first),
            [EventKind::Checked, EventKind::Failed],
        )
        .await;
        bus.add_listener(Arc::clone(&second)).await;

        assert!(bus.is_registered(&first).await);
        assert!(bus.is_registered_for(&first, EventKind::Failed).await);
        assert!(!bus.is_registered_for(&first, EventKind::Any).await);
        assert_eq!(bus.listeners().await.len(), 2);
        assert_eq!(bus.listeners_for(EventKind::Any).await.len(), 1);

        assert!(bus.remove_listener_for(&first, EventKind::Failed).await);
        assert!(!bus.remove_listener_for(&first, EventKind::Failed).await);
        assert!(bus.is_registered_for(&first, EventKind::Checked).await);

        bus.remove_listener_for_kinds(&first, [EventKind::Checked]).await;
        assert!(!bus.is_registered(&first).await);

        assert!(bus.remove_listener(&second).await);
        assert!(!bus.remove_listener(&second).await);

        bus.add_listener(Arc::clone(&second)).await;
        bus.clear().await;
        assert!(bus.listeners().await.is_empty());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn panicking_listener_does_not_affect_others() {
        let (bus, pool) = test_bus();
        let (listener, mut rx) = recording_listener();
        bus.add_listener(Arc::new(PanickingListener)).await;
        bus.add_listener(listener).await;

        bus.publish(HealthEvent::AllCleared).await;
        assert_eq!(next(&mut rx).await.kind(), EventKind::AllCleared);

        bus.publish(registered("db")).await;
        assert_eq!(next(&mut rx).await.kind(), EventKind::Registered);
        assert!(pool.is_running());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn publish_after_shutdown_is_dropped() {
        let (bus, pool) = test_bus();
        let (listener, mut rx) = recording_listener();
        bus.add_listener(listener).await;
        pool.shutdown().await;

        bus.publish(HealthEvent::AllCleared).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn aggregated_events_have_no_tags() {
        let (bus, pool) = test_bus();
        let (listener, mut rx) = recording_listener();
        bus.add_listener_with_filter(listener, Filter::by_tag("test")).await;

        bus.publish(HealthEvent::Aggregated {
            aggregator: "overall".to_string(),
            result: CheckResult::healthy(),
        })
        .await;
        assert_quiet(&mut rx).await;

        bus.publish(checked("db", HealthStatus::Healthy)).await;
        assert_eq!(next(&mut rx).await.tags(), &BTreeSet::from(["test".to_string()]));
        pool.shutdown().await;
    }
}
