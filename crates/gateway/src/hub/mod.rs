//! Device state hub: latest-state store plus fan-out to stream subscribers.
//!
//! Store mutation, fan-out, subscribe and unsubscribe all serialize on one
//! lock. The lock is never held across an `.await`; enqueueing into an outbox
//! never waits for its consumer.

mod outbox;
mod session;
mod store;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use shared::{DeviceId, DeviceState, Snapshot, UpdateEvent};
use uuid::Uuid;

pub use outbox::{Delivery, Outbox, Subscription};
pub use session::{SessionFrame, StreamSession};
pub use store::StateStore;

/// Hub errors.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("subscriber limit reached ({0})")]
    TooManySubscribers(usize),
}

struct HubInner {
    store: StateStore,
    subscribers: HashMap<Uuid, Weak<Outbox>>,
}

/// Shared hub. Construct once and pass around as `Arc<Hub>`.
pub struct Hub {
    inner: Mutex<HubInner>,
    max_subscribers: Option<usize>,
}

impl Hub {
    pub fn new(max_subscribers: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(HubInner {
                store: StateStore::new(),
                subscribers: HashMap::new(),
            }),
            max_subscribers,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one message to the store and offer it to every live outbox.
    pub fn ingest(&self, id: DeviceId, kind: &str, payload: serde_json::Value) -> DeviceState {
        let mut inner = self.lock();
        let state = inner.store.apply(&id, kind, payload.clone());
        let event = UpdateEvent {
            identity: id,
            kind: kind.to_string(),
            payload,
        };

        let mut gone = Vec::new();
        for (sub_id, outbox) in &inner.subscribers {
            let Some(outbox) = outbox.upgrade() else {
                gone.push(*sub_id);
                continue;
            };
            match outbox.offer(event.clone()) {
                Delivery::Enqueued => {}
                Delivery::EvictedOldest => {
                    tracing::debug!(subscription = %sub_id, "outbox full, evicted oldest event");
                }
                Delivery::Dropped => {
                    tracing::debug!(subscription = %sub_id, "outbox full, event dropped");
                }
            }
        }
        for sub_id in gone {
            inner.subscribers.remove(&sub_id);
        }
        state
    }

    /// Register a new outbox of `capacity` events.
    pub fn subscribe(self: &Arc<Self>, capacity: usize) -> Result<Subscription, HubError> {
        let mut inner = self.lock();
        self.register(&mut inner, capacity)
    }

    /// Register an outbox and copy the store in the same critical section, so
    /// every later update reaches the outbox and none is already in the snapshot.
    pub fn subscribe_with_snapshot(
        self: &Arc<Self>,
        capacity: usize,
    ) -> Result<(Subscription, Snapshot), HubError> {
        let mut inner = self.lock();
        let subscription = self.register(&mut inner, capacity)?;
        Ok((subscription, inner.store.snapshot()))
    }

    fn register(
        self: &Arc<Self>,
        inner: &mut HubInner,
        capacity: usize,
    ) -> Result<Subscription, HubError> {
        if let Some(max) = self.max_subscribers {
            inner.subscribers.retain(|_, outbox| outbox.strong_count() > 0);
            if inner.subscribers.len() >= max {
                return Err(HubError::TooManySubscribers(max));
            }
        }
        let id = Uuid::new_v4();
        let outbox = Arc::new(Outbox::new(capacity));
        inner.subscribers.insert(id, Arc::downgrade(&outbox));
        tracing::debug!(subscription = %id, capacity, "subscribed");
        Ok(Subscription::new(id, outbox, Arc::downgrade(self)))
    }

    /// Remove a subscription. Unknown or already removed ids are ignored.
    pub fn unsubscribe(&self, id: Uuid) {
        if self.lock().subscribers.remove(&id).is_some() {
            tracing::debug!(subscription = %id, "unsubscribed");
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.lock().store.snapshot()
    }

    pub fn device(&self, id: &DeviceId) -> Option<DeviceState> {
        self.lock().store.get(id).cloned()
    }

    pub fn device_count(&self) -> usize {
        self.lock().store.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Drop devices that have not reported for longer than `max_age`.
    pub fn evict_stale(&self, max_age: Duration) -> Vec<DeviceId> {
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| chrono::Utc::now().checked_sub_signed(age))
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);
        self.lock().store.evict_stale(cutoff)
    }
}

/// Periodically evict stale devices. Runs until the task is aborted.
pub async fn run_stale_sweeper(hub: Arc<Hub>, stale_after: Duration) {
    let period = (stale_after / 2).max(Duration::from_secs(1));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let evicted = hub.evict_stale(stale_after);
        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), "evicted stale devices");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn acme() -> DeviceId {
        DeviceId::new("acme", "1")
    }

    fn drain(sub: &Subscription) -> Vec<UpdateEvent> {
        std::iter::from_fn(|| sub.try_recv()).collect()
    }

    #[test]
    fn fan_out_reaches_every_live_subscriber() {
        let hub = Arc::new(Hub::new(None));
        let a = hub.subscribe(10).unwrap();
        let b = hub.subscribe(10).unwrap();

        hub.ingest(acme(), "state", json!({"battery": 87}));
        hub.ingest(DeviceId::new("kuka", "99"), "state", json!({"battery": 50}));

        for sub in [&a, &b] {
            let events = drain(sub);
            assert_eq!(events.len(), 2);
            assert_eq!(events[0].identity, acme());
            assert_eq!(events[1].identity.manufacturer, "kuka");
        }
    }

    #[test]
    fn late_subscriber_sees_only_later_events() {
        let hub = Arc::new(Hub::new(None));
        hub.ingest(acme(), "state", json!({"n": 1}));
        let sub = hub.subscribe(10).unwrap();
        hub.ingest(acme(), "state", json!({"n": 2}));

        let events = drain(&sub);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["n"], 2);
    }

    #[test]
    fn slow_subscriber_keeps_newest_events_without_affecting_others() {
        let hub = Arc::new(Hub::new(None));
        let slow = hub.subscribe(2).unwrap();
        let fast = hub.subscribe(10).unwrap();

        for n in 0..3 {
            hub.ingest(acme(), "state", json!({ "n": n }));
        }

        let slow_ns: Vec<_> = drain(&slow).iter().map(|e| e.payload["n"].clone()).collect();
        assert_eq!(slow_ns, vec![json!(1), json!(2)]);
        assert_eq!(drain(&fast).len(), 3);
    }

    #[test]
    fn unsubscribe_is_idempotent_and_stops_delivery() {
        let hub = Arc::new(Hub::new(None));
        let sub = hub.subscribe(10).unwrap();
        assert_eq!(hub.subscriber_count(), 1);

        hub.unsubscribe(sub.id());
        hub.unsubscribe(sub.id());
        hub.unsubscribe(Uuid::new_v4());
        assert_eq!(hub.subscriber_count(), 0);

        hub.ingest(acme(), "state", json!({}));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let hub = Arc::new(Hub::new(None));
        let sub = hub.subscribe(10).unwrap();
        let id = sub.id();
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
        // explicit unsubscribe after drop is a no-op
        hub.unsubscribe(id);
    }

    #[test]
    fn subscriber_cap_is_enforced_and_frees_on_drop() {
        let hub = Arc::new(Hub::new(Some(1)));
        let first = hub.subscribe(10).unwrap();
        assert!(matches!(
            hub.subscribe(10),
            Err(HubError::TooManySubscribers(1))
        ));
        drop(first);
        assert!(hub.subscribe(10).is_ok());
    }

    #[test]
    fn subscribe_with_snapshot_has_no_gap_or_overlap() {
        let hub = Arc::new(Hub::new(None));
        hub.ingest(acme(), "state", json!({"battery": 87}));
        let (sub, snapshot) = hub.subscribe_with_snapshot(10).unwrap();
        hub.ingest(acme(), "state", json!({"battery": 86}));

        assert_eq!(snapshot["acme/1"].payload["battery"], 87);
        let events = drain(&sub);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["battery"], 86);
    }

    #[test]
    fn concurrent_snapshots_match_a_serial_history() {
        let hub = Arc::new(Hub::new(None));
        let first = DeviceId::new("acme", "first");
        let second = DeviceId::new("acme", "second");
        const ROUNDS: u64 = 2000;

        // each round writes `first` then `second` with the same n
        let writer = {
            let hub = hub.clone();
            let (first, second) = (first.clone(), second.clone());
            std::thread::spawn(move || {
                for n in 0..ROUNDS {
                    hub.ingest(first.clone(), "state", json!({ "n": n }));
                    hub.ingest(second.clone(), "state", json!({ "n": n }));
                }
            })
        };

        let n_of = |snapshot: &Snapshot, id: &DeviceId| {
            snapshot
                .get(&id.key())
                .map(|s| s.payload["n"].as_u64().unwrap())
        };
        let mut last = (None, None);
        while !writer.is_finished() {
            let snapshot = hub.snapshot();
            let (a, b) = (n_of(&snapshot, &first), n_of(&snapshot, &second));
            match (a, b) {
                (Some(a), Some(b)) => assert!(a == b || a == b + 1, "first={a} second={b}"),
                (None, Some(b)) => panic!("second={b} visible before first"),
                _ => {}
            }
            assert!(a >= last.0 && b >= last.1, "snapshot went backwards");
            last = (a, b);
        }
        writer.join().unwrap();

        let snapshot = hub.snapshot();
        assert_eq!(n_of(&snapshot, &first), Some(ROUNDS - 1));
        assert_eq!(n_of(&snapshot, &second), Some(ROUNDS - 1));
    }

    #[test]
    fn concurrent_unsubscribe_sees_whole_events_only() {
        let hub = Arc::new(Hub::new(None));
        let sub = hub.subscribe(1000).unwrap();
        let writer = {
            let hub = hub.clone();
            std::thread::spawn(move || {
                for n in 0..500 {
                    hub.ingest(acme(), "state", json!({ "n": n }));
                }
            })
        };
        std::thread::yield_now();
        hub.unsubscribe(sub.id());
        writer.join().unwrap();

        // whatever arrived is a contiguous prefix of the ingest sequence
        let ns: Vec<u64> = drain(&sub)
            .iter()
            .map(|e| e.payload["n"].as_u64().unwrap())
            .collect();
        assert!(ns.iter().enumerate().all(|(i, n)| *n == i as u64));
    }

    #[test]
    fn evict_stale_with_zero_age_clears_store() {
        let hub = Hub::new(None);
        hub.ingest(acme(), "state", json!({}));
        std::thread::sleep(Duration::from_millis(5));
        let evicted = hub.evict_stale(Duration::ZERO);
        assert_eq!(evicted, vec![acme()]);
        assert_eq!(hub.device_count(), 0);
        assert!(hub.device(&acme()).is_none());
    }
}
