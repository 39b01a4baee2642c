use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::warn;

/// Subscriber callback invoked with each published payload.
pub type SubscriberFn = Arc<dyn Fn(&Value) + Send + Sync>;

/// Opaque handle identifying one subscription on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Process-wide named-channel publish/subscribe store.
///
/// Channels form a fixed-but-extensible vocabulary: publishing on a channel
/// that was never registered logs a warning and dispatches nothing, so a typo
/// in a channel name cannot silently break event delivery or crash the
/// publisher. There is no buffering or replay; a subscriber registered after
/// an emission never observes it.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

struct BusInner {
    known: HashSet<String>,
    subscribers: HashMap<String, Vec<(SubscriptionId, SubscriberFn)>>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                known: HashSet::new(),
                subscribers: HashMap::new(),
                next_id: 0,
            })),
        }
    }

    /// Add `name` to the known-channel vocabulary. Idempotent.
    pub fn register_channel(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.known.insert(name.to_string());
    }

    /// Known channel names, sorted.
    pub fn list_channels(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut names: Vec<String> = inner.known.iter().cloned().collect();
        names.sort();
        names
    }

    /// Subscribe `cb` to `channel`. Dispatch order equals subscription order.
    ///
    /// Subscribing does not require the channel to be registered yet; the
    /// callback only ever fires for emissions on a registered channel.
    pub fn on(&self, channel: &str, cb: SubscriberFn) -> Subscription {
        let mut inner = self.inner.lock().unwrap();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner
            .subscribers
            .entry(channel.to_string())
            .or_default()
            .push((id, cb));
        Subscription {
            bus: self.clone(),
            channel: channel.to_string(),
            id,
        }
    }

    /// Remove the subscription with `id` from `channel`. No-op if absent.
    pub fn off(&self, channel: &str, id: SubscriptionId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(subs) = inner.subscribers.get_mut(channel) {
            if let Some(idx) = subs.iter().position(|(sid, _)| *sid == id) {
                subs.remove(idx);
            }
        }
    }

    /// Publish `payload` on `channel`.
    ///
    /// Unknown channel: warn and drop, the caller is unaffected. Each
    /// subscriber invocation is isolated, so one panicking subscriber cannot
    /// block delivery to the rest.
    pub fn emit(&self, channel: &str, payload: Value) {
        let callbacks: Vec<SubscriberFn> = {
            let inner = self.inner.lock().unwrap();
            if !inner.known.contains(channel) {
                warn!("emit on unregistered channel {channel:?}, dropping event");
                return;
            }
            inner
                .subscribers
                .get(channel)
                .map(|subs| subs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default()
        };

        // Lock released before running callbacks, so a subscriber may call
        // back into the bus (subscribe, publish) without deadlocking.
        for cb in callbacks {
            if catch_unwind(AssertUnwindSafe(|| cb(&payload))).is_err() {
                warn!("subscriber on channel {channel:?} panicked, continuing dispatch");
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`EventBus::on`]; the unsubscribe capability.
#[must_use = "dropping a Subscription without unsubscribing leaves the callback registered"]
pub struct Subscription {
    bus: EventBus,
    channel: String,
    id: SubscriptionId,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Remove this subscription from the bus.
    pub fn unsubscribe(self) {
        self.bus.off(&self.channel, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_cb(hits: Arc<Mutex<Vec<Value>>>) -> SubscriberFn {
        Arc::new(move |v| hits.lock().unwrap().push(v.clone()))
    }

    #[test]
    fn emit_reaches_subscriber_with_payload() {
        let bus = EventBus::new();
        bus.register_channel("x");
        let hits = Arc::new(Mutex::new(Vec::new()));
        let _sub = bus.on("x", counting_cb(hits.clone()));

        bus.emit("x", json!(42));

        let got = hits.lock().unwrap();
        assert_eq!(got.as_slice(), &[json!(42)]);
    }

    #[test]
    fn unknown_channel_emit_is_a_silent_drop() {
        let bus = EventBus::new();
        bus.register_channel("x");
        let hits = Arc::new(Mutex::new(Vec::new()));
        let _sub = bus.on("x", counting_cb(hits.clone()));

        // "y" was never registered: no dispatch anywhere, no panic.
        bus.emit("y", json!(1));

        assert!(hits.lock().unwrap().is_empty());
    }

    #[test]
    fn dispatch_order_equals_subscription_order() {
        let bus = EventBus::new();
        bus.register_channel("x");
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let order = order.clone();
            let _sub = bus.on(
                "x",
                Arc::new(move |_| order.lock().unwrap().push(tag)),
            );
        }

        bus.emit("x", json!(null));
        assert_eq!(order.lock().unwrap().as_slice(), &["a", "b", "c"]);
    }

    #[test]
    fn unsubscribe_stops_delivery_and_is_idempotent() {
        let bus = EventBus::new();
        bus.register_channel("x");
        let hits = Arc::new(Mutex::new(Vec::new()));
        let sub = bus.on("x", counting_cb(hits.clone()));
        let id = sub.id();

        bus.emit("x", json!(1));
        sub.unsubscribe();
        bus.emit("x", json!(2));
        // Second removal of the same id is a no-op.
        bus.off("x", id);

        assert_eq!(hits.lock().unwrap().len(), 1);
    }

    #[test]
    fn no_replay_for_late_subscribers() {
        let bus = EventBus::new();
        bus.register_channel("x");
        bus.emit("x", json!("early"));

        let hits = Arc::new(Mutex::new(Vec::new()));
        let _sub = bus.on("x", counting_cb(hits.clone()));
        assert!(hits.lock().unwrap().is_empty());
    }

    #[test]
    fn panicking_subscriber_does_not_block_the_rest() {
        let bus = EventBus::new();
        bus.register_channel("x");
        let survived = Arc::new(AtomicUsize::new(0));

        let _first = bus.on("x", Arc::new(|_| panic!("boom")));
        let survived2 = survived.clone();
        let _second = bus.on(
            "x",
            Arc::new(move |_| {
                survived2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        bus.emit("x", json!(null));
        assert_eq!(survived.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn list_channels_sorted() {
        let bus = EventBus::new();
        bus.register_channel("b");
        bus.register_channel("a");
        bus.register_channel("a"); // idempotent
        assert_eq!(bus.list_channels(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn reentrant_publish_from_subscriber_does_not_deadlock() {
        let bus = EventBus::new();
        bus.register_channel("first");
        bus.register_channel("second");

        let hits = Arc::new(Mutex::new(Vec::new()));
        let _tail = bus.on("second", counting_cb(hits.clone()));

        let relay = bus.clone();
        let _head = bus.on(
            "first",
            Arc::new(move |v| relay.emit("second", v.clone())),
        );

        bus.emit("first", json!(7));
        assert_eq!(hits.lock().unwrap().as_slice(), &[json!(7)]);
    }
}
