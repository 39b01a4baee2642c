use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::instrument::ConnectionState;
use crate::matcher::UrlFilter;

/// Called with every state snapshot and pulse for a matched connection.
pub type StateCallback = Arc<dyn Fn(&ConnectionState) + Send + Sync>;
/// Called with every inbound message text, never throttled.
pub type MessageCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// One consumer's interest in observed connections: a URL filter plus
/// callbacks and a pulse throttle window.
#[derive(Clone)]
pub struct DetectorConfig {
    pub id: String,
    pub filter: UrlFilter,
    pub throttle: Duration,
    pub on_state: Option<StateCallback>,
    pub on_message: Option<MessageCallback>,
}

impl DetectorConfig {
    pub fn new(id: impl Into<String>, filter: UrlFilter) -> Self {
        Self {
            id: id.into(),
            filter,
            throttle: Duration::ZERO,
            on_state: None,
            on_message: None,
        }
    }

    /// Minimum spacing between pulse state emissions for this detector.
    pub fn throttle_ms(mut self, ms: u64) -> Self {
        self.throttle = Duration::from_millis(ms);
        self
    }

    pub fn on_state(mut self, cb: impl Fn(&ConnectionState) + Send + Sync + 'static) -> Self {
        self.on_state = Some(Arc::new(cb));
        self
    }

    pub fn on_message(mut self, cb: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(cb));
        self
    }
}

/// A registered detector. Live instrumentation tasks hold an `Arc` to their
/// entry and stop emitting once it is deactivated, which is how unregistering
/// (or re-registering the same id) cuts off notifications mid-connection
/// without touching the underlying socket.
pub struct DetectorEntry {
    pub config: DetectorConfig,
    active: AtomicBool,
}

impl DetectorEntry {
    fn new(config: DetectorConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            active: AtomicBool::new(true),
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Registry transition reported to the caller so it can install or remove
/// the connector-slot interception. The registry itself is the single source
/// of truth for whether interception is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a registry transition decides whether interception is (un)installed"]
pub enum Transition {
    /// Registry went from empty to non-empty: interception must be installed.
    Install,
    /// Registry became empty: interception must be removed.
    Uninstall,
    /// Occupancy did not cross the empty boundary.
    None,
}

/// Mapping from detector id to its configuration.
///
/// Clones share the same state.
#[derive(Clone, Default)]
pub struct DetectorRegistry {
    inner: Arc<Mutex<HashMap<String, Arc<DetectorEntry>>>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the detector with `config.id`.
    ///
    /// Replacement is atomic: the prior entry is deactivated in the same
    /// registry turn the new one becomes visible.
    pub fn register(&self, config: DetectorConfig) -> Transition {
        let mut map = self.inner.lock().unwrap();
        let was_empty = map.is_empty();
        debug!("registering detector {:?}", config.id);
        if let Some(previous) = map.insert(config.id.clone(), DetectorEntry::new(config)) {
            previous.deactivate();
        }
        if was_empty {
            Transition::Install
        } else {
            Transition::None
        }
    }

    /// Remove the detector with `id`; a no-op when absent. Deactivation also
    /// discards the detector's throttle bookkeeping, which lives in its
    /// per-connection tasks.
    pub fn unregister(&self, id: &str) -> Transition {
        let mut map = self.inner.lock().unwrap();
        match map.remove(id) {
            Some(entry) => {
                entry.deactivate();
                debug!("unregistered detector {id:?}");
                if map.is_empty() {
                    Transition::Uninstall
                } else {
                    Transition::None
                }
            }
            None => Transition::None,
        }
    }

    /// Active entries whose filter matches `url`.
    pub fn matching(&self, url: &str) -> Vec<Arc<DetectorEntry>> {
        let map = self.inner.lock().unwrap();
        map.values()
            .filter(|e| e.config.filter.matches(url))
            .cloned()
            .collect()
    }

    /// Registered ids, sorted.
    pub fn list(&self) -> Vec<String> {
        let map = self.inner.lock().unwrap();
        let mut ids: Vec<String> = map.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(id: &str, fragment: &str) -> DetectorConfig {
        DetectorConfig::new(id, UrlFilter::contains(fragment))
    }

    #[test]
    fn first_registration_installs_last_removal_uninstalls() {
        let reg = DetectorRegistry::new();
        assert_eq!(reg.register(config("a", "x")), Transition::Install);
        assert_eq!(reg.register(config("b", "y")), Transition::None);
        assert_eq!(reg.unregister("a"), Transition::None);
        assert_eq!(reg.unregister("b"), Transition::Uninstall);
        assert!(reg.is_empty());
    }

    #[test]
    fn unregister_absent_id_is_a_no_op() {
        let reg = DetectorRegistry::new();
        assert_eq!(reg.unregister("ghost"), Transition::None);
        let _ = reg.register(config("a", "x"));
        assert_eq!(reg.unregister("ghost"), Transition::None);
        assert_eq!(reg.list(), vec!["a".to_string()]);
    }

    #[test]
    fn reregistering_same_id_replaces_and_deactivates_prior() {
        let reg = DetectorRegistry::new();
        let _ = reg.register(config("feed", "old"));
        let old = reg.matching("wss://x/old").pop().expect("old entry");

        // Same id again: no install transition, old entry goes dead.
        assert_eq!(reg.register(config("feed", "new")), Transition::None);
        assert!(!old.is_active());
        assert!(reg.matching("wss://x/old").is_empty());
        assert_eq!(reg.matching("wss://x/new").len(), 1);
    }

    #[test]
    fn matching_respects_filters() {
        let reg = DetectorRegistry::new();
        let _ = reg.register(config("stream", "stream"));
        let _ = reg.register(config("book", "book"));
        let _ = reg.register(DetectorConfig::new("blank", UrlFilter::default()));

        let hits = reg.matching("wss://x/stream?a=1");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].config.id, "stream");
        // Fail-closed: the blank detector matches nothing.
        assert!(reg.matching("").is_empty());
    }

    #[test]
    fn unregister_deactivates_live_entry() {
        let reg = DetectorRegistry::new();
        let _ = reg.register(config("a", "x"));
        let entry = reg.matching("wss://x").pop().unwrap();
        assert!(entry.is_active());
        let _ = reg.unregister("a");
        assert!(!entry.is_active());
    }
}
