use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde_json::Value;

use crate::KNOWN_CHANNELS;
use crate::bus::{EventBus, Subscription};
use crate::detector::{DetectorConfig, DetectorRegistry, Transition};
use crate::intercept::ConnectorSlot;
use crate::socket::{Socket, SocketFactory, WsFactory};

/// Tunables for the observation side of a hub.
#[derive(Debug, Clone, Copy)]
pub struct HubSettings {
    /// Cadence of periodic connection-state snapshots.
    pub snapshot_interval: Duration,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            snapshot_interval: Duration::from_millis(1000),
        }
    }
}

/// One interception-and-distribution domain: a typed event bus, a detector
/// registry, and the connector slot the application constructs sockets
/// through.
///
/// Registry occupancy drives the slot: the first registered detector installs
/// interception, removing the last one uninstalls it, and nothing else ever
/// does. A process-wide instance is available via [`hub()`]; independent
/// instances (tests, embedded dashboards) are constructed with any base
/// factory.
pub struct FeedHub {
    bus: EventBus,
    registry: DetectorRegistry,
    slot: ConnectorSlot,
    settings: HubSettings,
}

impl FeedHub {
    pub fn new(base: Arc<dyn SocketFactory>) -> Self {
        Self::with_settings(base, HubSettings::default())
    }

    pub fn with_settings(base: Arc<dyn SocketFactory>, settings: HubSettings) -> Self {
        let bus = EventBus::new();
        for channel in KNOWN_CHANNELS {
            bus.register_channel(channel);
        }
        Self {
            bus,
            registry: DetectorRegistry::new(),
            slot: ConnectorSlot::new(base),
            settings,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Register (or replace) a detector. Installs interception when the
    /// registry becomes non-empty.
    pub fn register_detector(&self, config: DetectorConfig) {
        // The registry lock is released before the slot is touched, so a
        // detector callback registering further detectors cannot deadlock.
        if self.registry.register(config) == Transition::Install {
            self.slot
                .install(&self.registry, &self.bus, self.settings.snapshot_interval);
        }
    }

    /// Remove a detector. Uninstalls interception when the registry becomes
    /// empty; already open connections are unaffected.
    pub fn unregister_detector(&self, id: &str) {
        if self.registry.unregister(id) == Transition::Uninstall {
            self.slot.uninstall();
        }
    }

    /// Open a connection through whatever factory occupies the slot.
    pub fn connect(&self, url: &str) -> Socket {
        self.slot.current().connect(url)
    }

    pub fn is_intercepting(&self) -> bool {
        self.slot.is_installed()
    }

    /// Registered detector ids, sorted.
    pub fn detectors(&self) -> Vec<String> {
        self.registry.list()
    }
}

static HUB: OnceLock<FeedHub> = OnceLock::new();

/// The process-wide hub, backed by the real WebSocket factory.
pub fn hub() -> &'static FeedHub {
    HUB.get_or_init(|| FeedHub::new(Arc::new(WsFactory::new())))
}

/// Register a detector on the process-wide hub.
pub fn register_detector(config: DetectorConfig) {
    hub().register_detector(config);
}

/// Remove a detector from the process-wide hub.
pub fn unregister_detector(id: &str) {
    hub().unregister_detector(id);
}

/// Subscribe to a bus channel on the process-wide hub. The returned
/// [`Subscription`] is the unsubscribe capability.
pub fn subscribe(channel: &str, cb: impl Fn(&Value) + Send + Sync + 'static) -> Subscription {
    hub().bus().on(channel, Arc::new(cb))
}

/// Publish on a bus channel of the process-wide hub. Unknown channels are
/// warned about and dropped; the caller is never affected.
pub fn publish(channel: &str, payload: Value) {
    hub().bus().emit(channel, payload);
}

/// Extend the process-wide channel vocabulary.
pub fn register_channel(name: &str) {
    hub().bus().register_channel(name);
}
