use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::bus::EventBus;
use crate::detector::DetectorRegistry;
use crate::instrument;
use crate::socket::{Socket, SocketFactory};

/// The process-wide socket-construction slot.
///
/// Holds whichever factory currently answers `connect` calls. Installing
/// interception saves the occupant and swaps in an [`InterceptingFactory`]
/// wrapping it; uninstalling restores the saved `Arc` verbatim, so the
/// restored factory is reference-identical to what was captured. The original
/// is saved before the first swap and restored exactly once: both `install`
/// and `uninstall` are silent no-ops when already in the requested state.
///
/// Install and uninstall are driven exclusively by detector-registry
/// occupancy transitions; the slot never inspects sockets or detectors to
/// decide anything itself.
pub struct ConnectorSlot {
    inner: Mutex<SlotState>,
}

struct SlotState {
    active: Arc<dyn SocketFactory>,
    original: Option<Arc<dyn SocketFactory>>,
}

impl ConnectorSlot {
    pub fn new(base: Arc<dyn SocketFactory>) -> Self {
        Self {
            inner: Mutex::new(SlotState {
                active: base,
                original: None,
            }),
        }
    }

    /// Factory currently answering construction requests.
    pub fn current(&self) -> Arc<dyn SocketFactory> {
        self.inner.lock().unwrap().active.clone()
    }

    pub fn is_installed(&self) -> bool {
        self.inner.lock().unwrap().original.is_some()
    }

    /// Wrap the current occupant with interception. No-op if installed.
    pub fn install(
        &self,
        registry: &DetectorRegistry,
        bus: &EventBus,
        snapshot_interval: Duration,
    ) {
        let mut slot = self.inner.lock().unwrap();
        if slot.original.is_some() {
            return;
        }
        let original = slot.active.clone();
        slot.original = Some(original.clone());
        slot.active = Arc::new(InterceptingFactory {
            inner: original,
            registry: registry.clone(),
            bus: bus.clone(),
            snapshot_interval,
        });
        debug!("connection interception installed");
    }

    /// Restore the saved original factory. No-op if not installed. Already
    /// open connections keep their instrumentation; only future constructions
    /// bypass it.
    pub fn uninstall(&self) {
        let mut slot = self.inner.lock().unwrap();
        if let Some(original) = slot.original.take() {
            slot.active = original;
            debug!("connection interception removed");
        }
    }
}

/// Decorator over a [`SocketFactory`]: delegates construction to the wrapped
/// factory, hands the live socket to the instrumenter, and returns that same
/// socket, so callers cannot tell the wrapper from the original.
struct InterceptingFactory {
    inner: Arc<dyn SocketFactory>,
    registry: DetectorRegistry,
    bus: EventBus,
    snapshot_interval: Duration,
}

impl SocketFactory for InterceptingFactory {
    fn connect(&self, url: &str) -> Socket {
        let socket = self.inner.connect(url);
        instrument::observe(&socket, &self.registry, &self.bus, self.snapshot_interval);
        socket
    }
}
