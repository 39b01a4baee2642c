use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::CHANNEL_CONNECTION_STATE;
use crate::bus::EventBus;
use crate::detector::{DetectorEntry, DetectorRegistry};
use crate::socket::{ReadyState, Socket, SocketEvent};

/// Point-in-time view of a connection as reported to detectors. A snapshot,
/// never persisted; staleness self-heals on the next periodic emission.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub is_connected: bool,
    pub is_connecting: bool,
    pub error: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl ConnectionState {
    fn snapshot(ready: ReadyState, last_message_at: Option<DateTime<Utc>>) -> Self {
        Self {
            is_connected: ready == ReadyState::Open,
            is_connecting: ready == ReadyState::Connecting,
            error: (ready == ReadyState::Closed).then(|| "Connection closed".to_string()),
            last_message_at,
        }
    }

    /// Throttled message-arrival pulse: the connection is demonstrably live.
    fn pulse(at: DateTime<Utc>) -> Self {
        Self {
            is_connected: true,
            is_connecting: false,
            error: None,
            last_message_at: Some(at),
        }
    }
}

/// Attach observation to a newly constructed socket.
///
/// Idempotent per connection: a socket already instrumented is skipped, which
/// guards against the intercepting factory being layered twice. For every
/// registered detector matching the socket's URL, an immediate state snapshot
/// is delivered synchronously, then a watch task reports periodic snapshots,
/// message pulses, and the close transition until the connection ends or the
/// detector is deactivated. Observation is strictly additive; listeners the
/// application attached are untouched.
pub fn observe(
    socket: &Socket,
    registry: &DetectorRegistry,
    bus: &EventBus,
    snapshot_interval: Duration,
) {
    if !socket.mark_instrumented() {
        debug!("socket {} already instrumented, skipping", socket.url());
        return;
    }

    for detector in registry.matching(socket.url()) {
        // Subscribe before reporting so no transition between the immediate
        // snapshot and the watch loop can be missed.
        let rx = socket.subscribe();
        deliver(
            &detector,
            bus,
            socket.url(),
            &ConnectionState::snapshot(socket.ready_state(), None),
        );
        tokio::spawn(watch(
            socket.clone(),
            detector,
            bus.clone(),
            rx,
            snapshot_interval,
        ));
    }
}

/// Report one state to a detector's callback and the shared bus channel.
fn deliver(detector: &DetectorEntry, bus: &EventBus, url: &str, state: &ConnectionState) {
    if !detector.is_active() {
        return;
    }
    if let Some(cb) = &detector.config.on_state {
        cb(state);
    }
    bus.emit(
        CHANNEL_CONNECTION_STATE,
        json!({
            "detector": detector.config.id,
            "url": url,
            "state": state,
        }),
    );
}

/// Watch loop for one (connection, detector) pair.
///
/// A single task per pair consumes one event receiver, so a given detector
/// sees this connection's transitions in the order they occurred. The pulse
/// throttle window is wall-clock based; every message is forwarded to
/// `on_message` regardless of throttling.
async fn watch(
    socket: Socket,
    detector: Arc<DetectorEntry>,
    bus: EventBus,
    mut rx: broadcast::Receiver<SocketEvent>,
    snapshot_interval: Duration,
) {
    let mut ticker = tokio::time::interval(snapshot_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // immediate snapshot was already delivered

    let mut last_message_at: Option<DateTime<Utc>> = None;
    let mut last_pulse: Option<Instant> = None;

    loop {
        if !detector.is_active() {
            return;
        }
        tokio::select! {
            event = rx.recv() => match event {
                Ok(SocketEvent::Open) | Ok(SocketEvent::Error(_)) => {
                    deliver(
                        &detector,
                        &bus,
                        socket.url(),
                        &ConnectionState::snapshot(socket.ready_state(), last_message_at),
                    );
                }
                Ok(SocketEvent::Message(text)) => {
                    // The loop-top guard only runs between select iterations;
                    // a message may arrive after deactivation while this task
                    // is parked. Never forward to a dead detector.
                    if !detector.is_active() {
                        return;
                    }
                    if let Some(cb) = &detector.config.on_message {
                        cb(&text);
                    }
                    let arrived = Utc::now();
                    last_message_at = Some(arrived);

                    let now = Instant::now();
                    let due = last_pulse
                        .is_none_or(|prev| now.duration_since(prev) >= detector.config.throttle);
                    if due {
                        last_pulse = Some(now);
                        deliver(&detector, &bus, socket.url(), &ConnectionState::pulse(arrived));
                    }
                }
                Ok(SocketEvent::Closed) | Err(broadcast::error::RecvError::Closed) => {
                    deliver(
                        &detector,
                        &bus,
                        socket.url(),
                        &ConnectionState::snapshot(ReadyState::Closed, last_message_at),
                    );
                    return;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(
                        "detector {:?} lagged {missed} events on {}",
                        detector.config.id,
                        socket.url()
                    );
                }
            },
            _ = ticker.tick() => {
                deliver(
                    &detector,
                    &bus,
                    socket.url(),
                    &ConnectionState::snapshot(socket.ready_state(), last_message_at),
                );
            }
        }
    }
}
