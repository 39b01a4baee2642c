use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

/// Broadcast buffer per socket. A slow observer past this many events is
/// lagged (and warned), never blocked on.
const EVENT_BUFFER: usize = 256;

/// Connection readiness, browser-WebSocket style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// Lifecycle and traffic events observable on a [`Socket`].
#[derive(Debug, Clone)]
pub enum SocketEvent {
    Open,
    Message(String),
    Error(String),
    Closed,
}

enum Outbound {
    Text(String),
    Close,
}

struct SocketShared {
    url: String,
    ready: AtomicU8,
    instrumented: AtomicBool,
    events: broadcast::Sender<SocketEvent>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Outbound>>>,
}

/// Handle to one live connection.
///
/// Clones share the same underlying connection. Any number of observers may
/// `subscribe()`; observation is strictly additive and cannot disturb other
/// receivers, which is what makes transparent instrumentation possible.
#[derive(Clone)]
pub struct Socket {
    shared: Arc<SocketShared>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Socket {
    /// A connection in `Connecting` state with no driver attached yet.
    pub(crate) fn pending(url: &str) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(SocketShared {
                url: url.to_string(),
                ready: AtomicU8::new(ReadyState::Connecting as u8),
                instrumented: AtomicBool::new(false),
                events,
                outbound_rx: Mutex::new(Some(outbound_rx)),
            }),
            outbound,
        }
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.shared.ready.load(Ordering::SeqCst))
    }

    /// New event receiver for this connection.
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.shared.events.subscribe()
    }

    /// Queue a text frame for sending. Frames queued before the connection
    /// opens are flushed once it does.
    pub fn send(&self, text: impl Into<String>) -> Result<()> {
        self.outbound
            .send(Outbound::Text(text.into()))
            .map_err(|_| anyhow!("connection to {} is closed", self.shared.url))
    }

    /// Request a graceful close. The socket reaches `Closed` asynchronously.
    pub fn close(&self) {
        self.shared
            .ready
            .store(ReadyState::Closing as u8, Ordering::SeqCst);
        let _ = self.outbound.send(Outbound::Close);
    }

    /// Whether two handles refer to the same underlying connection.
    pub fn same_connection(a: &Socket, b: &Socket) -> bool {
        Arc::ptr_eq(&a.shared, &b.shared)
    }

    /// Set the instrumented flag; returns false if it was already set.
    pub(crate) fn mark_instrumented(&self) -> bool {
        !self.shared.instrumented.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<Outbound>> {
        self.shared.outbound_rx.lock().unwrap().take()
    }

    pub(crate) fn transition_open(&self) {
        self.shared
            .ready
            .store(ReadyState::Open as u8, Ordering::SeqCst);
        let _ = self.shared.events.send(SocketEvent::Open);
    }

    pub(crate) fn push_message(&self, text: String) {
        let _ = self.shared.events.send(SocketEvent::Message(text));
    }

    pub(crate) fn fail(&self, error: String) {
        let _ = self.shared.events.send(SocketEvent::Error(error));
    }

    pub(crate) fn finish_close(&self) {
        self.shared
            .ready
            .store(ReadyState::Closed as u8, Ordering::SeqCst);
        let _ = self.shared.events.send(SocketEvent::Closed);
    }
}

/// The socket-construction entry point. Constructor-style: `connect` returns
/// a `Connecting` socket immediately and drives it asynchronously.
pub trait SocketFactory: Send + Sync {
    fn connect(&self, url: &str) -> Socket;
}

/// Real factory backed by tokio-tungstenite.
pub struct WsFactory {
    ping_interval: Duration,
}

impl WsFactory {
    pub fn new() -> Self {
        Self {
            ping_interval: Duration::from_secs(10),
        }
    }

    pub fn with_ping_interval(ping_interval: Duration) -> Self {
        Self { ping_interval }
    }
}

impl Default for WsFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketFactory for WsFactory {
    fn connect(&self, url: &str) -> Socket {
        let socket = Socket::pending(url);
        tokio::spawn(drive(socket.clone(), self.ping_interval));
        socket
    }
}

/// Own the network side of one connection: dial, pump frames both ways,
/// keep-alive, and mark the socket closed on the way out.
async fn drive(socket: Socket, ping_interval: Duration) {
    if let Err(e) = drive_inner(&socket, ping_interval).await {
        warn!("connection to {} failed: {e:#}", socket.url());
        socket.fail(format!("{e:#}"));
    }
    socket.finish_close();
}

async fn drive_inner(socket: &Socket, ping_interval: Duration) -> Result<()> {
    let parsed = Url::parse(socket.url())
        .with_context(|| format!("invalid connection URL {}", socket.url()))?;

    let (ws, _) = connect_async(parsed.as_str())
        .await
        .with_context(|| format!("failed to connect to {parsed}"))?;
    socket.transition_open();
    debug!("connected to {parsed}");

    let (mut write, mut read) = ws.split();
    let mut outbound = socket
        .take_outbound()
        .ok_or_else(|| anyhow!("connection already driven"))?;
    let mut ping = tokio::time::interval(ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => socket.push_message(text.to_string()),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // ping/pong/binary frames are not observed
                Some(Err(e)) => return Err(e).context("read error"),
            },
            queued = outbound.recv() => match queued {
                Some(Outbound::Text(text)) => write
                    .send(Message::Text(text.into()))
                    .await
                    .context("send error")?,
                Some(Outbound::Close) => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                // Unreachable while this task holds its own socket clone.
                None => break,
            },
            _ = ping.tick() => {
                let _ = write.send(Message::Ping(vec![].into())).await;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_socket_starts_connecting() {
        let s = Socket::pending("wss://x/stream");
        assert_eq!(s.ready_state(), ReadyState::Connecting);
        assert_eq!(s.url(), "wss://x/stream");
    }

    #[tokio::test]
    async fn transitions_are_broadcast_to_every_receiver() {
        let s = Socket::pending("wss://x");
        let mut a = s.subscribe();
        let mut b = s.subscribe();

        s.transition_open();
        s.push_message("tick".to_string());
        s.finish_close();

        for rx in [&mut a, &mut b] {
            assert!(matches!(rx.recv().await, Ok(SocketEvent::Open)));
            match rx.recv().await {
                Ok(SocketEvent::Message(m)) => assert_eq!(m, "tick"),
                other => panic!("expected message, got {other:?}"),
            }
            assert!(matches!(rx.recv().await, Ok(SocketEvent::Closed)));
        }
        assert_eq!(s.ready_state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn instrumented_flag_sets_once() {
        let s = Socket::pending("wss://x");
        assert!(s.mark_instrumented());
        assert!(!s.mark_instrumented());

        let clone = s.clone();
        assert!(!clone.mark_instrumented());
        assert!(Socket::same_connection(&s, &clone));
    }

    #[tokio::test]
    async fn sends_queue_until_a_driver_drains_them() {
        let s = Socket::pending("wss://x");
        s.send("first").unwrap();
        s.send("second").unwrap();

        let mut rx = s.take_outbound().expect("outbound not yet taken");
        assert!(s.take_outbound().is_none());

        match rx.recv().await {
            Some(Outbound::Text(t)) => assert_eq!(t, "first"),
            _ => panic!("expected queued text"),
        }
        match rx.recv().await {
            Some(Outbound::Text(t)) => assert_eq!(t, "second"),
            _ => panic!("expected queued text"),
        }
    }

    #[tokio::test]
    async fn close_requests_shutdown() {
        let s = Socket::pending("wss://x");
        s.close();
        assert_eq!(s.ready_state(), ReadyState::Closing);

        let mut rx = s.take_outbound().unwrap();
        assert!(matches!(rx.recv().await, Some(Outbound::Close)));
    }
}
