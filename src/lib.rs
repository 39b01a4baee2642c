pub mod bus;
pub mod config;
pub mod detector;
pub mod hub;
pub mod instrument;
pub mod intercept;
pub mod matcher;
pub mod reporter;
pub mod socket;

/// Price tick fan-out for chart consumers.
pub const CHANNEL_PRICE_UPDATE: &str = "price-update";

/// Connection-state snapshots and pulses from instrumented sockets.
pub const CHANNEL_CONNECTION_STATE: &str = "connection-state-change";

/// Account balance updates for the account panel.
pub const CHANNEL_ACCOUNT_BALANCE: &str = "account-balance-update";

/// Position open/close lifecycle events.
pub const CHANNEL_POSITION_LIFECYCLE: &str = "position-lifecycle-change";

/// Channels every hub knows out of the box. The host application may extend
/// the vocabulary at runtime via `register_channel`.
pub const KNOWN_CHANNELS: [&str; 4] = [
    CHANNEL_PRICE_UPDATE,
    CHANNEL_CONNECTION_STATE,
    CHANNEL_ACCOUNT_BALANCE,
    CHANNEL_POSITION_LIFECYCLE,
];

/// RTDS WebSocket URL (real-time data service) — the default feed the demo
/// binary watches.
pub const RTDS_WS_URL: &str = "wss://ws-live-data.polymarket.com";
