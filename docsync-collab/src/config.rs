//! Client and relay configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// What the transport does with the document binding after a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RejoinPolicy {
    /// Re-send the session's `get-document` before replaying queued
    /// messages so the server restores the room binding. The resulting
    /// `load-document` is ignored.
    #[default]
    Rebind,
    /// Keep the connection unbound after a reconnect.
    Stay,
}

/// Exponential backoff for reconnect attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl ReconnectConfig {
    /// Delay before the given attempt (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

/// Session-side configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Realtime endpoint, e.g. `ws://127.0.0.1:3001`.
    pub server_url: String,
    /// Directory service base url. Lookups are skipped when unset.
    pub directory_url: Option<String>,
    pub autosave_interval: Duration,
    /// `None` waits for `load-document` indefinitely.
    pub load_timeout: Option<Duration>,
    pub rejoin_policy: RejoinPolicy,
    pub reconnect: ReconnectConfig,
    /// Capacity of the outbound and event channels.
    pub channel_capacity: usize,
    pub offline_queue_capacity: usize,
    pub notice_ttl: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:3001".to_string(),
            directory_url: None,
            autosave_interval: Duration::from_millis(2000),
            load_timeout: Some(Duration::from_secs(10)),
            rejoin_policy: RejoinPolicy::default(),
            reconnect: ReconnectConfig::default(),
            channel_capacity: 256,
            offline_queue_capacity: 10_000,
            notice_ttl: Duration::from_secs(4),
        }
    }
}

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: SocketAddr,
    /// Create unknown documents on `get-document` instead of answering
    /// `document-not-found`. A request carrying a filename always creates.
    pub create_missing: bool,
    pub max_peers_per_room: usize,
    /// Fan-out buffer per room.
    pub broadcast_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
            create_missing: true,
            max_peers_per_room: 100,
            broadcast_capacity: 1024,
        }
    }
}
