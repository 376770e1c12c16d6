//! User-visible notices.
//!
//! A single broadcast channel carries every notice. Posting never blocks and
//! never fails, even when nobody is listening; each notice carries its own
//! expiry so front ends can dismiss it without further bookkeeping.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub expires_at: Instant,
}

impl Notice {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notice>,
    ttl: Duration,
}

impl Notifier {
    pub fn new(ttl: Duration) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx, ttl }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn success(&self, message: impl Into<String>) {
        self.post(NoticeLevel::Success, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.post(NoticeLevel::Error, message.into());
    }

    fn post(&self, level: NoticeLevel, message: String) {
        match level {
            NoticeLevel::Success => log::info!("{}", message),
            NoticeLevel::Error => log::warn!("{}", message),
        }
        let notice = Notice { level, message, expires_at: Instant::now() + self.ttl };
        // No receivers is fine.
        let _ = self.tx.send(notice);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(Duration::from_secs(4))
    }
}
