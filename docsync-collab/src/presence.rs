//! Presence Tracker: collaborator count and its display.
//!
//! The server reports a bare count via `user-count`. Only the latest value is
//! kept. The display shows at most [`MAX_INDICATORS`] avatars plus a "+N"
//! aggregate for the rest.

use tokio::sync::watch;

use crate::connection::Connection;
use crate::protocol::{EventKind, ServerMessage};
use crate::task::TaskGuard;

pub const MAX_INDICATORS: u32 = 3;

/// Avatar seeds, cycled per indicator.
pub const AVATAR_SEEDS: [&str; 4] = ["Peanut", "Milo", "Bubba", "Abby"];

const AVATAR_BASE: &str = "https://api.dicebear.com/9.x/thumbs/svg";

// ───────────────────────────────────────────────────────────────────
// Display derivation
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Indicator {
    /// "User 1", "User 2", ...
    pub label: String,
    pub avatar_url: String,
}

impl Indicator {
    fn for_slot(slot: u32) -> Self {
        let seed = AVATAR_SEEDS[slot as usize % AVATAR_SEEDS.len()];
        Self {
            label: format!("User {}", slot + 1),
            avatar_url: format!("{AVATAR_BASE}?seed={seed}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PresenceDisplay {
    pub indicators: Vec<Indicator>,
    /// Collaborators beyond the shown indicators.
    pub overflow: Option<u32>,
}

impl PresenceDisplay {
    pub fn overflow_label(&self) -> Option<String> {
        self.overflow.map(|n| format!("+{n}"))
    }
}

/// Map a collaborator count to what the presence bar shows.
pub fn derive_display(count: u32) -> PresenceDisplay {
    let shown = count.min(MAX_INDICATORS);
    PresenceDisplay {
        indicators: (0..shown).map(Indicator::for_slot).collect(),
        overflow: (count > MAX_INDICATORS).then(|| count - MAX_INDICATORS),
    }
}

// ───────────────────────────────────────────────────────────────────
// Tracker
// ───────────────────────────────────────────────────────────────────

/// Follows `user-count` for the lifetime of a session.
pub struct PresenceTracker {
    count: watch::Receiver<u32>,
    task: TaskGuard,
}

impl PresenceTracker {
    pub fn start(connection: &Connection) -> Self {
        let (tx, count) = watch::channel(0);
        let mut updates = connection.on(EventKind::UserCount);
        let task = TaskGuard::spawn(async move {
            while let Some(message) = updates.recv().await {
                if let ServerMessage::UserCount(n) = message {
                    log::debug!("Collaborators: {}", n);
                    tx.send_replace(n);
                }
            }
        });
        Self { count, task }
    }

    pub fn count(&self) -> u32 {
        *self.count.borrow()
    }

    pub fn display(&self) -> PresenceDisplay {
        derive_display(self.count())
    }

    /// Receiver that changes with every new count.
    pub fn watch(&self) -> watch::Receiver<u32> {
        self.count.clone()
    }

    pub async fn stop(self) {
        self.task.cancel().await;
    }
}
