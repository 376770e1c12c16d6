//! Change Relay: local edits out, remote edits in.
//!
//! Only [`ChangeOrigin::UserEdit`] changes go out as `send-changes`. Remote
//! deltas are applied with [`ChangeOrigin::ProgrammaticEdit`], so applying
//! them can never produce an outbound echo.

use docsync_core::{ChangeEvent, ChangeOrigin, ListenerId, RichTextSurface};
use tokio::sync::mpsc;

use crate::connection::{Connection, Emitter, Subscription};
use crate::protocol::{ClientMessage, EventKind, ServerMessage};
use crate::task::TaskGuard;
use crate::SharedSurface;

enum Pumps {
    /// Listeners registered, events buffered in their channels.
    Attached {
        changes: mpsc::UnboundedReceiver<ChangeEvent>,
        remote: Subscription,
        emitter: Emitter,
    },
    Running {
        outbound: TaskGuard,
        inbound: TaskGuard,
    },
}

pub struct ChangeRelay<S: RichTextSurface> {
    surface: SharedSurface<S>,
    listener: ListenerId,
    pumps: Pumps,
}

impl<S: RichTextSurface> ChangeRelay<S> {
    /// Register both listeners without moving anything yet.
    ///
    /// Attach before `get-document` goes out: `receive-changes` that follow
    /// `load-document`, and edits made as soon as the surface is enabled,
    /// are held until [`start`](Self::start).
    pub async fn attach(connection: &Connection, surface: SharedSurface<S>) -> Self {
        let (listener, changes) = surface.lock().await.on_change();
        let remote = connection.on(EventKind::ReceiveChanges);
        let emitter = connection.emitter();
        Self {
            surface,
            listener,
            pumps: Pumps::Attached { changes, remote, emitter },
        }
    }

    /// Start both directions, draining whatever was buffered first.
    /// Call once the document has loaded.
    pub fn start(self) -> Self {
        let (mut changes, mut remote, emitter) = match self.pumps {
            Pumps::Attached { changes, remote, emitter } => (changes, remote, emitter),
            Pumps::Running { .. } => return self,
        };

        let outbound = TaskGuard::spawn(async move {
            while let Some(change) = changes.recv().await {
                if change.origin != ChangeOrigin::UserEdit {
                    continue;
                }
                if emitter.emit(ClientMessage::SendChanges(change.delta)).await.is_err() {
                    break;
                }
            }
        });

        let target = self.surface.clone();
        let inbound = TaskGuard::spawn(async move {
            while let Some(message) = remote.recv().await {
                if let ServerMessage::ReceiveChanges(delta) = message {
                    target
                        .lock()
                        .await
                        .update_contents(&delta, ChangeOrigin::ProgrammaticEdit);
                }
            }
        });

        Self {
            surface: self.surface,
            listener: self.listener,
            pumps: Pumps::Running { outbound, inbound },
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.pumps, Pumps::Running { .. })
    }

    /// Detach both directions. Nothing is sent or applied afterwards.
    pub async fn stop(self) {
        if let Pumps::Running { outbound, inbound } = self.pumps {
            inbound.cancel().await;
            outbound.cancel().await;
        }
        self.surface.lock().await.off_change(self.listener);
    }
}
