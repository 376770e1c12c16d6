//! Autosave Scheduler: periodic full-snapshot `save-document`.

use std::time::Duration;

use docsync_core::RichTextSurface;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::connection::{Connection, Emitter};
use crate::protocol::{ClientMessage, ProtocolError};
use crate::task::TaskGuard;
use crate::SharedSurface;

/// Send the surface's current contents as a checkpoint.
pub async fn checkpoint<S: RichTextSurface>(
    emitter: &Emitter,
    surface: &SharedSurface<S>,
) -> Result<(), ProtocolError> {
    let snapshot = surface.lock().await.contents();
    emitter.emit(ClientMessage::SaveDocument(snapshot)).await
}

/// Fires every period whether or not anything changed. Stopping it cancels
/// the timer without a final save.
pub struct AutosaveScheduler {
    task: TaskGuard,
}

impl AutosaveScheduler {
    pub fn start<S: RichTextSurface>(
        connection: &Connection,
        surface: SharedSurface<S>,
        period: Duration,
    ) -> Self {
        let emitter = connection.emitter();
        let task = TaskGuard::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = checkpoint(&emitter, &surface).await {
                    log::debug!("Autosave stopped: {}", e);
                    break;
                }
            }
        });
        Self { task }
    }

    pub async fn stop(self) {
        self.task.cancel().await;
    }
}
