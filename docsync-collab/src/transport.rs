//! Realtime transport: a reconnecting bidirectional message channel.
//!
//! [`websocket`] runs a supervisor task that owns the socket:
//! - connects, and reconnects with exponential backoff when the link drops
//! - queues outbound messages while disconnected and replays them in order
//! - re-sends the rejoin message (if any) before the replay
//!
//! [`loopback`] wires a [`Transport`] straight to a [`ServerEnd`] for tests
//! that script the server side.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

use crate::config::{ClientConfig, ReconnectConfig};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::task::TaskGuard;

/// Transport connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events surfaced by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// First successful connection.
    Connected,
    /// Link lost; reconnecting in the background.
    Disconnected,
    /// Link restored after a drop.
    Reconnected,
    Message(ServerMessage),
}

type RejoinSlot = Arc<Mutex<Option<ClientMessage>>>;

/// Client side of a realtime channel.
pub struct Transport {
    outgoing: mpsc::Sender<ClientMessage>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    state: watch::Receiver<ConnectionState>,
    rejoin: RejoinSlot,
    task: Option<TaskGuard>,
}

impl Transport {
    /// Sender for outbound messages.
    pub fn sender(&self) -> mpsc::Sender<ClientMessage> {
        self.outgoing.clone()
    }

    /// Take the inbound event stream (can only be called once).
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events.take()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Message re-sent ahead of the replay after every reconnect.
    pub fn set_rejoin(&self, message: Option<ClientMessage>) {
        *self.rejoin.lock().unwrap_or_else(PoisonError::into_inner) = message;
    }

    /// Stop the transport. Unsent and queued messages are discarded.
    pub async fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            task.cancel().await;
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Offline queue
// ───────────────────────────────────────────────────────────────────

/// Outbound messages held while the link is down.
///
/// Snapshot saves coalesce: only the latest queued `save-document` is kept.
#[derive(Debug)]
pub struct OfflineQueue {
    queue: VecDeque<ClientMessage>,
    max_size: usize,
}

impl OfflineQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Queue a message for replay. Returns `false` if the queue is full.
    pub fn enqueue(&mut self, message: ClientMessage) -> bool {
        if matches!(message, ClientMessage::SaveDocument(_)) {
            self.queue.retain(|queued| !matches!(queued, ClientMessage::SaveDocument(_)));
        }
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(message);
        true
    }

    pub fn drain(&mut self) -> Vec<ClientMessage> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

// ───────────────────────────────────────────────────────────────────
// WebSocket transport
// ───────────────────────────────────────────────────────────────────

/// Open a reconnecting websocket transport to `url`.
///
/// Returns immediately; a [`TransportEvent::Connected`] event arrives once
/// the first connection is up.
pub fn websocket(url: impl Into<String>, config: &ClientConfig) -> Transport {
    let (out_tx, out_rx) = mpsc::channel(config.channel_capacity);
    let (event_tx, event_rx) = mpsc::channel(config.channel_capacity);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
    let rejoin: RejoinSlot = Arc::new(Mutex::new(None));

    let supervisor = Supervisor {
        url: url.into(),
        reconnect: config.reconnect.clone(),
        queue: OfflineQueue::new(config.offline_queue_capacity),
        outgoing: out_rx,
        events: event_tx,
        state: state_tx,
        rejoin: rejoin.clone(),
    };

    Transport {
        outgoing: out_tx,
        events: Some(event_rx),
        state: state_rx,
        rejoin,
        task: Some(TaskGuard::spawn(supervisor.run())),
    }
}

enum LinkEnd {
    /// Socket dropped; try again.
    Lost,
    /// Owner went away; stop for good.
    Closed,
}

struct Supervisor {
    url: String,
    reconnect: ReconnectConfig,
    queue: OfflineQueue,
    outgoing: mpsc::Receiver<ClientMessage>,
    events: mpsc::Sender<TransportEvent>,
    state: watch::Sender<ConnectionState>,
    rejoin: RejoinSlot,
}

impl Supervisor {
    async fn run(mut self) {
        let mut attempt = 0u32;
        let mut connected_before = false;

        loop {
            let url = self.url.clone();
            let connected = match self.buffer_while(tokio_tungstenite::connect_async(url)).await {
                Some(result) => result,
                None => break,
            };

            match connected {
                Ok((stream, _)) => {
                    attempt = 0;
                    self.state.send_replace(ConnectionState::Connected);
                    let event = if connected_before {
                        log::info!("Reconnected to {}", self.url);
                        TransportEvent::Reconnected
                    } else {
                        log::info!("Connected to {}", self.url);
                        TransportEvent::Connected
                    };
                    if self.events.send(event).await.is_err() {
                        break;
                    }

                    let rejoin = if connected_before { self.rejoin_message() } else { None };
                    connected_before = true;

                    let (mut sink, mut source) = stream.split();
                    let end = match self.replay(&mut sink, rejoin).await {
                        Ok(()) => self.pump(&mut sink, &mut source).await,
                        Err(()) => LinkEnd::Lost,
                    };
                    if let LinkEnd::Closed = end {
                        let _ = sink.close().await;
                        break;
                    }

                    log::warn!("Lost connection to {}", self.url);
                    self.state.send_replace(ConnectionState::Reconnecting);
                    if self.events.send(TransportEvent::Disconnected).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("Connect to {} failed (attempt {}): {}", self.url, attempt + 1, e);
                }
            }

            if !self.reconnect.allows(attempt) {
                log::error!("Giving up on {} after {} attempts", self.url, attempt);
                break;
            }
            let delay = self.reconnect.delay_for(attempt);
            attempt += 1;
            if self.buffer_while(tokio::time::sleep(delay)).await.is_none() {
                break;
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
    }

    fn rejoin_message(&self) -> Option<ClientMessage> {
        self.rejoin.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Drive `future` while parking outbound messages in the offline queue.
    ///
    /// Returns `None` when the owner dropped the outbound sender.
    async fn buffer_while<F: Future>(&mut self, future: F) -> Option<F::Output> {
        tokio::pin!(future);
        loop {
            tokio::select! {
                output = &mut future => return Some(output),
                message = self.outgoing.recv() => match message {
                    Some(message) => self.park(message),
                    None => return None,
                },
            }
        }
    }

    fn park(&mut self, message: ClientMessage) {
        let name = message.name();
        if !self.queue.enqueue(message) {
            log::warn!("Offline queue full, dropping {}", name);
        }
    }

    async fn replay<S>(&mut self, sink: &mut S, rejoin: Option<ClientMessage>) -> Result<(), ()>
    where
        S: SinkExt<Message> + Unpin,
    {
        let queued = self.queue.drain();
        if rejoin.is_none() && queued.is_empty() {
            return Ok(());
        }
        log::info!("Replaying {} queued messages", queued.len());

        let mut pending: VecDeque<ClientMessage> = rejoin.into_iter().chain(queued).collect();
        while let Some(message) = pending.pop_front() {
            let Ok(text) = message.encode() else {
                log::warn!("Dropping unencodable {}", message.name());
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                // Keep the rest for the next connection; the rejoin message
                // is rebuilt from the slot.
                pending.push_front(message);
                for message in pending {
                    if !matches!(message, ClientMessage::GetDocument(_)) {
                        self.park(message);
                    }
                }
                return Err(());
            }
        }
        Ok(())
    }

    async fn pump<S, R>(&mut self, sink: &mut S, source: &mut R) -> LinkEnd
    where
        S: SinkExt<Message> + Unpin,
        S::Error: std::fmt::Display,
        R: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            tokio::select! {
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => match ServerMessage::decode(&text) {
                        Ok(message) => {
                            log::debug!("<- {}", message.kind().as_str());
                            if self.events.send(TransportEvent::Message(message)).await.is_err() {
                                return LinkEnd::Closed;
                            }
                        }
                        Err(e) => log::warn!("Dropping undecodable frame: {}", e),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            return LinkEnd::Lost;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return LinkEnd::Lost,
                    Some(Err(e)) => {
                        log::warn!("WebSocket error: {}", e);
                        return LinkEnd::Lost;
                    }
                    Some(Ok(_)) => {}
                },
                message = self.outgoing.recv() => match message {
                    Some(message) => {
                        let text = match message.encode() {
                            Ok(text) => text,
                            Err(e) => {
                                log::warn!("Dropping unencodable {}: {}", message.name(), e);
                                continue;
                            }
                        };
                        log::debug!("-> {}", message.name());
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            log::warn!("Send failed, queueing {}: {}", message.name(), e);
                            self.park(message);
                            return LinkEnd::Lost;
                        }
                    }
                    None => return LinkEnd::Closed,
                },
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Loopback transport
// ───────────────────────────────────────────────────────────────────

/// Server side of a [`loopback`] transport.
pub struct ServerEnd {
    received: mpsc::Receiver<ClientMessage>,
    events: mpsc::Sender<TransportEvent>,
    client: mpsc::WeakSender<ClientMessage>,
    state: watch::Sender<ConnectionState>,
    rejoin: RejoinSlot,
}

impl ServerEnd {
    /// Deliver a server message. Returns `false` once the client is gone.
    pub async fn send(&self, message: ServerMessage) -> bool {
        self.events.send(TransportEvent::Message(message)).await.is_ok()
    }

    /// Next message the client sent; `None` once every client sender is dropped.
    pub async fn recv(&mut self) -> Option<ClientMessage> {
        self.received.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ClientMessage> {
        self.received.try_recv().ok()
    }

    /// Simulate a dropped link.
    pub async fn disconnect(&self) {
        self.state.send_replace(ConnectionState::Reconnecting);
        let _ = self.events.send(TransportEvent::Disconnected).await;
    }

    /// Simulate a restored link, re-sending the rejoin message first.
    pub async fn reconnect(&self) {
        let rejoin = self.rejoin.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let (Some(message), Some(client)) = (rejoin, self.client.upgrade()) {
            let _ = client.send(message).await;
        }
        self.state.send_replace(ConnectionState::Connected);
        let _ = self.events.send(TransportEvent::Reconnected).await;
    }
}

/// An in-process transport that starts out connected.
pub fn loopback(capacity: usize) -> (Transport, ServerEnd) {
    let (out_tx, out_rx) = mpsc::channel(capacity);
    let (event_tx, event_rx) = mpsc::channel(capacity);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
    let rejoin: RejoinSlot = Arc::new(Mutex::new(None));

    // Capacity is at least one, so the first event always fits.
    let _ = event_tx.try_send(TransportEvent::Connected);

    let server = ServerEnd {
        received: out_rx,
        events: event_tx,
        client: out_tx.downgrade(),
        state: state_tx,
        rejoin: rejoin.clone(),
    };
    let transport = Transport {
        outgoing: out_tx,
        events: Some(event_rx),
        state: state_rx,
        rejoin,
        task: None,
    };
    (transport, server)
}
