//! Connection Manager: owns the transport for one session.
//!
//! Inbound messages are routed by [`EventKind`] to subscriptions in arrival
//! order. A subscription deregisters itself when dropped, so a component
//! detaches its handler simply by letting go of it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::protocol::{ClientMessage, EventKind, ProtocolError, ServerMessage};
use crate::task::TaskGuard;
use crate::transport::{ConnectionState, Transport, TransportEvent};

struct Listener {
    id: u64,
    kind: EventKind,
    once: bool,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

#[derive(Default)]
struct Registry {
    listeners: Mutex<Vec<Listener>>,
    next_id: AtomicU64,
}

impl Registry {
    fn add(self: &Arc<Self>, kind: EventKind, once: bool) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(Listener { id, kind, once, tx });
        Subscription { id, kind, registry: Arc::downgrade(self), rx }
    }

    fn remove(&self, id: u64) {
        self.lock().retain(|listener| listener.id != id);
    }

    fn deliver(&self, message: ServerMessage) {
        let kind = message.kind();
        let mut listeners = self.lock();
        let mut delivered = 0usize;
        listeners.retain(|listener| {
            if listener.kind != kind {
                return true;
            }
            let alive = listener.tx.send(message.clone()).is_ok();
            if alive {
                delivered += 1;
            }
            alive && !listener.once
        });
        if delivered == 0 {
            log::debug!("No handler for {}, ignoring", kind.as_str());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Listener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A registered handler for one inbound event kind.
///
/// Dropping it deregisters the handler.
pub struct Subscription {
    id: u64,
    kind: EventKind,
    registry: Weak<Registry>,
    rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Next routed message, or `None` once the connection is closed
    /// (or, for a one-shot handler, after it has fired).
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ServerMessage> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

/// Cloneable handle for sending on the connection.
#[derive(Clone)]
pub struct Emitter {
    sender: mpsc::Sender<ClientMessage>,
}

impl Emitter {
    pub async fn emit(&self, message: ClientMessage) -> Result<(), ProtocolError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }
}

/// An open realtime connection.
pub struct Connection {
    endpoint: String,
    transport: Transport,
    emitter: Emitter,
    registry: Arc<Registry>,
    dispatch: TaskGuard,
}

impl Connection {
    /// Wait for the transport to come up and start routing its events.
    ///
    /// The connection is only handed out once it is open.
    pub async fn open(
        mut transport: Transport,
        endpoint: impl Into<String>,
        connect_timeout: Option<Duration>,
    ) -> Result<Self, SessionError> {
        let endpoint = endpoint.into();
        let connect_error = |reason: &str| SessionError::Connect {
            url: endpoint.clone(),
            reason: reason.to_string(),
        };

        let mut events = transport
            .take_events()
            .ok_or_else(|| connect_error("transport already in use"))?;

        let first = match connect_timeout {
            Some(limit) => tokio::time::timeout(limit, events.recv())
                .await
                .map_err(|_| connect_error("timed out"))?,
            None => events.recv().await,
        };
        match first {
            Some(TransportEvent::Connected) => {}
            Some(other) => {
                log::warn!("Unexpected first transport event: {:?}", other);
                return Err(connect_error("unexpected handshake"));
            }
            None => return Err(connect_error("transport gave up")),
        }

        log::info!("Connection to {} open", endpoint);
        let registry = Arc::new(Registry::default());
        let dispatch = TaskGuard::spawn(dispatch(events, registry.clone()));
        let emitter = Emitter { sender: transport.sender() };

        Ok(Self { endpoint, transport, emitter, registry, dispatch })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Handle every future message of `kind`.
    pub fn on(&self, kind: EventKind) -> Subscription {
        self.registry.add(kind, false)
    }

    /// Handle the next message of `kind` only.
    pub fn once(&self, kind: EventKind) -> Subscription {
        self.registry.add(kind, true)
    }

    pub async fn emit(&self, message: ClientMessage) -> Result<(), ProtocolError> {
        self.emitter.emit(message).await
    }

    pub fn emitter(&self) -> Emitter {
        self.emitter.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// Message the transport re-sends after every reconnect.
    pub fn set_rejoin(&self, message: Option<ClientMessage>) {
        self.transport.set_rejoin(message);
    }

    /// Close forcibly. Messages not yet written to the socket are discarded
    /// and every subscription sees the end of its stream.
    pub async fn close(self) {
        let Connection { endpoint, transport, emitter, registry, dispatch } = self;
        dispatch.cancel().await;
        drop(emitter);
        drop(registry);
        transport.shutdown().await;
        log::info!("Connection to {} closed", endpoint);
    }
}

async fn dispatch(mut events: mpsc::Receiver<TransportEvent>, registry: Arc<Registry>) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Message(message) => registry.deliver(message),
            TransportEvent::Disconnected => {
                log::info!("Connection lost, outbound messages are queued until it returns");
            }
            TransportEvent::Reconnected => log::info!("Connection restored"),
            TransportEvent::Connected => {}
        }
    }
    log::debug!("Transport event stream ended");
}
