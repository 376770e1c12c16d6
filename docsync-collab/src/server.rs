//! In-memory relay server for the DocSync channel.
//!
//! ```text
//! Client A ──┐
//!             ├── Room (document id) ── snapshot + broadcast channel
//! Client B ──┘
//! ```
//!
//! - `get-document` binds the connection to a room and answers with the
//!   last saved snapshot, then broadcasts the new `user-count`
//! - `send-changes` is fanned out as `receive-changes` to the other peers in
//!   arrival order
//! - `save-document` replaces the stored snapshot
//! - a peer that falls behind the room's fan-out buffer is disconnected
//!
//! No merging and no persistence: deltas are relayed exactly as received.

use std::net::SocketAddr;
use std::sync::Arc;

use docsync_core::{Delta, DocumentId};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{Envelope, Room, RoomManager};
use crate::config::RelayConfig;
use crate::protocol::{ClientMessage, DocumentRequest, ServerMessage};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub changes_relayed: u64,
    pub snapshots_saved: u64,
}

pub struct RelayServer {
    config: RelayConfig,
    rooms: Arc<RoomManager>,
    stats: Arc<RwLock<RelayStats>>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let rooms = Arc::new(RoomManager::new(config.broadcast_capacity));
        Self {
            config,
            rooms,
            stats: Arc::new(RwLock::new(RelayStats::default())),
        }
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        log::info!("Relay listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {}", addr);

            let rooms = self.rooms.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, rooms, stats, config).await {
                    log::error!("Connection error from {}: {}", addr, e);
                }
            });
        }
    }

    /// Last saved snapshot of a document.
    pub async fn document(&self, id: &DocumentId) -> Option<Delta> {
        match self.rooms.get(id).await {
            Some(room) => Some(room.snapshot().await),
            None => None,
        }
    }

    /// Seed a document, e.g. before clients connect.
    pub async fn insert_document(&self, id: DocumentId, snapshot: Delta) {
        self.rooms.get_or_create(id).await.save(snapshot).await;
    }

    pub async fn stats(&self) -> RelayStats {
        self.stats.read().await.clone()
    }
}

struct Binding {
    document_id: DocumentId,
    room: Arc<Room>,
    rx: broadcast::Receiver<Arc<Envelope>>,
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    rooms: Arc<RoomManager>,
    stats: Arc<RwLock<RelayStats>>,
    config: RelayConfig,
) -> Result<(), BoxError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let peer = Uuid::new_v4();
    log::info!("WebSocket connection established from {} as {}", addr, peer);

    {
        let mut s = stats.write().await;
        s.total_connections += 1;
        s.active_connections += 1;
    }

    let mut binding: Option<Binding> = None;

    let result: Result<(), BoxError> = async {
        loop {
            tokio::select! {
                frame = ws_receiver.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let message = match ClientMessage::decode(&text) {
                            Ok(message) => message,
                            Err(e) => {
                                log::warn!("Failed to decode message from {}: {}", addr, e);
                                continue;
                            }
                        };
                        log::debug!("{} -> {}", peer, message.name());

                        match message {
                            ClientMessage::GetDocument(request) => {
                                if let Some(old) = binding.take() {
                                    leave(peer, old).await;
                                }
                                match join(peer, &request, &rooms, &config).await {
                                    Some((bound, snapshot, count)) => {
                                        let reply = ServerMessage::LoadDocument(snapshot).encode()?;
                                        ws_sender.send(Message::Text(reply.into())).await?;
                                        bound.room.broadcast(None, &ServerMessage::UserCount(count))?;
                                        binding = Some(bound);
                                    }
                                    None => {
                                        let reply = ServerMessage::DocumentNotFound(request.document_id).encode()?;
                                        ws_sender.send(Message::Text(reply.into())).await?;
                                    }
                                }
                            }
                            ClientMessage::SendChanges(delta) => match &binding {
                                Some(bound) => {
                                    bound.room.broadcast(Some(peer), &ServerMessage::ReceiveChanges(delta))?;
                                    stats.write().await.changes_relayed += 1;
                                }
                                None => log::warn!("send-changes from unbound peer {}", peer),
                            },
                            ClientMessage::SaveDocument(snapshot) => match &binding {
                                Some(bound) => {
                                    bound.room.save(snapshot).await;
                                    stats.write().await.snapshots_saved += 1;
                                }
                                None => log::warn!("save-document from unbound peer {}", peer),
                            },
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("Connection closed from {}", addr);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_sender.send(Message::Pong(data)).await?;
                    }
                    Some(Err(e)) => {
                        log::warn!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    Some(Ok(_)) => {}
                },

                envelope = async {
                    match binding.as_mut() {
                        Some(bound) => bound.rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => match forward(peer, envelope) {
                    Forward::Send(frame) => ws_sender.send(Message::Text(frame.into())).await?,
                    Forward::Skip => {}
                    Forward::Close => {
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                },
            }
        }
        Ok(())
    }
    .await;

    if let Some(bound) = binding.take() {
        leave(peer, bound).await;
    }
    stats.write().await.active_connections -= 1;
    result
}

enum Forward {
    Send(String),
    /// The peer's own change.
    Skip,
    Close,
}

/// Decide what to do with the next room envelope for `peer`.
///
/// A peer that lagged has missed deltas and can never converge, so its
/// connection is closed; the client rejoins and reloads the snapshot.
fn forward(peer: Uuid, received: Result<Arc<Envelope>, broadcast::error::RecvError>) -> Forward {
    match received {
        Ok(envelope) if envelope.sender == Some(peer) => Forward::Skip,
        Ok(envelope) => Forward::Send(envelope.frame.clone()),
        Err(broadcast::error::RecvError::Lagged(n)) => {
            log::warn!("Peer {} missed {} messages, closing its connection", peer, n);
            Forward::Close
        }
        Err(broadcast::error::RecvError::Closed) => Forward::Close,
    }
}

/// Bind `peer` to the requested document.
///
/// Returns `None` when the document does not exist and may not be created.
async fn join(
    peer: Uuid,
    request: &DocumentRequest,
    rooms: &RoomManager,
    config: &RelayConfig,
) -> Option<(Binding, Delta, u32)> {
    let id = request.document_id;
    let room = if config.create_missing || request.filename.is_some() {
        rooms.get_or_create(id).await
    } else {
        rooms.get(&id).await?
    };

    if room.peer_count().await >= config.max_peers_per_room {
        log::warn!("Room {} is full, refusing {}", id, peer);
        return None;
    }

    let (rx, count) = room.join(peer).await;
    let snapshot = room.snapshot().await;
    log::info!("Peer {} joined {} ({} connected)", peer, id, count);
    let count = u32::try_from(count).unwrap_or(u32::MAX);
    Some((Binding { document_id: id, room, rx }, snapshot, count))
}

async fn leave(peer: Uuid, binding: Binding) {
    let remaining = binding.room.leave(&peer).await;
    log::info!("Peer {} left {} ({} connected)", peer, binding.document_id, remaining);
    let count = u32::try_from(remaining).unwrap_or(u32::MAX);
    if let Err(e) = binding.room.broadcast(None, &ServerMessage::UserCount(count)) {
        log::warn!("Failed to announce user count: {}", e);
    }
}
