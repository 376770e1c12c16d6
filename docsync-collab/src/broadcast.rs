//! Per-document rooms for the relay server.
//!
//! Every room owns one tokio broadcast channel. A frame is encoded once and
//! handed to all subscribers as an [`Envelope`]; each connection skips the
//! envelopes it sent itself.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use docsync_core::{Delta, DocumentId};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{ProtocolError, ServerMessage};

/// A pre-encoded frame plus the peer it came from (`None` = everyone).
#[derive(Debug)]
pub struct Envelope {
    pub sender: Option<Uuid>,
    pub frame: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomStats {
    pub messages_sent: u64,
    pub active_peers: usize,
}

/// One document: its peers, its last saved snapshot and its fan-out channel.
pub struct Room {
    sender: broadcast::Sender<Arc<Envelope>>,
    peers: RwLock<HashSet<Uuid>>,
    snapshot: RwLock<Delta>,
    messages_sent: AtomicU64,
}

impl Room {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            peers: RwLock::new(HashSet::new()),
            snapshot: RwLock::new(Delta::new()),
            messages_sent: AtomicU64::new(0),
        }
    }

    /// Add a peer. Returns its receiver and the new peer count.
    pub async fn join(&self, peer: Uuid) -> (broadcast::Receiver<Arc<Envelope>>, usize) {
        let mut peers = self.peers.write().await;
        peers.insert(peer);
        (self.sender.subscribe(), peers.len())
    }

    /// Remove a peer. Returns the remaining peer count.
    pub async fn leave(&self, peer: &Uuid) -> usize {
        let mut peers = self.peers.write().await;
        peers.remove(peer);
        peers.len()
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn snapshot(&self) -> Delta {
        self.snapshot.read().await.clone()
    }

    /// Replace the stored snapshot.
    pub async fn save(&self, snapshot: Delta) {
        *self.snapshot.write().await = snapshot;
    }

    /// Fan `message` out to every subscriber. Returns how many received it.
    pub fn broadcast(&self, sender: Option<Uuid>, message: &ServerMessage) -> Result<usize, ProtocolError> {
        let frame = message.encode()?;
        let count = self
            .sender
            .send(Arc::new(Envelope { sender, frame }))
            .unwrap_or(0);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(count)
    }

    pub async fn stats(&self) -> RoomStats {
        RoomStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            active_peers: self.peer_count().await,
        }
    }
}

/// Document id → room. Rooms outlive their peers so snapshots survive.
pub struct RoomManager {
    rooms: RwLock<HashMap<DocumentId, Arc<Room>>>,
    capacity: usize,
}

impl RoomManager {
    pub fn new(capacity: usize) -> Self {
        Self { rooms: RwLock::new(HashMap::new()), capacity }
    }

    pub async fn get(&self, id: &DocumentId) -> Option<Arc<Room>> {
        self.rooms.read().await.get(id).cloned()
    }

    pub async fn get_or_create(&self, id: DocumentId) -> Arc<Room> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(&id) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(id)
            .or_insert_with(|| {
                log::info!("Created room {}", id);
                Arc::new(Room::new(self.capacity))
            })
            .clone()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn document_ids(&self) -> Vec<DocumentId> {
        self.rooms.read().await.keys().copied().collect()
    }
}
