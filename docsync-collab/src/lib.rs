//! # docsync-collab: Real-time document synchronization for DocSync
//!
//! Keeps a [`RichTextSurface`](docsync_core::RichTextSurface) in step with a
//! shared relay over a persistent websocket.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   JSON text frames   ┌─────────────┐
//! │  Session    │ ◄──────────────────► │ RelayServer │
//! │ (per view)  │  {"event","data"}    │  (central)  │
//! └──────┬──────┘                      └──────┬──────┘
//!        │                                    │
//!        ▼                                    ▼
//! ┌─────────────┐                      ┌─────────────┐
//! │ Surface     │                      │ Room        │
//! │ (local doc) │                      │ snapshot +  │
//! └─────────────┘                      │ fan-out     │
//!                                      └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: event names and payloads of the channel
//! - [`transport`]: reconnecting websocket with offline queue, plus a loopback
//! - [`connection`]: connection manager, event routing and emit
//! - [`loader`]: one-shot `get-document` / `load-document` handshake
//! - [`relay`]: Change Relay with origin filtering
//! - [`autosave`]: periodic snapshot saves
//! - [`presence`]: collaborator count and indicator display
//! - [`session`]: session controller, mount and teardown
//! - [`directory`]: HTTP client for the document directory
//! - [`notify`]: user-visible notices
//! - [`broadcast`], [`server`]: in-memory relay server

use std::sync::Arc;

pub mod autosave;
pub mod broadcast;
pub mod config;
pub mod connection;
pub mod directory;
pub mod error;
pub mod loader;
pub mod notify;
pub mod presence;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod session;
pub mod task;
pub mod transport;

/// A surface shared between the session's tasks.
pub type SharedSurface<S> = Arc<tokio::sync::Mutex<S>>;

pub use autosave::AutosaveScheduler;
pub use broadcast::{Envelope, Room, RoomManager, RoomStats};
pub use config::{ClientConfig, ReconnectConfig, RejoinPolicy, RelayConfig};
pub use connection::{Connection, Emitter, Subscription};
pub use directory::{filter_documents, DirectoryClient, DirectoryError, NewDocument};
pub use error::SessionError;
pub use loader::load_document;
pub use notify::{Notice, NoticeLevel, Notifier};
pub use presence::{derive_display, Indicator, PresenceDisplay, PresenceTracker, MAX_INDICATORS};
pub use protocol::{ClientMessage, DocumentRequest, EventKind, ProtocolError, ServerMessage};
pub use relay::ChangeRelay;
pub use server::{RelayServer, RelayStats};
pub use session::Session;
pub use transport::{loopback, websocket, ConnectionState, OfflineQueue, ServerEnd, Transport, TransportEvent};
