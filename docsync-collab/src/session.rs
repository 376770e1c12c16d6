//! Session Controller: one open document view.
//!
//! Mount order is Connection, Presence, Relay listeners, Loader, then the
//! Relay pumps, the not-found watch and Autosave. The relay listens before
//! `get-document` goes out so nothing that follows `load-document` is missed.
//! Everything mounted is owned by the session and released in reverse order
//! by [`Session::close`], or aborted if the session is simply dropped.

use docsync_core::{DocumentDetails, DocumentId, RichTextSurface};
use tokio::sync::watch;

use crate::autosave::AutosaveScheduler;
use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::directory::DirectoryClient;
use crate::error::SessionError;
use crate::loader::load_document;
use crate::notify::Notifier;
use crate::presence::{PresenceDisplay, PresenceTracker};
use crate::protocol::{DocumentRequest, EventKind, ServerMessage};
use crate::relay::ChangeRelay;
use crate::task::TaskGuard;
use crate::transport::{self, ConnectionState, Transport};
use crate::SharedSurface;

pub const NOT_FOUND_NOTICE: &str = "File Not Found !";
pub const DIRECTORY_FAILURE_NOTICE: &str = "Error fetching documents";

enum Mounted<S: RichTextSurface> {
    Connection(Connection),
    Presence(PresenceTracker),
    Relay(ChangeRelay<S>),
    Watch(TaskGuard),
    Autosave(AutosaveScheduler),
}

impl<S: RichTextSurface> Mounted<S> {
    async fn release(self) {
        match self {
            Mounted::Autosave(autosave) => autosave.stop().await,
            Mounted::Watch(task) => task.cancel().await,
            Mounted::Relay(relay) => relay.stop().await,
            Mounted::Presence(presence) => presence.stop().await,
            Mounted::Connection(connection) => connection.close().await,
        }
    }
}

pub struct Session<S: RichTextSurface> {
    document_id: DocumentId,
    surface: SharedSurface<S>,
    details: Option<DocumentDetails>,
    notifier: Notifier,
    mounted: Vec<Mounted<S>>,
}

impl<S: RichTextSurface> Session<S> {
    /// Look the document up in the directory (when configured), connect to
    /// the realtime server and load the document into `surface`.
    ///
    /// A directory miss is fatal. Any other directory failure only posts a
    /// notice. Requests that carry a filename create a new document, so the
    /// lookup is skipped for them.
    pub async fn connect(
        config: &ClientConfig,
        request: DocumentRequest,
        surface: SharedSurface<S>,
        notifier: Notifier,
    ) -> Result<Self, SessionError> {
        let details = match (&config.directory_url, &request.filename) {
            (Some(url), None) => {
                let directory = DirectoryClient::new(url.as_str());
                match directory.document_details(request.document_id).await.map_err(SessionError::from) {
                    Ok(details) => Some(details),
                    Err(e) if e.is_not_found() => {
                        notifier.error(NOT_FOUND_NOTICE);
                        return Err(e);
                    }
                    Err(e) => {
                        log::warn!("Directory lookup failed: {}", e);
                        notifier.error(DIRECTORY_FAILURE_NOTICE);
                        None
                    }
                }
            }
            _ => None,
        };

        let transport = transport::websocket(config.server_url.as_str(), config);
        let mut session = Self::open(config, request, surface, transport, notifier).await?;
        session.details = details;
        Ok(session)
    }

    /// Run the session over an existing transport.
    pub async fn open(
        config: &ClientConfig,
        request: DocumentRequest,
        surface: SharedSurface<S>,
        transport: Transport,
        notifier: Notifier,
    ) -> Result<Self, SessionError> {
        let document_id = request.document_id;
        let mut session = Self {
            document_id,
            surface,
            details: None,
            notifier,
            mounted: Vec::new(),
        };

        let connection = Connection::open(transport, config.server_url.as_str(), config.load_timeout).await?;
        let presence = PresenceTracker::start(&connection);
        let relay = ChangeRelay::attach(&connection, session.surface.clone()).await;
        let loaded = load_document(
            &connection,
            &session.surface,
            request,
            config.load_timeout,
            config.rejoin_policy,
        )
        .await;

        if let Err(e) = loaded {
            session.mounted = vec![
                Mounted::Connection(connection),
                Mounted::Presence(presence),
                Mounted::Relay(relay),
            ];
            if e.is_not_found() {
                session.notifier.error(NOT_FOUND_NOTICE);
            }
            session.close().await;
            return Err(e);
        }

        let relay = relay.start();
        let not_found = watch_not_found(&connection, document_id, session.notifier.clone());
        let autosave = AutosaveScheduler::start(&connection, session.surface.clone(), config.autosave_interval);
        session.mounted = vec![
            Mounted::Connection(connection),
            Mounted::Presence(presence),
            Mounted::Relay(relay),
            Mounted::Watch(not_found),
            Mounted::Autosave(autosave),
        ];

        log::info!("Session for {} ready", document_id);
        Ok(session)
    }

    pub fn document_id(&self) -> DocumentId {
        self.document_id
    }

    pub fn surface(&self) -> &SharedSurface<S> {
        &self.surface
    }

    /// Directory metadata, if the lookup ran and succeeded.
    pub fn details(&self) -> Option<&DocumentDetails> {
        self.details.as_ref()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn user_count(&self) -> u32 {
        self.presence().map_or(0, PresenceTracker::count)
    }

    pub fn presence_display(&self) -> PresenceDisplay {
        self.presence().map(PresenceTracker::display).unwrap_or_default()
    }

    pub fn watch_presence(&self) -> Option<watch::Receiver<u32>> {
        self.presence().map(PresenceTracker::watch)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection()
            .map_or(ConnectionState::Disconnected, Connection::state)
    }

    /// Tear everything down in reverse mount order. Afterwards nothing is
    /// sent and the surface is never touched again by this session.
    pub async fn close(mut self) {
        while let Some(mounted) = self.mounted.pop() {
            mounted.release().await;
        }
        log::info!("Session for {} closed", self.document_id);
    }

    fn connection(&self) -> Option<&Connection> {
        self.mounted.iter().find_map(|mounted| match mounted {
            Mounted::Connection(connection) => Some(connection),
            _ => None,
        })
    }

    fn presence(&self) -> Option<&PresenceTracker> {
        self.mounted.iter().find_map(|mounted| match mounted {
            Mounted::Presence(presence) => Some(presence),
            _ => None,
        })
    }
}

/// Reports a `document-not-found` answer to a rejoin after reconnecting.
///
/// The session keeps running on its local copy; the user is told the server
/// no longer knows the document.
fn watch_not_found(connection: &Connection, document_id: DocumentId, notifier: Notifier) -> TaskGuard {
    let mut missing = connection.on(EventKind::DocumentNotFound);
    TaskGuard::spawn(async move {
        while let Some(message) = missing.recv().await {
            if let ServerMessage::DocumentNotFound(id) = message {
                log::warn!("Server lost document {} after reconnect (asked for {})", id, document_id);
                notifier.error(NOT_FOUND_NOTICE);
            }
        }
    })
}
