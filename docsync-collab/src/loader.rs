//! Document Loader: the one-time `get-document` / `load-document` handshake.

use std::time::Duration;

use docsync_core::{ChangeOrigin, RichTextSurface};

use crate::config::RejoinPolicy;
use crate::connection::Connection;
use crate::error::SessionError;
use crate::protocol::{ClientMessage, DocumentRequest, EventKind, ServerMessage};
use crate::SharedSurface;

/// Load `request.document_id` into `surface`.
///
/// The surface stays read-only until the snapshot has been applied. A
/// `document-not-found` reply ends the load with [`SessionError::NotFound`];
/// nothing is retried. Only the first `load-document` is ever applied; a
/// `document-not-found` answering a later rejoin is reported by the session.
pub async fn load_document<S: RichTextSurface>(
    connection: &Connection,
    surface: &SharedSurface<S>,
    request: DocumentRequest,
    timeout: Option<Duration>,
    rejoin: RejoinPolicy,
) -> Result<(), SessionError> {
    let document_id = request.document_id;
    surface.lock().await.disable();

    let mut loaded = connection.once(EventKind::LoadDocument);
    let mut missing = connection.once(EventKind::DocumentNotFound);
    connection.emit(ClientMessage::GetDocument(request.clone())).await?;
    log::info!("Requested document {}", document_id);

    let wait = async {
        tokio::select! {
            message = loaded.recv() => message,
            message = missing.recv() => message,
        }
    };
    let reply = match timeout {
        Some(limit) => tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| SessionError::LoadTimeout(document_id))?,
        None => wait.await,
    };

    match reply {
        Some(ServerMessage::LoadDocument(snapshot)) => {
            let mut surface = surface.lock().await;
            surface.set_contents(snapshot, ChangeOrigin::ProgrammaticEdit);
            surface.enable();
            drop(surface);

            if rejoin == RejoinPolicy::Rebind {
                connection.set_rejoin(Some(ClientMessage::GetDocument(request)));
            }
            log::info!("Loaded document {}", document_id);
            Ok(())
        }
        Some(ServerMessage::DocumentNotFound(id)) => {
            log::warn!("Server has no document {}", id);
            Err(SessionError::NotFound(document_id))
        }
        Some(other) => {
            log::warn!("Unexpected reply to get-document: {:?}", other.kind());
            Err(SessionError::ConnectionClosed)
        }
        None => Err(SessionError::ConnectionClosed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback;
    use docsync_core::{Delta, DocumentId, MemorySurface};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    async fn setup() -> (Connection, crate::transport::ServerEnd, SharedSurface<MemorySurface>) {
        let (transport, server) = loopback(16);
        let connection = Connection::open(transport, "loopback", None).await.unwrap();
        (connection, server, Arc::new(Mutex::new(MemorySurface::default())))
    }

    #[tokio::test]
    async fn test_load_applies_snapshot_then_enables() {
        let (connection, mut server, surface) = setup().await;
        let id = DocumentId::new();
        let snapshot = Delta::new().insert("Hello\n");

        let script = async {
            assert_eq!(
                server.recv().await,
                Some(ClientMessage::GetDocument(DocumentRequest::new(id)))
            );
            assert!(!surface.lock().await.is_enabled());
            server.send(ServerMessage::LoadDocument(snapshot.clone())).await;
        };
        let load = load_document(&connection, &surface, DocumentRequest::new(id), None, RejoinPolicy::Stay);
        let (result, ()) = tokio::join!(load, script);

        result.unwrap();
        let surface = surface.lock().await;
        assert!(surface.is_enabled());
        assert_eq!(surface.contents(), snapshot);
    }

    #[tokio::test]
    async fn test_not_found_keeps_surface_read_only() {
        let (connection, mut server, surface) = setup().await;
        let id = DocumentId::new();

        let script = async {
            server.recv().await;
            server.send(ServerMessage::DocumentNotFound(id)).await;
        };
        let load = load_document(&connection, &surface, DocumentRequest::new(id), None, RejoinPolicy::Stay);
        let (result, ()) = tokio::join!(load, script);

        assert!(matches!(result, Err(SessionError::NotFound(missing)) if missing == id));
        assert!(!surface.lock().await.is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_times_out() {
        let (connection, _server, surface) = setup().await;
        let id = DocumentId::new();
        let result = load_document(
            &connection,
            &surface,
            DocumentRequest::new(id),
            Some(Duration::from_secs(10)),
            RejoinPolicy::Stay,
        )
        .await;
        assert!(matches!(result, Err(SessionError::LoadTimeout(_))));
    }

    #[tokio::test]
    async fn test_rebind_registers_rejoin_message() {
        let (connection, mut server, surface) = setup().await;
        let id = DocumentId::new();

        let script = async {
            server.recv().await;
            server.send(ServerMessage::LoadDocument(Delta::new().insert("\n"))).await;
        };
        let load = load_document(&connection, &surface, DocumentRequest::new(id), None, RejoinPolicy::Rebind);
        let (result, ()) = tokio::join!(load, script);
        result.unwrap();

        server.disconnect().await;
        server.reconnect().await;
        assert_eq!(
            server.recv().await,
            Some(ClientMessage::GetDocument(DocumentRequest::new(id)))
        );
    }
}
