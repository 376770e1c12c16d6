//! Event protocol for the realtime channel.
//!
//! Every frame is a JSON text message:
//! ```text
//! {"event": "<name>", "data": <payload>}
//! ```
//!
//! | Direction     | Event                | Payload                         |
//! |---------------|----------------------|---------------------------------|
//! | client→server | `get-document`       | id, or {documentId, username?, filename?} |
//! | server→client | `load-document`      | snapshot delta                  |
//! | client→server | `send-changes`       | delta                           |
//! | server→client | `receive-changes`    | delta                           |
//! | client→server | `save-document`      | snapshot delta                  |
//! | server→client | `user-count`         | integer                         |
//! | server→client | `document-not-found` | id                              |

use docsync_core::{Delta, DocumentId};
use serde::{Deserialize, Serialize};

/// Payload of `get-document`.
///
/// Serialized as a bare id when no extra metadata is present, which is what
/// older clients send; the object form carries metadata for on-demand creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RequestRepr", into = "RequestRepr")]
pub struct DocumentRequest {
    pub document_id: DocumentId,
    pub username: Option<String>,
    pub filename: Option<String>,
}

impl DocumentRequest {
    pub fn new(document_id: DocumentId) -> Self {
        Self { document_id, username: None, filename: None }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RequestRepr {
    Bare(DocumentId),
    #[serde(rename_all = "camelCase")]
    Full {
        document_id: DocumentId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

impl From<RequestRepr> for DocumentRequest {
    fn from(repr: RequestRepr) -> Self {
        match repr {
            RequestRepr::Bare(document_id) => Self::new(document_id),
            RequestRepr::Full { document_id, username, filename } => {
                Self { document_id, username, filename }
            }
        }
    }
}

impl From<DocumentRequest> for RequestRepr {
    fn from(request: DocumentRequest) -> Self {
        match request {
            DocumentRequest { document_id, username: None, filename: None } => {
                RequestRepr::Bare(document_id)
            }
            DocumentRequest { document_id, username, filename } => {
                RequestRepr::Full { document_id, username, filename }
            }
        }
    }
}

/// Messages a client sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    GetDocument(DocumentRequest),
    SendChanges(Delta),
    SaveDocument(Delta),
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    LoadDocument(Delta),
    ReceiveChanges(Delta),
    UserCount(u32),
    DocumentNotFound(DocumentId),
}

/// Discriminant of a [`ServerMessage`], used to route inbound events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    LoadDocument,
    ReceiveChanges,
    UserCount,
    DocumentNotFound,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::LoadDocument => "load-document",
            EventKind::ReceiveChanges => "receive-changes",
            EventKind::UserCount => "user-count",
            EventKind::DocumentNotFound => "document-not-found",
        }
    }
}

impl ClientMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::GetDocument(_) => "get-document",
            ClientMessage::SendChanges(_) => "send-changes",
            ClientMessage::SaveDocument(_) => "save-document",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

impl ServerMessage {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerMessage::LoadDocument(_) => EventKind::LoadDocument,
            ServerMessage::ReceiveChanges(_) => EventKind::ReceiveChanges,
            ServerMessage::UserCount(_) => EventKind::UserCount,
            ServerMessage::DocumentNotFound(_) => EventKind::DocumentNotFound,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("connection closed")]
    ConnectionClosed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_client_frame_shape() {
        let delta = Delta::new().retain(3).insert("x");
        let text = ClientMessage::SendChanges(delta).encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"event": "send-changes", "data": {"ops": [{"retain": 3}, {"insert": "x"}]}})
        );
    }

    #[test]
    fn test_get_document_bare_id() {
        let id = DocumentId::new();
        let text = ClientMessage::GetDocument(DocumentRequest::new(id)).encode().unwrap();
        assert_eq!(text, format!(r#"{{"event":"get-document","data":"{id}"}}"#));
        let decoded = ClientMessage::decode(&text).unwrap();
        assert_eq!(decoded, ClientMessage::GetDocument(DocumentRequest::new(id)));
    }

    #[test]
    fn test_get_document_with_metadata() {
        let id = DocumentId::new();
        let request = DocumentRequest::new(id).with_username("ada").with_filename("Plan");
        let text = ClientMessage::GetDocument(request.clone()).encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["data"]["documentId"], json!(id.to_string()));
        assert_eq!(value["data"]["username"], json!("ada"));
        assert_eq!(ClientMessage::decode(&text).unwrap(), ClientMessage::GetDocument(request));
    }

    #[test]
    fn test_decode_server_events() {
        let load = ServerMessage::decode(r#"{"event":"load-document","data":{"ops":[{"insert":"Hi\n"}]}}"#)
            .unwrap();
        assert_eq!(load, ServerMessage::LoadDocument(Delta::new().insert("Hi\n")));
        assert_eq!(load.kind(), EventKind::LoadDocument);

        let count = ServerMessage::decode(r#"{"event":"user-count","data":4}"#).unwrap();
        assert_eq!(count, ServerMessage::UserCount(4));
        assert_eq!(count.kind().as_str(), "user-count");
    }

    #[test]
    fn test_decode_rejects_unknown_event() {
        assert!(matches!(
            ServerMessage::decode(r#"{"event":"cursor-move","data":1}"#),
            Err(ProtocolError::Decode(_))
        ));
        assert!(ServerMessage::decode("not json").is_err());
    }

    #[test]
    fn test_negative_user_count_is_rejected() {
        assert!(ServerMessage::decode(r#"{"event":"user-count","data":-1}"#).is_err());
    }
}
