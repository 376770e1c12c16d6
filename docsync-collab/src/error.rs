use docsync_core::DocumentId;

use crate::directory::DirectoryError;
use crate::protocol::ProtocolError;

/// Errors that end a session before or while it runs.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("document {0} not found")]
    NotFound(DocumentId),
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("connection closed before the document loaded")]
    ConnectionClosed,
    #[error("timed out waiting for document {0} to load")]
    LoadTimeout(DocumentId),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Directory failure other than a missing document.
    #[error(transparent)]
    Directory(DirectoryError),
}

impl From<DirectoryError> for SessionError {
    fn from(error: DirectoryError) -> Self {
        match error {
            DirectoryError::NotFound(id) => SessionError::NotFound(id),
            other => SessionError::Directory(other),
        }
    }
}

impl SessionError {
    /// Not-found is final; the caller should leave the document view.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SessionError::NotFound(_))
    }
}
