//! # docsync-core: Document model shared by the DocSync client and relay
//!
//! - [`delta`]: rich-text deltas (insert/retain/delete with attributes)
//! - [`surface`]: the editable surface contract and an in-memory implementation
//!
//! Everything here is transport-agnostic; `docsync-collab` moves these values
//! over the wire.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod delta;
pub mod surface;

pub use delta::{Attributes, Delta, Insert, Op};
pub use surface::{
    ChangeEvent, ChangeOrigin, EditorConfig, Format, ListenerId, MemorySurface,
    RichTextSurface, SurfaceError,
};

/// Opaque, globally unique document identifier.
///
/// Generated client-side when a document is created and used as the
/// correlation key for every message on the realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Shareable address of the document view under `base`.
    pub fn share_url(&self, base: &str) -> String {
        format!("{}/documents/{}", base.trim_end_matches('/'), self)
    }

    /// Extract an identifier from a bare id or a document link.
    ///
    /// Links look like `<base>/documents/<id>` with an optional trailing
    /// `/<title>` segment.
    pub fn from_link(link: &str) -> Result<Self, ParseDocumentIdError> {
        if let Ok(id) = link.trim().parse() {
            return Ok(id);
        }
        let mut segments = link.trim().trim_end_matches('/').split('/');
        while let Some(segment) = segments.next() {
            if segment == "documents" || segment == "document" {
                if let Some(candidate) = segments.next() {
                    return candidate.parse();
                }
            }
        }
        Err(ParseDocumentIdError(link.to_string()))
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for DocumentId {
    type Err = ParseDocumentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ParseDocumentIdError(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid document id: {0:?}")]
pub struct ParseDocumentIdError(String);

/// Metadata returned by the directory for a single document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDetails {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub created_by: String,
}

/// One row of the directory listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    #[serde(alias = "_id")]
    pub id: DocumentId,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub created_by: String,
    /// Creation timestamp as reported by the directory (RFC 3339).
    #[serde(default)]
    pub created_at: Option<String>,
}

impl DocumentSummary {
    /// Case-insensitive match on filename or creator.
    pub fn matches(&self, term: &str) -> bool {
        let term = term.to_lowercase();
        self.filename.to_lowercase().contains(&term)
            || self.created_by.to_lowercase().contains(&term)
    }
}
