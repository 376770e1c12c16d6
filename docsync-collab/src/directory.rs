//! HTTP client for the document directory service.
//!
//! - `GET  /documents`      list every document
//! - `GET  /document/{id}`  filename and creator of one document
//! - `POST /document`       register a new document

use std::time::Duration;

use docsync_core::{DocumentDetails, DocumentId, DocumentSummary};
use reqwest::{Client, StatusCode};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("document {0} not found")]
    NotFound(DocumentId),
    #[error("directory returned {status}: {body}")]
    Http { status: StatusCode, body: String },
    #[error("directory unreachable: {0}")]
    Network(String),
    #[error("invalid directory response: {0}")]
    Decode(String),
    #[error("Please enter a title for the file.")]
    MissingTitle,
}

/// A document about to be created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewDocument {
    pub id: DocumentId,
    pub username: String,
    pub filename: String,
}

impl NewDocument {
    /// Fresh id for `filename`; the title must not be blank.
    pub fn new(filename: &str, username: impl Into<String>) -> Result<Self, DirectoryError> {
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(DirectoryError::MissingTitle);
        }
        Ok(Self {
            id: DocumentId::new(),
            username: username.into(),
            filename: filename.to_string(),
        })
    }
}

/// Case-insensitive search over filename and creator.
pub fn filter_documents<'a>(documents: &'a [DocumentSummary], term: &str) -> Vec<&'a DocumentSummary> {
    documents.iter().filter(|doc| doc.matches(term)).collect()
}

#[derive(Clone)]
pub struct DirectoryClient {
    base_url: String,
    client: Client,
    timeout: Duration,
}

impl DirectoryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn list_documents(&self) -> Result<Vec<DocumentSummary>, DirectoryError> {
        let response = self
            .client
            .get(format!("{}/documents", self.base_url))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DirectoryError::Network(e.to_string()))?;
        let response = Self::check(response).await?;
        response
            .json()
            .await
            .map_err(|e| DirectoryError::Decode(e.to_string()))
    }

    pub async fn document_details(&self, id: DocumentId) -> Result<DocumentDetails, DirectoryError> {
        let response = self
            .client
            .get(format!("{}/document/{}", self.base_url, id))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DirectoryError::Network(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(DirectoryError::NotFound(id));
        }
        let response = Self::check(response).await?;
        response
            .json()
            .await
            .map_err(|e| DirectoryError::Decode(e.to_string()))
    }

    pub async fn create_document(&self, document: &NewDocument) -> Result<DocumentId, DirectoryError> {
        let response = self
            .client
            .post(format!("{}/document", self.base_url))
            .json(document)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DirectoryError::Network(e.to_string()))?;
        Self::check(response).await?;
        log::info!("Created document {} ({})", document.id, document.filename);
        Ok(document.id)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, DirectoryError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(DirectoryError::Http { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer one HTTP request with `status` and `body`, returning the request text.
    async fn serve_once(status: &'static str, body: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&request) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (base, handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    #[test]
    fn test_new_document_requires_title() {
        assert!(matches!(NewDocument::new("   ", "ada"), Err(DirectoryError::MissingTitle)));
        let doc = NewDocument::new("  Plan ", "ada").unwrap();
        assert_eq!(doc.filename, "Plan");
        assert_eq!(
            DirectoryError::MissingTitle.to_string(),
            "Please enter a title for the file."
        );
    }

    #[test]
    fn test_filter_documents() {
        let docs = vec![
            DocumentSummary { id: DocumentId::new(), filename: "Notes".into(), created_by: "Ada".into(), created_at: None },
            DocumentSummary { id: DocumentId::new(), filename: "Budget".into(), created_by: "Grace".into(), created_at: None },
        ];
        assert_eq!(filter_documents(&docs, "").len(), 2);
        let hits = filter_documents(&docs, "ADA");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].filename, "Notes");
    }

    #[tokio::test]
    async fn test_list_documents() {
        let id = DocumentId::new();
        let body = format!(r#"[{{"_id":"{id}","filename":"Notes","createdBy":"Ada"}}]"#);
        let (base, server) = serve_once("200 OK", body).await;

        let docs = DirectoryClient::new(base).list_documents().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, id);
        assert!(server.await.unwrap().starts_with("GET /documents "));
    }

    #[tokio::test]
    async fn test_details_not_found() {
        let id = DocumentId::new();
        let (base, _server) = serve_once("404 Not Found", "{}".to_string()).await;
        let result = DirectoryClient::new(base).document_details(id).await;
        assert!(matches!(result, Err(DirectoryError::NotFound(missing)) if missing == id));
    }

    #[tokio::test]
    async fn test_create_posts_metadata() {
        let (base, server) = serve_once("201 Created", "{}".to_string()).await;
        let doc = NewDocument::new("Plan", "ada").unwrap();

        let id = DirectoryClient::new(base).create_document(&doc).await.unwrap();
        assert_eq!(id, doc.id);
        let request = server.await.unwrap();
        assert!(request.starts_with("POST /document "));
        assert!(request.contains(r#""filename":"Plan""#));
    }

    #[tokio::test]
    async fn test_server_error_maps_to_http() {
        let (base, _server) = serve_once("500 Internal Server Error", "boom".to_string()).await;
        let result = DirectoryClient::new(base).list_documents().await;
        assert!(matches!(result, Err(DirectoryError::Http { status, .. }) if status == StatusCode::INTERNAL_SERVER_ERROR));
    }
}
