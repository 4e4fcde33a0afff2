//! HTTP client for the document service.
//!
//! Endpoints:
//! - `POST {base}/v1/documents/{id}:insertText` with a head location
//! - `GET {base}/v1/documents` for target discovery
//!
//! Auth: optional bearer token.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{DocumentSink, SinkError};

/// Per-request timeout; anything slower counts as a network failure
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Document service client
pub struct HttpDocumentSink {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

/// Payload for the insertText call
#[derive(Debug, Serialize)]
struct InsertTextRequest<'a> {
    text: &'a str,
    location: InsertLocation,
}

#[derive(Debug, Serialize)]
struct InsertLocation {
    /// Index 1 is the first insertable position, right after the
    /// document's implicit start
    index: u32,
}

/// One document visible to the token
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub modified_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DocumentListResponse {
    #[serde(default)]
    documents: Vec<DocumentInfo>,
}

impl HttpDocumentSink {
    /// Create a new client
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }

    /// List documents the configured token can see, for picking a target id
    pub async fn list_documents(&self) -> Result<Vec<DocumentInfo>, SinkError> {
        let url = format!("{}/v1/documents", self.base_url);

        let response = self
            .authorize(self.client.get(&url))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status, response).await);
        }

        let list: DocumentListResponse = response
            .json()
            .await
            .map_err(|e| SinkError::Network(format!("malformed document list: {}", e)))?;

        Ok(list.documents)
    }
}

#[async_trait]
impl DocumentSink for HttpDocumentSink {
    async fn insert_at_head(&self, target_id: &str, text: &str) -> Result<(), SinkError> {
        let url = format!("{}/v1/documents/{}:insertText", self.base_url, target_id);

        let payload = InsertTextRequest {
            text,
            location: InsertLocation { index: 1 },
        };

        let response = self
            .authorize(self.client.post(&url))
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!("Inserted {} chars at head of {}", text.len(), target_id);
            return Ok(());
        }

        Err(api_error(status, response).await)
    }
}

fn network_error(error: reqwest::Error) -> SinkError {
    if error.is_timeout() {
        SinkError::Network(format!("request timed out: {}", error))
    } else {
        SinkError::Network(error.to_string())
    }
}

async fn api_error(status: reqwest::StatusCode, response: reqwest::Response) -> SinkError {
    let mut message = response.text().await.unwrap_or_default();
    if message.is_empty() {
        message = status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string();
    }

    SinkError::Api {
        status: status.as_u16(),
        message,
    }
}
