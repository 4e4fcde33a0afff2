//! Delivery of notes to the remote document service.
//!
//! The pipeline talks to the remote side through the [`DocumentSink`] trait;
//! [`HttpDocumentSink`] is the shipped implementation. [`DeliveryClient`]
//! wraps a sink and turns its errors into a retry classification.

pub mod client;
pub mod http;

use async_trait::async_trait;
use thiserror::Error;

// Re-export the concrete client and outcome types
pub use client::{DeliveryClient, DeliveryOutcome};
pub use http::{DocumentInfo, HttpDocumentSink};

/// Errors from a document sink
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    /// The request never produced an HTTP response (connect, DNS, timeout)
    #[error("network error: {0}")]
    Network(String),

    /// The service answered with a non-success status
    #[error("service returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
}

/// Write access to remote documents
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Insert `text` verbatim at the logical head of the document, the index
    /// immediately after any document preamble.
    async fn insert_at_head(&self, target_id: &str, text: &str) -> Result<(), SinkError>;
}
