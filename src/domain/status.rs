//! Status updates broadcast by the pipeline.
//!
//! Observers subscribe to a broadcast channel and receive one update per
//! state transition. Sending is fire-and-forget: zero subscribers is normal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a capture session currently stands, as shown to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Capture in progress
    Recording,

    /// Audio handed to the transcriber
    Transcribing,

    /// Delivery attempt in progress
    Syncing,

    /// Delivered to the document
    Done,

    /// Parked in the offline queue for a later drain
    OfflineQueued,

    /// Session ended in an error; nothing was queued
    Error,
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PipelineStatus::Recording => "recording",
            PipelineStatus::Transcribing => "transcribing",
            PipelineStatus::Syncing => "syncing",
            PipelineStatus::Done => "done",
            PipelineStatus::OfflineQueued => "offline_queued",
            PipelineStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// One status update from a capture session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Capture session this update belongs to
    pub session: Uuid,

    pub status: PipelineStatus,

    /// Optional human-readable detail (error message, queue id)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// When the update was emitted
    pub at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn new(session: Uuid, status: PipelineStatus) -> Self {
        Self {
            session,
            status,
            detail: None,
            at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
