//! Note records flowing through the pipeline.
//!
//! A note exists in exactly one of two forms: in-flight (owned by the
//! orchestrator, not yet durable) or queued (a persisted row awaiting
//! delivery). The two structs keep that distinction visible in the types:
//! only `QueuedNote` carries an id, a queue timestamp, and attempt
//! bookkeeping.

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Rendering of capture instants in delivered text, e.g. `2025-12-22, Mon, 16:00`
const DISPLAY_FORMAT: &str = "%Y-%m-%d, %a, %H:%M";

/// An in-flight note: transcribed and stamped, not yet delivered or queued
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    /// When the capture stopped (drives delivery order)
    pub captured_at: DateTime<Utc>,

    /// Human-readable capture time, rendered once at creation and stored
    /// verbatim from then on
    pub display_timestamp: String,

    /// Transcription text (never empty; enforced upstream)
    pub body: String,

    /// Id of the document this note is destined for
    pub target: String,
}

impl Note {
    /// Create a note stamped with the given capture instant.
    ///
    /// The display timestamp is rendered in local time here and never
    /// recomputed, so the delivered text reflects the wall clock at capture
    /// even if the host timezone changes before delivery.
    pub fn new(
        captured_at: DateTime<Utc>,
        body: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            captured_at,
            display_timestamp: render_display_timestamp(&captured_at.with_timezone(&Local)),
            body: body.into(),
            target: target.into(),
        }
    }

    /// The text inserted at the head of the target document:
    /// display timestamp, newline, body.
    pub fn document_text(&self) -> String {
        document_text(&self.display_timestamp, &self.body)
    }
}

/// A note persisted in the offline queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedNote {
    /// Queue-assigned id, stable for the record's lifetime
    pub id: i64,

    pub captured_at: DateTime<Utc>,
    pub display_timestamp: String,
    pub body: String,
    pub target: String,

    /// When the record entered the queue
    pub queued_at: DateTime<Utc>,

    /// Failed delivery attempts recorded so far (0 until a drain fails)
    pub attempt_count: u32,

    /// Message of the most recent failed attempt
    pub last_error: Option<String>,
}

impl QueuedNote {
    /// Same framing as [`Note::document_text`]
    pub fn document_text(&self) -> String {
        document_text(&self.display_timestamp, &self.body)
    }

    /// Short preview of the body for list output
    pub fn preview(&self, max_chars: usize) -> String {
        let flat = self.body.replace('\n', " ");
        if flat.chars().count() > max_chars {
            let cut: String = flat.chars().take(max_chars.saturating_sub(3)).collect();
            format!("{}...", cut)
        } else {
            flat
        }
    }
}

/// Render a capture instant as `YYYY-MM-DD, Ddd, HH:MM`
pub fn render_display_timestamp<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    at.format(DISPLAY_FORMAT).to_string()
}

fn document_text(display_timestamp: &str, body: &str) -> String {
    format!("{}\n{}", display_timestamp, body)
}
