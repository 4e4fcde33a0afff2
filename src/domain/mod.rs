//! Domain types for the note pipeline.
//!
//! This module contains the core data structures:
//! - Note: an in-flight transcribed note
//! - QueuedNote: a note persisted in the offline queue
//! - StatusUpdate: progress broadcast to observers

pub mod note;
pub mod status;

// Re-export commonly used types
pub use note::{render_display_timestamp, Note, QueuedNote};
pub use status::{PipelineStatus, StatusUpdate};
