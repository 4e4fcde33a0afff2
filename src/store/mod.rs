//! Durable storage for undelivered notes.

pub mod queue;

// Re-export key types
pub use queue::{NoteQueue, StorageError};
