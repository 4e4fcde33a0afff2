//! notedrop - offline-tolerant voice note delivery
//!
//! Turns captured audio into a transcribed, timestamped note and inserts it
//! at the head of a remote document. When the service is unreachable the
//! note is parked in a durable local queue and drained later; once a
//! transcription exists, it survives crashes, restarts, and outages.
//!
//! # Architecture
//!
//! The pipeline is a small state machine per note:
//! - Capture fixes the timestamp, then transcription produces the body
//! - Online, the note is delivered immediately; offline (or on failure),
//!   it is written to a SQLite-backed queue before the session ends
//! - A drain scheduler empties the queue oldest-first, retrying with
//!   exponential backoff and waking early on new notes, restored
//!   connectivity, or a manual sync
//!
//! # Modules
//!
//! - `capture`: transcription, the per-note state machine, spool watcher
//! - `delivery`: the document sink and failure classification
//! - `store`: the durable offline queue
//! - `sync`: connectivity probing and drain scheduling
//! - `domain`: note and status types
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Process one recording
//! notedrop capture memo.wav
//!
//! # Run the daemon
//! notedrop watch
//!
//! # Inspect and drain the offline queue
//! notedrop queue list
//! notedrop queue sync
//! ```

pub mod capture;
pub mod cli;
pub mod config;
pub mod delivery;
pub mod domain;
pub mod store;
pub mod sync;

// Re-export main types at crate root for convenience
pub use capture::{
    CaptureError, CaptureOutcome, Orchestrator, SpoolConfig, SpoolWatcher, Transcriber,
    TranscriptionError, WhisperTranscriber,
};
pub use config::ResolvedConfig;
pub use delivery::{DeliveryClient, DeliveryOutcome, DocumentSink, HttpDocumentSink, SinkError};
pub use domain::{Note, PipelineStatus, QueuedNote, StatusUpdate};
pub use store::{NoteQueue, StorageError};
pub use sync::{
    drain_once, BackoffPolicy, ConnectivityMonitor, ConnectivityProbe, DrainOutcome,
    DrainReport, DrainScheduler, DrainSignal, HttpProbe, SchedulerConfig,
};
