//! Capture side of the pipeline: transcription, the per-note state machine,
//! and the spool watcher that feeds it.

pub mod orchestrator;
pub mod spool;
pub mod transcriber;

pub use orchestrator::{CaptureError, CaptureOutcome, CaptureSession, Orchestrator, Phase};
pub use spool::{SpoolConfig, SpoolError, SpoolHandle, SpoolWatcher};
pub use transcriber::{Transcriber, TranscriptionError, WhisperTranscriber};
