//! Capture-to-delivery state machine.
//!
//! One capture session drives a single note from the stop signal to a
//! terminal state: transcribe, stamp, then deliver immediately or hand the
//! note to the durable queue. A session that queues its note has succeeded;
//! sync happens later. The only lossy paths are an empty transcription and
//! a queue write failure, both of which end the session in an error.
//!
//! Sessions are exclusive: a second start while one is active is refused.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::delivery::DeliveryClient;
use crate::domain::{Note, PipelineStatus, StatusUpdate};
use crate::store::{NoteQueue, StorageError};
use crate::sync::{ConnectivityProbe, DrainSignal};

use super::transcriber::{Transcriber, TranscriptionError};

/// Capacity of the status broadcast channel. Slow subscribers lose old
/// updates rather than blocking the pipeline.
const STATUS_CHANNEL_CAPACITY: usize = 32;

/// Errors that end a capture session without a delivered or queued note
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No target document is configured; the start signal is refused
    #[error("no target document configured")]
    TargetNotConfigured,

    /// Another capture session is already active
    #[error("a capture session is already active")]
    Busy,

    /// The transcription came back empty; nothing to deliver or queue
    #[error("no speech detected")]
    EmptyTranscription,

    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    /// The offline queue refused the note. The one path where a
    /// transcription is lost.
    #[error("failed to queue note: {0}")]
    Storage(#[from] StorageError),
}

/// What the pipeline is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Capturing,
    Transcribing,
    DeliveringImmediate,
    Queuing,
}

/// Terminal result of a finished capture session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The note went straight into the target document
    Delivered,
    /// The note is parked in the offline queue under this id
    Queued(i64),
}

/// Drives capture sessions and owns the status broadcast.
///
/// All collaborators are injected; tests swap in fakes for the transcriber,
/// the sink behind [`DeliveryClient`], and the connectivity probe.
pub struct Orchestrator {
    transcriber: Arc<dyn Transcriber>,
    delivery: DeliveryClient,
    connectivity: Arc<dyn ConnectivityProbe>,
    queue: NoteQueue,
    target: Option<String>,
    status_tx: broadcast::Sender<StatusUpdate>,
    drain_tx: Option<mpsc::Sender<DrainSignal>>,
    phase: Mutex<Phase>,
}

impl Orchestrator {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        delivery: DeliveryClient,
        connectivity: Arc<dyn ConnectivityProbe>,
        queue: NoteQueue,
        target: Option<String>,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            transcriber,
            delivery,
            connectivity,
            queue,
            target,
            status_tx,
            drain_tx: None,
            phase: Mutex::new(Phase::Idle),
        }
    }

    /// Wire in the drain scheduler so an offline handoff wakes it
    pub fn with_drain_signal(mut self, drain_tx: mpsc::Sender<DrainSignal>) -> Self {
        self.drain_tx = Some(drain_tx);
        self
    }

    /// Subscribe to pipeline status updates. Fire-and-forget on the sending
    /// side; subscribing late or not at all never affects delivery.
    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusUpdate> {
        self.status_tx.subscribe()
    }

    /// Current phase; `Idle` when no session is active
    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start signal. Refused while a session is active (the second press is
    /// a logged no-op) and when no target document is configured.
    pub fn begin(&self) -> Result<CaptureSession<'_>, CaptureError> {
        let session = Uuid::new_v4();

        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *phase != Phase::Idle {
            warn!("Capture start ignored: a session is already active");
            return Err(CaptureError::Busy);
        }

        let Some(target) = self.target.clone() else {
            drop(phase);
            self.emit(
                session,
                PipelineStatus::Error,
                Some("no target document configured".to_string()),
            );
            return Err(CaptureError::TargetNotConfigured);
        };

        *phase = Phase::Capturing;
        drop(phase);

        info!(%session, "Capture started");
        self.emit(session, PipelineStatus::Recording, None);

        Ok(CaptureSession {
            orchestrator: self,
            session,
            target,
            finished: false,
        })
    }

    /// Run a full session over an already-recorded audio file
    pub async fn capture_file(&self, audio: &Path) -> Result<CaptureOutcome, CaptureError> {
        self.begin()?.finish(audio).await
    }

    fn set_phase(&self, next: Phase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn emit(&self, session: Uuid, status: PipelineStatus, detail: Option<String>) {
        let mut update = StatusUpdate::new(session, status);
        if let Some(detail) = detail {
            update = update.with_detail(detail);
        }
        // Zero subscribers is fine
        let _ = self.status_tx.send(update);
    }
}

/// An active capture session, created by [`Orchestrator::begin`].
///
/// Dropping the session without calling [`finish`](Self::finish) cancels the
/// capture, discards the audio, and returns the pipeline to idle.
pub struct CaptureSession<'a> {
    orchestrator: &'a Orchestrator,
    session: Uuid,
    target: String,
    finished: bool,
}

impl CaptureSession<'_> {
    pub fn id(&self) -> Uuid {
        self.session
    }

    /// Stop signal: fix the capture time, transcribe the audio, then run the
    /// note to a terminal state.
    ///
    /// The capture time is taken here, once, before transcription; retries
    /// from the queue keep this original timestamp no matter how much later
    /// they run.
    pub async fn finish(mut self, audio: &Path) -> Result<CaptureOutcome, CaptureError> {
        self.finished = true;

        let captured_at = Utc::now();
        let result = self.run(audio, captured_at).await;

        if let Err(e) = &result {
            warn!(session = %self.session, "Capture session failed: {}", e);
            self.orchestrator
                .emit(self.session, PipelineStatus::Error, Some(e.to_string()));
        }

        result
    }

    async fn run(
        &self,
        audio: &Path,
        captured_at: DateTime<Utc>,
    ) -> Result<CaptureOutcome, CaptureError> {
        let orch = self.orchestrator;

        orch.set_phase(Phase::Transcribing);
        orch.emit(self.session, PipelineStatus::Transcribing, None);

        let text = orch.transcriber.transcribe(audio).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(CaptureError::EmptyTranscription);
        }

        let note = Note::new(captured_at, text, self.target.clone());

        orch.set_phase(Phase::DeliveringImmediate);

        if orch.connectivity.is_reachable().await {
            orch.emit(self.session, PipelineStatus::Syncing, None);

            let outcome = orch.delivery.deliver(&note.target, &note.document_text()).await;
            if outcome.is_delivered() {
                info!(session = %self.session, "Note delivered");
                orch.emit(self.session, PipelineStatus::Done, None);
                return Ok(CaptureOutcome::Delivered);
            }

            warn!(
                session = %self.session,
                "Immediate delivery failed ({}); queueing note",
                outcome.failure_reason().unwrap_or("unknown error")
            );
        } else {
            info!(session = %self.session, "Remote unreachable; queueing note");
        }

        // Durable handoff. Once insert returns, the note survives anything.
        orch.set_phase(Phase::Queuing);
        let id = orch.queue.insert(&note)?;

        info!(session = %self.session, note_id = id, "Note queued for sync");
        orch.emit(
            self.session,
            PipelineStatus::OfflineQueued,
            Some(format!("note {}", id)),
        );

        if let Some(drain_tx) = &orch.drain_tx {
            // Fire-and-forget wake; a full channel means a drain is already
            // pending
            let _ = drain_tx.try_send(DrainSignal::NoteQueued);
        }

        Ok(CaptureOutcome::Queued(id))
    }
}

impl Drop for CaptureSession<'_> {
    fn drop(&mut self) {
        let mut phase = self
            .orchestrator
            .phase
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if !self.finished {
            match *phase {
                Phase::Capturing => {
                    debug!(session = %self.session, "Capture cancelled, audio discarded")
                }
                _ => warn!(session = %self.session, "Capture session dropped mid-flight"),
            }
        }

        *phase = Phase::Idle;
    }
}
