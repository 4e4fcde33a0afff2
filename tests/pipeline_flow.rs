//! Capture Pipeline Tests
//!
//! Drive the orchestrator with fakes to cover the path from capture to
//! eventual delivery, including an outage in the middle.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use notedrop::capture::{CaptureOutcome, Orchestrator, Transcriber, TranscriptionError};
use notedrop::delivery::{DeliveryClient, DocumentSink, SinkError};
use notedrop::store::NoteQueue;
use notedrop::sync::{drain_once, ConnectivityProbe, DrainOutcome};

struct FixedTranscriber(String);

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(&self, _audio: &Path) -> Result<String, TranscriptionError> {
        Ok(self.0.clone())
    }
}

/// Sink that records deliveries and can be switched on and off
struct TogglableSink {
    up: AtomicBool,
    delivered: Mutex<Vec<String>>,
}

impl TogglableSink {
    fn starting(up: bool) -> Arc<Self> {
        Arc::new(Self {
            up: AtomicBool::new(up),
            delivered: Mutex::new(Vec::new()),
        })
    }

    fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentSink for TogglableSink {
    async fn insert_at_head(&self, _target_id: &str, text: &str) -> Result<(), SinkError> {
        if !self.up.load(Ordering::SeqCst) {
            return Err(SinkError::Network("connection refused".into()));
        }
        self.delivered.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Probe that mirrors the sink's availability
struct TogglableProbe(Arc<TogglableSink>);

#[async_trait]
impl ConnectivityProbe for TogglableProbe {
    async fn is_reachable(&self) -> bool {
        self.0.up.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn test_note_captured_offline_survives_until_delivered() {
    let queue = NoteQueue::open_in_memory().unwrap();
    let sink = TogglableSink::starting(false);
    let client = DeliveryClient::new(sink.clone());

    let orchestrator = Orchestrator::new(
        Arc::new(FixedTranscriber("remember the bread".into())),
        client.clone(),
        Arc::new(TogglableProbe(sink.clone())),
        queue.clone(),
        Some("doc-1".into()),
    );

    // Captured while offline: the note is parked, not lost
    let outcome = orchestrator
        .capture_file(Path::new("memo.wav"))
        .await
        .unwrap();
    assert!(matches!(outcome, CaptureOutcome::Queued(_)));
    assert_eq!(queue.count().unwrap(), 1);
    assert!(sink.delivered().is_empty());

    // Service comes back; the drain delivers the parked note
    sink.set_up(true);
    let report = drain_once(&queue, &client, &TogglableProbe(sink.clone()))
        .await
        .unwrap();

    assert_eq!(report.outcome(), DrainOutcome::Success);
    assert_eq!(queue.count().unwrap(), 0);

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].ends_with("\nremember the bread"));
}

#[tokio::test]
async fn test_offline_captures_drain_in_capture_order() {
    let queue = NoteQueue::open_in_memory().unwrap();
    let sink = TogglableSink::starting(false);
    let client = DeliveryClient::new(sink.clone());

    for body in ["first note", "second note"] {
        let orchestrator = Orchestrator::new(
            Arc::new(FixedTranscriber(body.into())),
            client.clone(),
            Arc::new(TogglableProbe(sink.clone())),
            queue.clone(),
            Some("doc-1".into()),
        );
        orchestrator
            .capture_file(Path::new("memo.wav"))
            .await
            .unwrap();
    }

    sink.set_up(true);
    drain_once(&queue, &client, &TogglableProbe(sink.clone()))
        .await
        .unwrap();

    let bodies: Vec<String> = sink
        .delivered()
        .iter()
        .map(|text| text.lines().nth(1).unwrap_or("").to_string())
        .collect();
    assert_eq!(bodies, vec!["first note", "second note"]);
}

#[tokio::test]
async fn test_empty_transcription_is_rejected() {
    let queue = NoteQueue::open_in_memory().unwrap();
    let sink = TogglableSink::starting(true);

    let orchestrator = Orchestrator::new(
        Arc::new(FixedTranscriber("  \n ".into())),
        DeliveryClient::new(sink.clone()),
        Arc::new(TogglableProbe(sink.clone())),
        queue.clone(),
        Some("doc-1".into()),
    );

    let result = orchestrator.capture_file(Path::new("silence.wav")).await;

    assert!(result.is_err());
    assert_eq!(queue.count().unwrap(), 0, "nothing to queue, nothing queued");
    assert!(sink.delivered().is_empty());
}

#[tokio::test]
async fn test_probe_wrong_about_reachability_still_queues() {
    // The probe says reachable but the delivery itself fails; the note must
    // land in the queue rather than being dropped
    let queue = NoteQueue::open_in_memory().unwrap();
    let sink = TogglableSink::starting(false);

    struct AlwaysReachable;

    #[async_trait]
    impl ConnectivityProbe for AlwaysReachable {
        async fn is_reachable(&self) -> bool {
            true
        }
    }

    let orchestrator = Orchestrator::new(
        Arc::new(FixedTranscriber("optimism".into())),
        DeliveryClient::new(sink.clone()),
        Arc::new(AlwaysReachable),
        queue.clone(),
        Some("doc-1".into()),
    );

    let outcome = orchestrator
        .capture_file(Path::new("memo.wav"))
        .await
        .unwrap();

    assert!(matches!(outcome, CaptureOutcome::Queued(_)));
    assert_eq!(queue.count().unwrap(), 1);
}
