//! One pass over the offline queue.

use tracing::{debug, info, warn};

use crate::delivery::DeliveryClient;
use crate::store::{NoteQueue, StorageError};

use super::connectivity::ConnectivityProbe;

/// Outcome of one drain run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every queued note was delivered (or the queue was already empty)
    Success,
    /// At least one note failed delivery and remains queued
    PartialFailure,
    /// The remote was unreachable; no deliveries were attempted
    Deferred,
}

/// What one drain run did
#[derive(Debug, Clone, Default)]
pub struct DrainReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    pub deferred: bool,
}

impl DrainReport {
    pub fn outcome(&self) -> DrainOutcome {
        if self.deferred {
            DrainOutcome::Deferred
        } else if self.failed > 0 {
            DrainOutcome::PartialFailure
        } else {
            DrainOutcome::Success
        }
    }
}

/// Drain the queue once: oldest capture first, delete on delivery, annotate
/// and keep on failure. One bad note never blocks the ones behind it.
///
/// Safe to run concurrently with new captures; notes queued mid-drain are
/// picked up by the next run.
pub async fn drain_once(
    queue: &NoteQueue,
    delivery: &DeliveryClient,
    connectivity: &dyn ConnectivityProbe,
) -> Result<DrainReport, StorageError> {
    if !connectivity.is_reachable().await {
        debug!("Drain deferred: remote unreachable");
        return Ok(DrainReport {
            deferred: true,
            ..Default::default()
        });
    }

    let pending = queue.list_all()?;
    if pending.is_empty() {
        return Ok(DrainReport::default());
    }

    info!("Draining {} queued note(s)", pending.len());

    let mut report = DrainReport::default();

    for note in pending {
        report.attempted += 1;

        let outcome = delivery.deliver(&note.target, &note.document_text()).await;
        if outcome.is_delivered() {
            queue.delete(note.id)?;
            report.delivered += 1;
            info!(note_id = note.id, "Queued note delivered");
        } else {
            let reason = outcome.failure_reason().unwrap_or("unknown error");
            queue.record_failure(note.id, reason)?;
            report.failed += 1;
            warn!(note_id = note.id, "Delivery failed: {}", reason);
        }
    }

    Ok(report)
}
