//! One-shot delivery attempts with retry classification.

use std::sync::Arc;

use super::{DocumentSink, SinkError};

/// Result of a single delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The sink accepted the insert
    Delivered,

    /// Retrying later may succeed (network trouble, service-side errors)
    TransientFailure(String),

    /// Retrying is unlikely to succeed (auth, unknown target, bad request).
    /// The retry path treats this the same as transient: the record stays
    /// queued and keeps its growing attempt count for the user to see.
    PermanentFailure(String),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }

    /// The failure reason, if this attempt failed
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            DeliveryOutcome::Delivered => None,
            DeliveryOutcome::TransientFailure(reason)
            | DeliveryOutcome::PermanentFailure(reason) => Some(reason),
        }
    }
}

/// Makes exactly one delivery attempt per call. No retries, no queueing;
/// those live in the orchestrator and the drain scheduler.
#[derive(Clone)]
pub struct DeliveryClient {
    sink: Arc<dyn DocumentSink>,
}

impl DeliveryClient {
    pub fn new(sink: Arc<dyn DocumentSink>) -> Self {
        Self { sink }
    }

    /// Attempt to insert `text` at the head of `target`
    pub async fn deliver(&self, target: &str, text: &str) -> DeliveryOutcome {
        match self.sink.insert_at_head(target, text).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(error) => {
                let outcome = classify(error);
                tracing::debug!(
                    target_doc = target,
                    "Delivery attempt failed: {:?}",
                    outcome
                );
                outcome
            }
        }
    }
}

/// Sort a sink error into the retry taxonomy.
///
/// Network-level failures and service-side statuses (5xx, plus 408/429) are
/// transient; the remaining 4xx are permanent.
fn classify(error: SinkError) -> DeliveryOutcome {
    match error {
        SinkError::Network(reason) => DeliveryOutcome::TransientFailure(reason),
        SinkError::Api { status, message } => {
            let reason = format!("HTTP {}: {}", status, message);
            match status {
                408 | 429 => DeliveryOutcome::TransientFailure(reason),
                400..=499 => DeliveryOutcome::PermanentFailure(reason),
                _ => DeliveryOutcome::TransientFailure(reason),
            }
        }
    }
}
