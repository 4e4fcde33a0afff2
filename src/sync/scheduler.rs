//! Drain scheduling.
//!
//! A drain run starts for one of four reasons: a capture session just queued
//! a note, the remote became reachable again, an explicit sync request, or
//! the periodic safety-net timer. After a run that left notes behind, the
//! scheduler arms an exponential backoff retry; any of the other triggers
//! cuts ahead of a pending retry rather than waiting for it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::delivery::DeliveryClient;
use crate::store::NoteQueue;

use super::connectivity::ConnectivityProbe;
use super::drain::{drain_once, DrainOutcome};

/// Reasons a drain run is requested ahead of the periodic timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainSignal {
    /// A capture session just handed a note to the queue
    NoteQueued,
    /// The remote became reachable after being unreachable
    ConnectivityRestored,
    /// Explicit "sync now" request
    Manual,
}

/// Exponential backoff between failed drain runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay after the first failed run
    pub base_secs: u64,
    /// Growth factor per additional consecutive failed run
    pub multiplier: f64,
    /// Upper bound on the delay
    pub cap_secs: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_secs: 60,
            multiplier: 2.0,
            cap_secs: 3600,
        }
    }
}

impl BackoffPolicy {
    /// Delay after the nth consecutive failed run (1-based).
    ///
    /// Non-decreasing in `failures` and capped at `cap_secs`.
    pub fn delay_for_failures(&self, failures: u32) -> Duration {
        if failures <= 1 {
            return Duration::from_secs(self.base_secs.min(self.cap_secs));
        }

        let delay = self.base_secs as f64 * self.multiplier.powi((failures - 1) as i32);
        let capped = delay.min(self.cap_secs as f64);
        Duration::from_secs(capped as u64)
    }
}

/// Failure streak the run loop feeds. Each failed run grows the next
/// retry delay; a successful run clears the streak, so the failure after
/// it starts over at the base delay.
#[derive(Debug)]
struct BackoffState {
    policy: BackoffPolicy,
    consecutive_failures: u32,
}

impl BackoffState {
    fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
        }
    }

    /// Record a failed run and return the delay before its retry
    fn on_failure(&mut self) -> Duration {
        self.consecutive_failures += 1;
        self.policy.delay_for_failures(self.consecutive_failures)
    }

    /// Record a successful run
    fn on_success(&mut self) {
        self.consecutive_failures = 0;
    }
}

/// Scheduler settings
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Periodic drain interval, the safety net when no signals arrive
    pub interval: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(900),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Owns the drain loop: listens for wake signals, runs the periodic timer,
/// and manages backoff retries after failed runs.
pub struct DrainScheduler {
    queue: NoteQueue,
    delivery: DeliveryClient,
    connectivity: Arc<dyn ConnectivityProbe>,
    config: SchedulerConfig,
}

impl DrainScheduler {
    pub fn new(
        queue: NoteQueue,
        delivery: DeliveryClient,
        connectivity: Arc<dyn ConnectivityProbe>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            queue,
            delivery,
            connectivity,
            config,
        }
    }

    /// Spawn the scheduler loop.
    ///
    /// The returned sender feeds wake signals in; dropping every sender is
    /// fine, the periodic timer keeps the loop alive. The handle stops the
    /// loop and waits for it to finish.
    pub fn spawn(self) -> (mpsc::Sender<DrainSignal>, SchedulerHandle) {
        let (signal_tx, signal_rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(self.run(signal_rx, stop_rx));

        (signal_tx, SchedulerHandle { stop_tx, task })
    }

    async fn run(self, mut signal_rx: mpsc::Receiver<DrainSignal>, mut stop_rx: mpsc::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut backoff = BackoffState::new(self.config.backoff.clone());
        let mut retry_at: Option<Instant> = None;

        info!(
            "Drain scheduler running (periodic every {:?})",
            self.config.interval
        );

        loop {
            // The first ticker.tick() completes immediately, which gives us
            // a startup drain for notes left over from a previous run.
            tokio::select! {
                _ = stop_rx.recv() => {
                    info!("Drain scheduler stopping");
                    break;
                }
                Some(signal) = signal_rx.recv() => {
                    debug!(?signal, "Drain requested");
                }
                _ = ticker.tick() => {
                    debug!("Periodic drain");
                }
                _ = wait_for_retry(retry_at) => {
                    debug!("Backoff retry due");
                }
            }

            // A signal that arrives while a retry is pending replaces it;
            // the run below recomputes the backoff state from its outcome.
            retry_at = None;

            match drain_once(&self.queue, &self.delivery, self.connectivity.as_ref()).await {
                Ok(report) => match report.outcome() {
                    DrainOutcome::Success => backoff.on_success(),
                    DrainOutcome::PartialFailure => {
                        let delay = backoff.on_failure();
                        retry_at = Some(Instant::now() + delay);
                        warn!(
                            "Drain left {} note(s) undelivered; retrying in {:?}",
                            report.failed, delay
                        );
                    }
                    DrainOutcome::Deferred => {
                        // Still offline. The failure streak is kept but no
                        // retry is armed; the connectivity monitor or the
                        // periodic timer will wake us.
                    }
                },
                Err(e) => {
                    let delay = backoff.on_failure();
                    retry_at = Some(Instant::now() + delay);
                    error!("Drain aborted: {}; retrying in {:?}", e, delay);
                }
            }
        }
    }
}

async fn wait_for_retry(retry_at: Option<Instant>) {
    match retry_at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Handle to a running drain scheduler
pub struct SchedulerHandle {
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop_tx.send(()).await;
        self.task.await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::delivery::{DocumentSink, SinkError};
    use crate::domain::Note;

    #[test]
    fn test_backoff_first_failure_uses_base() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_failures(1), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_doubles_per_failure() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_failures(2), Duration::from_secs(120));
        assert_eq!(policy.delay_for_failures(3), Duration::from_secs(240));
        assert_eq!(policy.delay_for_failures(4), Duration::from_secs(480));
    }

    #[test]
    fn test_backoff_caps_at_one_hour() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_failures(7), Duration::from_secs(3600));
        assert_eq!(policy.delay_for_failures(30), Duration::from_secs(3600));
    }

    #[test]
    fn test_backoff_is_monotonic() {
        let policy = BackoffPolicy::default();
        let mut last = Duration::ZERO;
        for failures in 1..=20 {
            let delay = policy.delay_for_failures(failures);
            assert!(delay >= last, "delay shrank at failure {}", failures);
            last = delay;
        }
    }

    #[test]
    fn test_backoff_custom_policy() {
        let policy = BackoffPolicy {
            base_secs: 5,
            multiplier: 3.0,
            cap_secs: 50,
        };
        assert_eq!(policy.delay_for_failures(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for_failures(2), Duration::from_secs(15));
        assert_eq!(policy.delay_for_failures(3), Duration::from_secs(45));
        assert_eq!(policy.delay_for_failures(4), Duration::from_secs(50));
    }

    #[test]
    fn test_success_resets_backoff_to_base() {
        let mut backoff = BackoffState::new(BackoffPolicy::default());

        assert_eq!(backoff.on_failure(), Duration::from_secs(60));
        assert_eq!(backoff.on_failure(), Duration::from_secs(120));
        assert_eq!(backoff.on_failure(), Duration::from_secs(240));

        backoff.on_success();

        // Streak cleared; the next failure is back at the base delay
        assert_eq!(backoff.on_failure(), Duration::from_secs(60));
    }

    struct OkSink;

    #[async_trait]
    impl DocumentSink for OkSink {
        async fn insert_at_head(&self, _target_id: &str, _text: &str) -> Result<(), SinkError> {
            Ok(())
        }
    }

    struct OnlineProbe;

    #[async_trait]
    impl ConnectivityProbe for OnlineProbe {
        async fn is_reachable(&self) -> bool {
            true
        }
    }

    /// Fails the first N inserts, then accepts
    struct FlakySink {
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl DocumentSink for FlakySink {
        async fn insert_at_head(&self, _target_id: &str, _text: &str) -> Result<(), SinkError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(SinkError::Api {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            Ok(())
        }
    }

    async fn wait_until_empty(queue: &NoteQueue) {
        for _ in 0..100 {
            if queue.count().unwrap() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("queue never drained");
    }

    #[tokio::test]
    async fn test_scheduler_drains_on_startup() {
        let queue = NoteQueue::open_in_memory().unwrap();
        queue
            .insert(&Note::new(chrono::Utc::now(), "left over", "doc-1"))
            .unwrap();

        let scheduler = DrainScheduler::new(
            queue.clone(),
            DeliveryClient::new(Arc::new(OkSink)),
            Arc::new(OnlineProbe),
            SchedulerConfig {
                interval: Duration::from_secs(3600),
                backoff: BackoffPolicy::default(),
            },
        );
        let (_tx, handle) = scheduler.spawn();

        wait_until_empty(&queue).await;
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_scheduler_wakes_on_signal() {
        let queue = NoteQueue::open_in_memory().unwrap();

        let scheduler = DrainScheduler::new(
            queue.clone(),
            DeliveryClient::new(Arc::new(OkSink)),
            Arc::new(OnlineProbe),
            SchedulerConfig {
                interval: Duration::from_secs(3600),
                backoff: BackoffPolicy::default(),
            },
        );
        let (tx, handle) = scheduler.spawn();

        // Give the startup drain a moment, then queue work and wake it
        tokio::time::sleep(Duration::from_millis(100)).await;
        queue
            .insert(&Note::new(chrono::Utc::now(), "fresh note", "doc-1"))
            .unwrap();
        tx.send(DrainSignal::Manual).await.unwrap();

        wait_until_empty(&queue).await;
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_scheduler_retries_after_partial_failure() {
        let queue = NoteQueue::open_in_memory().unwrap();
        queue
            .insert(&Note::new(chrono::Utc::now(), "flaky delivery", "doc-1"))
            .unwrap();

        let scheduler = DrainScheduler::new(
            queue.clone(),
            DeliveryClient::new(Arc::new(FlakySink {
                failures_left: AtomicUsize::new(2),
            })),
            Arc::new(OnlineProbe),
            SchedulerConfig {
                // No periodic help within the test window; zero-base backoff
                // so the armed retries fire right away
                interval: Duration::from_secs(3600),
                backoff: BackoffPolicy {
                    base_secs: 0,
                    multiplier: 2.0,
                    cap_secs: 1,
                },
            },
        );
        let (_tx, handle) = scheduler.spawn();

        // The startup drain fails twice; only the backoff retries can
        // carry the note through, no signal is ever sent
        wait_until_empty(&queue).await;
        handle.stop().await.unwrap();
    }
}
