//! Reachability checks for the remote document service.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::scheduler::DrainSignal;

/// Point-in-time, best-effort reachability of the remote service.
///
/// A positive answer is a hint, not a delivery guarantee; delivery can
/// still fail and land the note in the queue.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Probe that sends a HEAD request to a fixed URL.
///
/// Any HTTP response counts as reachable, including error statuses; only
/// transport-level failures (DNS, refused, timeout) count as unreachable.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn is_reachable(&self) -> bool {
        match self
            .client
            .head(&self.url)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(_) => true,
            Err(e) => {
                debug!("Connectivity probe failed: {}", e);
                false
            }
        }
    }
}

/// Polls a probe and wakes the drain scheduler when the remote becomes
/// reachable again.
///
/// Edge-triggered: only the offline-to-online flip sends a signal, so a
/// stable connection does not generate drain traffic beyond the periodic
/// timer.
pub struct ConnectivityMonitor {
    probe: Arc<dyn ConnectivityProbe>,
    interval: Duration,
}

impl ConnectivityMonitor {
    pub fn new(probe: Arc<dyn ConnectivityProbe>, interval: Duration) -> Self {
        Self { probe, interval }
    }

    pub fn spawn(self, drain_tx: mpsc::Sender<DrainSignal>) -> MonitorHandle {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            // Unknown until the first poll; the first answer never fires
            // a signal either way.
            let mut was_reachable: Option<bool> = None;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let reachable = self.probe.is_reachable().await;
                        if reachable && was_reachable == Some(false) {
                            info!("Connectivity restored");
                            let _ = drain_tx.try_send(DrainSignal::ConnectivityRestored);
                        }
                        was_reachable = Some(reachable);
                    }
                    _ = stop_rx.recv() => break,
                }
            }
        });

        MonitorHandle { stop_tx, task }
    }
}

/// Handle to a running connectivity monitor
pub struct MonitorHandle {
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop_tx.send(()).await;
        self.task.await?;
        Ok(())
    }
}
