//! Spool directory watcher.
//!
//! The recorder drops finished audio files into the spool directory. A file
//! that has kept the same non-zero size for the stability window counts as
//! a finished capture and is emitted to the daemon; files already sitting
//! in the spool at startup (captures from while the daemon was down) are
//! picked up the same way.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Debounce window for raw filesystem events
const DEBOUNCE: Duration = Duration::from_secs(1);

/// Errors that can occur with the spool watcher
#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for the spool watcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpoolConfig {
    /// Directory the recorder writes finished captures into
    pub dir: PathBuf,

    /// How long a file must hold its size before it counts as finished
    /// (seconds)
    pub stability_secs: u64,

    /// Audio extensions to accept
    pub extensions: Vec<String>,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            dir: Self::default_spool_dir(),
            stability_secs: 2,
            extensions: vec!["wav".to_string(), "m4a".to_string(), "mp3".to_string()],
        }
    }
}

impl SpoolConfig {
    pub fn default_spool_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".notedrop")
            .join("spool")
    }

    fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

/// Watches the spool directory and emits each finished capture once
pub struct SpoolWatcher {
    config: SpoolConfig,
}

impl SpoolWatcher {
    pub fn new(config: SpoolConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SpoolConfig {
        &self.config
    }

    /// Start watching. Creates the spool directory if it does not exist.
    ///
    /// Emitted paths are not removed; the consumer deletes each file after
    /// processing it to a terminal state.
    pub fn watch(&self) -> Result<(mpsc::Receiver<PathBuf>, SpoolHandle), SpoolError> {
        std::fs::create_dir_all(&self.config.dir)?;

        let (event_tx, event_rx) = mpsc::channel::<PathBuf>(100);
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

        let config = self.config.clone();

        let task = tokio::spawn(async move {
            if let Err(e) = run_watcher(config, event_tx, &mut stop_rx).await {
                error!("Spool watcher error: {}", e);
            }
        });

        Ok((event_rx, SpoolHandle { stop_tx, task }))
    }
}

/// Handle to control the spool watcher
pub struct SpoolHandle {
    stop_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl SpoolHandle {
    /// Stop the watcher
    pub async fn stop(self) -> anyhow::Result<()> {
        let _ = self.stop_tx.send(()).await;
        self.task.await?;
        Ok(())
    }
}

/// Internal watcher loop
async fn run_watcher(
    config: SpoolConfig,
    event_tx: mpsc::Sender<PathBuf>,
    stop_rx: &mut mpsc::Receiver<()>,
) -> Result<(), SpoolError> {
    // Track files being stabilized (path -> (size, last change))
    let mut pending: HashMap<PathBuf, (u64, Instant)> = HashMap::new();

    // Seed with whatever is already in the spool; these go through the same
    // stability window as fresh arrivals
    for entry in std::fs::read_dir(&config.dir)? {
        let entry = entry?;
        let path = entry.path();
        if !config.matches_extension(&path) {
            continue;
        }
        if let Ok(metadata) = std::fs::metadata(&path) {
            if metadata.is_file() {
                pending.insert(path, (metadata.len(), Instant::now()));
            }
        }
    }

    if !pending.is_empty() {
        info!("Found {} file(s) waiting in the spool", pending.len());
    }

    // Create debounced watcher
    let (tx, rx) = std::sync::mpsc::channel();

    let mut debouncer = new_debouncer(DEBOUNCE, tx)?;
    debouncer
        .watcher()
        .watch(&config.dir, RecursiveMode::NonRecursive)?;

    let stability = Duration::from_secs(config.stability_secs);

    info!("Watching spool {} for audio files", config.dir.display());

    loop {
        // Check for stop signal
        if stop_rx.try_recv().is_ok() {
            info!("Spool watcher stopping...");
            break;
        }

        // Check for file events (non-blocking with timeout)
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(Ok(events)) => {
                for event in events {
                    let path = event.path;

                    if !config.matches_extension(&path) {
                        continue;
                    }

                    // Deletions drop out here; metadata fails for them
                    if let Ok(metadata) = std::fs::metadata(&path) {
                        if metadata.is_file() {
                            pending.insert(path, (metadata.len(), Instant::now()));
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                warn!("Spool watcher error: {:?}", e);
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                // Expected; fall through to the stability check
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                error!("Spool watcher channel disconnected");
                break;
            }
        }

        // Check for stable files
        let now = Instant::now();
        let mut stable = Vec::new();
        let mut grew = Vec::new();

        for (path, (last_size, last_change)) in pending.iter() {
            if now.duration_since(*last_change) < stability {
                continue;
            }

            match std::fs::metadata(path) {
                Ok(metadata) if metadata.len() == *last_size && metadata.len() > 0 => {
                    stable.push(path.clone());
                }
                Ok(metadata) => {
                    // Still being written; restart its window
                    grew.push((path.clone(), metadata.len()));
                }
                Err(_) => {
                    // Vanished; forget it
                    stable.push(path.clone());
                }
            }
        }

        for (path, size) in grew {
            pending.insert(path, (size, Instant::now()));
        }

        for path in stable {
            pending.remove(&path);
            if !path.exists() {
                continue;
            }

            debug!("Spooled file is stable: {}", path.display());
            if event_tx.send(path).await.is_err() {
                // Consumer is gone; no point watching
                return Ok(());
            }
        }

        // Small sleep to prevent busy loop
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &Path) -> SpoolConfig {
        SpoolConfig {
            dir: dir.to_path_buf(),
            stability_secs: 0,
            extensions: vec!["wav".to_string()],
        }
    }

    #[test]
    fn test_default_config_accepts_common_audio() {
        let config = SpoolConfig::default();
        assert!(config.extensions.contains(&"wav".to_string()));
        assert!(config.extensions.contains(&"m4a".to_string()));
    }

    #[test]
    fn test_extension_matching_is_case_insensitive() {
        let config = SpoolConfig::default();
        assert!(config.matches_extension(Path::new("/spool/a.WAV")));
        assert!(config.matches_extension(Path::new("/spool/b.m4a")));
        assert!(!config.matches_extension(Path::new("/spool/notes.txt")));
        assert!(!config.matches_extension(Path::new("/spool/no_extension")));
    }

    #[tokio::test]
    async fn test_existing_files_are_picked_up() {
        let temp = TempDir::new().unwrap();
        let existing = temp.path().join("old.wav");
        tokio::fs::write(&existing, b"audio bytes").await.unwrap();

        let watcher = SpoolWatcher::new(test_config(temp.path()));
        let (mut rx, handle) = watcher.watch().unwrap();

        let emitted = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("existing file should be emitted")
            .unwrap();
        assert_eq!(emitted, existing);

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_new_file_is_emitted_once_stable() {
        let temp = TempDir::new().unwrap();

        let watcher = SpoolWatcher::new(test_config(temp.path()));
        let (mut rx, handle) = watcher.watch().unwrap();

        // Let the watcher start before dropping the file in
        tokio::time::sleep(Duration::from_millis(300)).await;
        let fresh = temp.path().join("fresh.wav");
        tokio::fs::write(&fresh, b"new capture").await.unwrap();

        let emitted = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("new file should be emitted")
            .unwrap();
        assert_eq!(emitted, fresh);

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_non_audio_files_are_ignored() {
        let temp = TempDir::new().unwrap();
        tokio::fs::write(temp.path().join("notes.txt"), b"not audio")
            .await
            .unwrap();

        let watcher = SpoolWatcher::new(test_config(temp.path()));
        let (mut rx, handle) = watcher.watch().unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_watch_creates_missing_spool_dir() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("spool");
        assert!(!dir.exists());

        let watcher = SpoolWatcher::new(test_config(&dir));
        let (_rx, handle) = watcher.watch().unwrap();

        assert!(dir.exists());
        handle.stop().await.unwrap();
    }
}
