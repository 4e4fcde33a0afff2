//! Command-line interface for notedrop.
//!
//! Provides commands for processing captures, running the spool daemon,
//! inspecting and draining the offline queue, and showing configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::{broadcast, mpsc};

use crate::capture::{
    CaptureError, CaptureOutcome, Orchestrator, SpoolWatcher, WhisperTranscriber,
};
use crate::config::ResolvedConfig;
use crate::delivery::{DeliveryClient, HttpDocumentSink};
use crate::store::NoteQueue;
use crate::sync::{
    ConnectivityMonitor, ConnectivityProbe, DrainScheduler, DrainSignal, HttpProbe,
    SchedulerConfig,
};

pub mod queue;

/// notedrop - offline-tolerant voice note delivery
#[derive(Parser, Debug)]
#[command(name = "notedrop")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transcribe one audio file and deliver (or queue) the note
    Capture {
        /// Audio file to process
        audio: PathBuf,
    },

    /// Run the daemon: watch the spool, deliver notes, drain the queue
    Watch,

    /// Inspect and manage the offline queue
    Queue {
        #[command(subcommand)]
        command: queue::QueueCommands,
    },

    /// List documents available at the sink
    Docs,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = ResolvedConfig::load()?;

        match self.command {
            Commands::Capture { audio } => capture_once(&config, &audio).await,
            Commands::Watch => watch(&config).await,
            Commands::Queue { command } => queue::execute(&config, command).await,
            Commands::Docs => list_documents(&config).await,
            Commands::Config => show_config(&config),
        }
    }
}

// Component wiring. Everything is built here from the resolved config and
// handed down; nothing reaches for globals.

fn open_queue(config: &ResolvedConfig) -> Result<NoteQueue> {
    NoteQueue::open(&config.queue_db_path()).context("Failed to open queue database")
}

fn build_sink(config: &ResolvedConfig) -> Arc<HttpDocumentSink> {
    Arc::new(HttpDocumentSink::new(
        &config.sink_base_url,
        config.sink_token.clone(),
    ))
}

fn build_delivery(config: &ResolvedConfig) -> DeliveryClient {
    DeliveryClient::new(build_sink(config))
}

fn build_probe(config: &ResolvedConfig) -> Arc<dyn ConnectivityProbe> {
    Arc::new(HttpProbe::new(&config.sync.probe_url))
}

fn build_orchestrator(
    config: &ResolvedConfig,
    queue: NoteQueue,
    probe: Arc<dyn ConnectivityProbe>,
    drain_tx: Option<mpsc::Sender<DrainSignal>>,
) -> Orchestrator {
    let transcriber = Arc::new(WhisperTranscriber::new(
        config.transcriber_binary.clone(),
        config.transcriber_model.clone(),
    ));

    let orchestrator = Orchestrator::new(
        transcriber,
        build_delivery(config),
        probe,
        queue,
        config.target_document.clone(),
    );

    match drain_tx {
        Some(tx) => orchestrator.with_drain_signal(tx),
        None => orchestrator,
    }
}

/// Process one audio file end to end
async fn capture_once(config: &ResolvedConfig, audio: &Path) -> Result<()> {
    if !audio.exists() {
        anyhow::bail!("Audio file not found: {}", audio.display());
    }

    let queue = open_queue(config)?;
    let orchestrator = build_orchestrator(config, queue, build_probe(config), None);

    eprintln!("🎙  Processing {}", audio.display());

    match orchestrator.capture_file(audio).await {
        Ok(CaptureOutcome::Delivered) => {
            let target = config.target_document.as_deref().unwrap_or("?");
            println!("✅ Note delivered to {}", target);
            Ok(())
        }
        Ok(CaptureOutcome::Queued(id)) => {
            println!("📦 Service unreachable; note queued (id {})", id);
            println!("   Run 'notedrop queue sync' once the service is back");
            Ok(())
        }
        Err(CaptureError::TargetNotConfigured) => {
            anyhow::bail!(
                "No target document configured. Set target_document in {}",
                config.home.join("config.yaml").display()
            )
        }
        Err(e) => Err(e).context("Capture failed"),
    }
}

/// Run the spool daemon until Ctrl+C
async fn watch(config: &ResolvedConfig) -> Result<()> {
    let queue = open_queue(config)?;
    let probe = build_probe(config);

    let scheduler = DrainScheduler::new(
        queue.clone(),
        build_delivery(config),
        probe.clone(),
        SchedulerConfig {
            interval: config.sync.interval,
            backoff: config.sync.backoff.clone(),
        },
    );
    let (drain_tx, scheduler_handle) = scheduler.spawn();

    let monitor = ConnectivityMonitor::new(probe.clone(), config.sync.probe_interval);
    let monitor_handle = monitor.spawn(drain_tx.clone());

    let orchestrator = build_orchestrator(config, queue.clone(), probe, Some(drain_tx));
    if config.target_document.is_none() {
        eprintln!("⚠️  No target document configured; captures will stay in the spool");
    }

    // Print pipeline status transitions as they happen
    let mut status_rx = orchestrator.subscribe_status();
    tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(update) => match update.detail {
                    Some(detail) => println!("   · {} ({})", update.status, detail),
                    None => println!("   · {}", update.status),
                },
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let watcher = SpoolWatcher::new(config.spool.clone());
    let (mut spool_rx, spool_handle) = watcher.watch()?;

    let pending = queue.count()?;
    if pending > 0 {
        println!("📦 {} note(s) waiting in the offline queue", pending);
    }
    println!("👁  Watching spool: {}", config.spool.dir.display());
    println!("   Press Ctrl+C to stop");

    // Latch Ctrl+C into a oneshot so the select loop stays simple
    let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = stop_tx.send(());
    });

    loop {
        tokio::select! {
            Some(path) = spool_rx.recv() => {
                process_spooled(&orchestrator, &path).await;
            }
            _ = &mut stop_rx => {
                println!("\n🛑 Stopping...");
                break;
            }
        }
    }

    spool_handle.stop().await?;
    monitor_handle.stop().await?;
    scheduler_handle.stop().await?;

    Ok(())
}

/// Drive one spooled file to a terminal state, then remove it
async fn process_spooled(orchestrator: &Orchestrator, path: &Path) {
    // The watcher can emit a path it already emitted before a restart; the
    // first pass removed it
    if !path.exists() {
        return;
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    println!("🎙  {}", name);

    let remove = match orchestrator.capture_file(path).await {
        Ok(CaptureOutcome::Delivered) => {
            println!("   ✅ delivered");
            true
        }
        Ok(CaptureOutcome::Queued(id)) => {
            println!("   📦 queued (note {})", id);
            true
        }
        Err(CaptureError::TargetNotConfigured) => {
            println!("   ⚠️  no target document configured; file kept in spool");
            false
        }
        Err(CaptureError::Busy) => {
            println!("   ⚠️  pipeline busy; file kept in spool");
            false
        }
        Err(e) => {
            println!("   ❌ {}", e);
            true
        }
    };

    // The note reached a terminal state; the audio is done either way
    if remove {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// List documents available at the sink
async fn list_documents(config: &ResolvedConfig) -> Result<()> {
    let sink = build_sink(config);
    let documents = sink
        .list_documents()
        .await
        .context("Failed to list documents")?;

    if documents.is_empty() {
        println!("No documents found at {}", config.sink_base_url);
        return Ok(());
    }

    println!("{:<34} {:<40}", "ID", "NAME");
    println!("{}", "-".repeat(76));

    for doc in &documents {
        let marker = if Some(&doc.id) == config.target_document.as_ref() {
            "  *"
        } else {
            ""
        };
        println!("{:<34} {:<40}{}", doc.id, doc.name, marker);
    }

    if config.target_document.is_some() {
        println!("\n* current target");
    }

    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config(config: &ResolvedConfig) -> Result<()> {
    println!("╔{}╗", "═".repeat(50));
    println!("  Notedrop Configuration");
    println!("╚{}╝", "═".repeat(50));
    println!();
    println!(
        "Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!(
        "Target document: {}",
        config.target_document.as_deref().unwrap_or("(not set)")
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", config.home.display());
    println!("  Queue DB: {}", config.queue_db_path().display());
    println!("  Spool:    {}", config.spool.dir.display());
    println!();
    println!("Sink:");
    println!("  Base URL: {}", config.sink_base_url);
    println!(
        "  Token:    {}",
        if config.sink_token.is_some() {
            "(set)"
        } else {
            "(not set)"
        }
    );
    println!();
    println!("Transcriber:");
    println!("  Binary: {}", config.transcriber_binary);
    println!("  Model:  {}", config.transcriber_model);
    println!();
    println!("Sync:");
    println!(
        "  Periodic interval: {}s",
        config.sync.interval.as_secs()
    );
    println!(
        "  Backoff:           {}s base, x{} up to {}s",
        config.sync.backoff.base_secs, config.sync.backoff.multiplier, config.sync.backoff.cap_secs
    );
    println!(
        "  Probe:             {} every {}s",
        config.sync.probe_url,
        config.sync.probe_interval.as_secs()
    );

    Ok(())
}
