//! Offline queue subcommands.

use anyhow::Result;
use clap::Subcommand;

use crate::config::ResolvedConfig;
use crate::sync::{drain_once, DrainOutcome};

use super::{build_delivery, build_probe, open_queue};

#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// List queued notes, oldest capture first
    List {
        /// Maximum number of notes to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Print how many notes are queued
    Count,

    /// Drain the queue now
    Sync,

    /// Delete one queued note
    Delete {
        /// Note id (from 'queue list')
        id: i64,
    },

    /// Delete every queued note
    Clear {
        /// Skip the safety check
        #[arg(long)]
        force: bool,
    },
}

pub async fn execute(config: &ResolvedConfig, command: QueueCommands) -> Result<()> {
    match command {
        QueueCommands::List { limit } => list(config, limit),
        QueueCommands::Count => count(config),
        QueueCommands::Sync => sync(config).await,
        QueueCommands::Delete { id } => delete(config, id),
        QueueCommands::Clear { force } => clear(config, force),
    }
}

/// List queued notes
fn list(config: &ResolvedConfig, limit: usize) -> Result<()> {
    let queue = open_queue(config)?;
    let notes = queue.list_all()?;

    if notes.is_empty() {
        println!("Queue is empty");
        return Ok(());
    }

    println!(
        "{:<6} {:<22} {:<8} {:<40}",
        "ID", "CAPTURED", "ATTEMPTS", "NOTE"
    );
    println!("{}", "-".repeat(78));

    for note in notes.iter().take(limit) {
        println!(
            "{:<6} {:<22} {:<8} {:<40}",
            note.id,
            note.display_timestamp,
            note.attempt_count,
            note.preview(38),
        );
        if let Some(error) = &note.last_error {
            println!("       last error: {}", truncate(error, 60));
        }
    }

    if notes.len() > limit {
        println!("... and {} more", notes.len() - limit);
    }
    println!("\nTotal: {} note(s)", notes.len());

    Ok(())
}

/// Print the queue depth
fn count(config: &ResolvedConfig) -> Result<()> {
    let queue = open_queue(config)?;
    println!("{}", queue.count()?);
    Ok(())
}

/// Drain the queue once, right now
async fn sync(config: &ResolvedConfig) -> Result<()> {
    let queue = open_queue(config)?;

    let pending = queue.count()?;
    if pending == 0 {
        println!("Queue is empty; nothing to sync");
        return Ok(());
    }

    println!("🔄 Syncing {} queued note(s)...", pending);

    let delivery = build_delivery(config);
    let probe = build_probe(config);
    let report = drain_once(&queue, &delivery, probe.as_ref()).await?;

    match report.outcome() {
        DrainOutcome::Deferred => {
            println!("🔌 Service unreachable; notes kept in the queue");
        }
        DrainOutcome::Success => {
            println!("✅ Delivered {} note(s)", report.delivered);
        }
        DrainOutcome::PartialFailure => {
            eprintln!(
                "⚠️  Delivered {}, failed {}; failed notes stay queued",
                report.delivered, report.failed
            );
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Delete one note by id
fn delete(config: &ResolvedConfig, id: i64) -> Result<()> {
    let queue = open_queue(config)?;

    if queue.delete(id)? {
        println!("🗑  Note {} deleted", id);
        Ok(())
    } else {
        anyhow::bail!("Note {} not found", id)
    }
}

/// Delete everything in the queue
fn clear(config: &ResolvedConfig, force: bool) -> Result<()> {
    let queue = open_queue(config)?;

    let pending = queue.count()?;
    if pending == 0 {
        println!("Queue is already empty");
        return Ok(());
    }

    if !force {
        anyhow::bail!(
            "This would delete {} queued note(s). Re-run with --force to confirm",
            pending
        );
    }

    let removed = queue.delete_all()?;
    println!("🗑  Removed {} note(s)", removed);

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}
