//! Configuration for notedrop.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (NOTEDROP_HOME, NOTEDROP_SINK_TOKEN)
//! 2. Config file ($NOTEDROP_HOME/config.yaml)
//! 3. Defaults (~/.notedrop)
//!
//! Relative paths in the config file are resolved against the notedrop
//! home directory. There is no process-global config; the resolved value
//! is loaded once in main and handed to whatever needs it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::capture::SpoolConfig;
use crate::sync::BackoffPolicy;

const DEFAULT_SINK_URL: &str = "http://localhost:8970";
const DEFAULT_TRANSCRIBER_BINARY: &str = "whisper";
const DEFAULT_TRANSCRIBER_MODEL: &str = "base";
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 900;
const DEFAULT_PROBE_INTERVAL_SECS: u64 = 30;
const DEFAULT_SPOOL_STABILITY_SECS: u64 = 2;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    /// Document that receives new notes
    pub target_document: Option<String>,
    #[serde(default)]
    pub sink: Option<SinkSection>,
    #[serde(default)]
    pub transcriber: Option<TranscriberSection>,
    #[serde(default)]
    pub spool: Option<SpoolSection>,
    #[serde(default)]
    pub sync: Option<SyncSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkSection {
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriberSection {
    pub binary: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpoolSection {
    /// Spool directory (relative paths resolve against notedrop home)
    pub dir: Option<String>,
    pub stability_secs: Option<u64>,
    pub extensions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncSection {
    pub interval_secs: Option<u64>,
    pub backoff_base_secs: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub backoff_cap_secs: Option<u64>,
    /// URL the connectivity probe hits (defaults to the sink base URL)
    pub probe_url: Option<String>,
    pub probe_interval_secs: Option<u64>,
}

/// Resolved sync settings
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub interval: Duration,
    pub backoff: BackoffPolicy,
    pub probe_url: String,
    pub probe_interval: Duration,
}

/// Resolved configuration with absolute paths and secrets applied
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to notedrop home (queue database, default spool)
    pub home: PathBuf,
    /// Document that receives new notes
    pub target_document: Option<String>,
    /// Base URL of the document service
    pub sink_base_url: String,
    /// Bearer token for the document service (NOTEDROP_SINK_TOKEN)
    pub sink_token: Option<String>,
    pub transcriber_binary: String,
    pub transcriber_model: String,
    pub spool: SpoolConfig,
    pub sync: SyncSettings,
    /// Path to the config file, if one was found
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    /// Load configuration from all sources
    pub fn load() -> Result<Self> {
        let home = match std::env::var("NOTEDROP_HOME") {
            Ok(env_home) => PathBuf::from(env_home),
            Err(_) => dirs::home_dir()
                .context("Failed to determine home directory")?
                .join(".notedrop"),
        };

        let config_path = home.join("config.yaml");
        let file = if config_path.exists() {
            Some((config_path.clone(), load_config_file(&config_path)?))
        } else {
            None
        };

        let token = std::env::var("NOTEDROP_SINK_TOKEN").ok();

        Ok(resolve(home, file, token))
    }

    /// Path of the offline queue database ($NOTEDROP_HOME/queue.db)
    pub fn queue_db_path(&self) -> PathBuf {
        self.home.join("queue.db")
    }
}

/// Load and parse a config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the notedrop home
fn resolve_path(home: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        home.join(path)
    }
}

/// Apply defaults and environment overrides to the raw file config
fn resolve(
    home: PathBuf,
    file: Option<(PathBuf, ConfigFile)>,
    sink_token: Option<String>,
) -> ResolvedConfig {
    let (config_file, config) = match file {
        Some((path, config)) => (Some(path), config),
        None => (None, ConfigFile::default()),
    };

    let sink = config.sink.as_ref();
    let sink_base_url = sink
        .and_then(|s| s.base_url.clone())
        .unwrap_or_else(|| DEFAULT_SINK_URL.to_string());

    let transcriber = config.transcriber.as_ref();
    let transcriber_binary = transcriber
        .and_then(|t| t.binary.clone())
        .unwrap_or_else(|| DEFAULT_TRANSCRIBER_BINARY.to_string());
    let transcriber_model = transcriber
        .and_then(|t| t.model.clone())
        .unwrap_or_else(|| DEFAULT_TRANSCRIBER_MODEL.to_string());

    let spool_section = config.spool.as_ref();
    let spool = SpoolConfig {
        dir: spool_section
            .and_then(|s| s.dir.as_deref())
            .map(|dir| resolve_path(&home, dir))
            .unwrap_or_else(|| home.join("spool")),
        stability_secs: spool_section
            .and_then(|s| s.stability_secs)
            .unwrap_or(DEFAULT_SPOOL_STABILITY_SECS),
        extensions: spool_section
            .and_then(|s| s.extensions.clone())
            .unwrap_or_else(|| SpoolConfig::default().extensions),
    };

    let sync_section = config.sync.as_ref();
    let defaults = BackoffPolicy::default();
    let sync = SyncSettings {
        interval: Duration::from_secs(
            sync_section
                .and_then(|s| s.interval_secs)
                .unwrap_or(DEFAULT_SYNC_INTERVAL_SECS),
        ),
        backoff: BackoffPolicy {
            base_secs: sync_section
                .and_then(|s| s.backoff_base_secs)
                .unwrap_or(defaults.base_secs),
            multiplier: sync_section
                .and_then(|s| s.backoff_multiplier)
                .unwrap_or(defaults.multiplier),
            cap_secs: sync_section
                .and_then(|s| s.backoff_cap_secs)
                .unwrap_or(defaults.cap_secs),
        },
        probe_url: sync_section
            .and_then(|s| s.probe_url.clone())
            .unwrap_or_else(|| sink_base_url.clone()),
        probe_interval: Duration::from_secs(
            sync_section
                .and_then(|s| s.probe_interval_secs)
                .unwrap_or(DEFAULT_PROBE_INTERVAL_SECS),
        ),
    };

    ResolvedConfig {
        home,
        target_document: config.target_document,
        sink_base_url,
        sink_token,
        transcriber_binary,
        transcriber_model,
        spool,
        sync,
        config_file,
    }
}
