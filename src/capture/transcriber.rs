//! Transcription of captured audio.
//!
//! The pipeline consumes speech-to-text through the [`Transcriber`] trait.
//! [`WhisperTranscriber`] shells out to a local whisper binary; the engine
//! and its models stay outside this crate.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;

/// Errors from a transcription source
#[derive(Debug, Clone, Error)]
pub enum TranscriptionError {
    /// The engine or its model is not available
    #[error("transcription model not available: {0}")]
    ModelNotLoaded(String),

    /// The engine ran but could not decode the audio
    #[error("transcription failed: {0}")]
    InferenceFailure(String),
}

/// Speech-to-text capability.
///
/// Implementations may return empty text; rejecting empty transcriptions is
/// the orchestrator's decision, not the engine's.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> Result<String, TranscriptionError>;
}

/// Whisper output JSON structure
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    text: String,
}

/// Transcriber backed by a local whisper binary
pub struct WhisperTranscriber {
    binary: String,
    model: String,
}

impl WhisperTranscriber {
    pub fn new(binary: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: &Path) -> Result<String, TranscriptionError> {
        // Whisper writes one JSON file per input into --output_dir
        let temp_dir = tempfile::tempdir()
            .map_err(|e| TranscriptionError::InferenceFailure(format!("temp dir: {}", e)))?;

        let output = Command::new(&self.binary)
            .arg(audio)
            .arg("--model")
            .arg(&self.model)
            .arg("--output_dir")
            .arg(temp_dir.path())
            .arg("--output_format")
            .arg("json")
            .arg("--language")
            .arg("en")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => TranscriptionError::ModelNotLoaded(format!(
                    "whisper binary not found: {}",
                    self.binary
                )),
                _ => TranscriptionError::InferenceFailure(format!("failed to run whisper: {}", e)),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscriptionError::InferenceFailure(
                stderr.trim().to_string(),
            ));
        }

        // The JSON is named after the input file stem
        let stem = audio.file_stem().unwrap_or_default().to_string_lossy();
        let json_path = temp_dir.path().join(format!("{}.json", stem));

        let json_content = tokio::fs::read_to_string(&json_path)
            .await
            .map_err(|e| {
                TranscriptionError::InferenceFailure(format!("missing whisper output: {}", e))
            })?;

        let whisper: WhisperOutput = serde_json::from_str(&json_content)
            .map_err(|e| TranscriptionError::InferenceFailure(format!("bad whisper output: {}", e)))?;

        Ok(whisper.text.trim().to_string())
    }
}
