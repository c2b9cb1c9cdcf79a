//! Streaming transcription consumed by a session.
//!
//! The service runs alongside the page flow for the whole session. It may be
//! started before the page has loaded and stopped after the browser is gone,
//! and neither call is allowed to take the session down.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::config::TranscriptionConfig;
use crate::session::RecordingHandle;

mod command;

pub use command::CommandTranscriptionService;

pub const UNKNOWN_SPEAKER: &str = "Unknown";

#[async_trait]
pub trait TranscriptionService: Send + Sync {
    fn name(&self) -> &'static str;

    /// Begin streaming captions into `sink`.
    async fn start(&self, sink: RecordingHandle) -> Result<()>;

    /// Stop streaming. Safe to call when never started, or twice.
    async fn stop(&self) -> Result<()>;

    /// Called by the page flow whenever the active speaker changes.
    fn speaker_change(&self, name: &str, at: DateTime<Local>);
}

/// Build the configured service.
pub fn from_config(config: &TranscriptionConfig) -> Result<Arc<dyn TranscriptionService>> {
    let service: Arc<dyn TranscriptionService> = match config.provider.as_str() {
        "none" | "" => Arc::new(NoopTranscriptionService::default()),
        "command" => {
            if config.command.trim().is_empty() {
                bail!("transcription.command is required for the command provider");
            }
            Arc::new(CommandTranscriptionService::new(
                config.command.clone(),
                config.language.clone(),
            ))
        }
        other => bail!(
            "Unknown transcription provider '{}'. Supported providers: none, command",
            other
        ),
    };

    info!("Using {} for transcription", service.name());
    Ok(service)
}

/// Who was speaking when. Captions are attributed by timestamp.
#[derive(Debug, Clone, Default)]
pub struct SpeakerTimeline {
    changes: Arc<Mutex<Vec<(DateTime<Local>, String)>>>,
}

impl SpeakerTimeline {
    pub fn record(&self, name: &str, at: DateTime<Local>) {
        let mut changes = self.changes.lock().unwrap_or_else(|p| p.into_inner());
        let idx = changes.partition_point(|(ts, _)| *ts <= at);
        changes.insert(idx, (at, name.to_string()));
    }

    /// Last speaker whose change happened at or before `at`.
    pub fn speaker_at(&self, at: DateTime<Local>) -> String {
        let changes = self.changes.lock().unwrap_or_else(|p| p.into_inner());
        let idx = changes.partition_point(|(ts, _)| *ts <= at);
        match idx {
            0 => UNKNOWN_SPEAKER.to_string(),
            _ => changes[idx - 1].1.clone(),
        }
    }
}

/// Used when transcription is disabled. Keeps the timeline so speaker
/// bookkeeping behaves the same either way.
#[derive(Default)]
pub struct NoopTranscriptionService {
    timeline: SpeakerTimeline,
}

#[async_trait]
impl TranscriptionService for NoopTranscriptionService {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn start(&self, _sink: RecordingHandle) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    fn speaker_change(&self, name: &str, at: DateTime<Local>) {
        self.timeline.record(name, at);
    }
}
