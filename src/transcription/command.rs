//! Transcription through an external streaming speech-to-text command.
//!
//! The command captures meeting audio itself and prints one JSON object per
//! line on stdout:
//!
//! ```text
//! {"offset": 12.4, "text": "good morning", "partial": false}
//! ```
//!
//! `offset` is seconds since the command started. Partial results are dropped.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{SpeakerTimeline, TranscriptionService};
use crate::session::{Caption, RecordingHandle, SessionEvent};

const LANGUAGE_ENV: &str = "SCRIBE_LANGUAGE";
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct TranscriptLine {
    offset: f64,
    text: String,
    #[serde(default)]
    partial: bool,
}

struct Running {
    child: Child,
    reader: JoinHandle<()>,
}

pub struct CommandTranscriptionService {
    command: String,
    language: String,
    timeline: SpeakerTimeline,
    running: Mutex<Option<Running>>,
}

impl CommandTranscriptionService {
    pub fn new(command: String, language: String) -> Self {
        Self {
            command,
            language,
            timeline: SpeakerTimeline::default(),
            running: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TranscriptionService for CommandTranscriptionService {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn start(&self, sink: RecordingHandle) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        info!("Starting transcription: {}", self.command);
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env(LANGUAGE_ENV, &self.language)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to start transcription command")?;

        let stdout = child
            .stdout
            .take()
            .context("Transcription command has no stdout")?;
        let started_at = Local::now();
        let reader = tokio::spawn(forward_captions(
            BufReader::new(stdout),
            started_at,
            self.timeline.clone(),
            sink,
        ));

        *running = Some(Running { child, reader });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let Some(mut running) = self.running.lock().await.take() else {
            return Ok(());
        };

        if let Err(e) = running.child.kill().await {
            debug!("Transcription command already exited: {}", e);
        }
        // Closing stdout ends the reader once buffered lines are forwarded
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut running.reader)
            .await
            .is_err()
        {
            warn!("Transcription reader did not finish, aborting");
            running.reader.abort();
        }
        info!("Transcription stopped");
        Ok(())
    }

    fn speaker_change(&self, name: &str, at: DateTime<Local>) {
        self.timeline.record(name, at);
    }
}

async fn forward_captions<R>(
    reader: R,
    started_at: DateTime<Local>,
    timeline: SpeakerTimeline,
    sink: RecordingHandle,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Transcription stream failed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let result: TranscriptLine = match serde_json::from_str(&line) {
            Ok(result) => result,
            Err(e) => {
                warn!("Ignoring malformed transcription line: {}", e);
                continue;
            }
        };
        if result.partial || result.text.trim().is_empty() {
            continue;
        }

        let at = started_at + chrono::Duration::milliseconds((result.offset * 1000.0) as i64);
        let caption = Caption {
            speaker: timeline.speaker_at(at),
            text: result.text.trim().to_string(),
            at,
        };
        if !sink.send(SessionEvent::Caption(caption)).await {
            debug!("Recording engine gone, dropping remaining captions");
            break;
        }
    }
}
