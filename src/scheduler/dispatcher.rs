//! Local trigger service: fires due schedule entries.
//!
//! Each due entry is claimed once and handed to a [`TriggerTarget`]. The
//! default target launches `scribe run` as a separate process with the trigger
//! payload in its environment, so every session gets its own browser and
//! exits independently.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::trigger::SqliteTriggerBackend;
use crate::invite::TriggerPayload;

/// Environment variable carrying the JSON trigger payload.
pub const TRIGGER_ENV: &str = "SCRIBE_TRIGGER";

#[async_trait]
pub trait TriggerTarget: Send + Sync {
    async fn launch(&self, payload: &TriggerPayload) -> Result<()>;
}

/// Starts a bot session as a child process: `<program> run`.
pub struct ProcessTarget {
    program: PathBuf,
    config_path: Option<PathBuf>,
}

impl ProcessTarget {
    pub fn new(program: PathBuf, config_path: Option<PathBuf>) -> Self {
        Self {
            program,
            config_path,
        }
    }

    /// Target that re-invokes the running binary.
    pub fn current_exe(config_path: Option<PathBuf>) -> Result<Self> {
        let program = std::env::current_exe().context("Failed to locate scribe executable")?;
        Ok(Self::new(program, config_path))
    }
}

#[async_trait]
impl TriggerTarget for ProcessTarget {
    async fn launch(&self, payload: &TriggerPayload) -> Result<()> {
        let payload_json = serde_json::to_string(payload)?;

        let mut command = tokio::process::Command::new(&self.program);
        if let Some(config_path) = &self.config_path {
            command.arg("--config").arg(config_path);
        }
        command.arg("run").env(TRIGGER_ENV, payload_json);

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to launch session for {}", payload.invite_id))?;

        info!(
            invite_id = %payload.invite_id,
            pid = child.id().unwrap_or_default(),
            "Session process launched"
        );

        // Reap the child so it does not linger as a zombie
        let invite_id = payload.invite_id.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => info!(%invite_id, "Session process exited"),
                Ok(status) => warn!(%invite_id, "Session process exited with {}", status),
                Err(e) => error!(%invite_id, "Failed to wait for session process: {}", e),
            }
        });

        Ok(())
    }
}

pub struct Dispatcher {
    backend: Arc<SqliteTriggerBackend>,
    target: Arc<dyn TriggerTarget>,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        backend: Arc<SqliteTriggerBackend>,
        target: Arc<dyn TriggerTarget>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            backend,
            target,
            poll_interval,
        }
    }

    /// Fire everything due at `now`. Returns how many sessions were launched.
    pub async fn tick(&self, now: i64) -> Result<usize> {
        let mut launched = 0;
        for entry in self.backend.due(now).await? {
            if !self.backend.claim(&entry.invite_id, now).await? {
                continue;
            }

            info!(
                invite_id = %entry.invite_id,
                fires_at = entry.fires_at,
                "Trigger fired"
            );
            match self.target.launch(&entry.target).await {
                Ok(()) => launched += 1,
                // The entry stays claimed; a replacement from the reconciler re-arms it
                Err(e) => error!(invite_id = %entry.invite_id, "Failed to launch session: {:#}", e),
            }
        }
        Ok(launched)
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!("Dispatcher polling every {:?}", self.poll_interval);
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Dispatcher stopped");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick(chrono::Utc::now().timestamp()).await {
                        error!("Dispatcher tick failed: {:#}", e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::invite::Platform;
    use crate::scheduler::{ScheduleEntry, TriggerBackend};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingTarget {
        launched: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TriggerTarget for RecordingTarget {
        async fn launch(&self, payload: &TriggerPayload) -> Result<()> {
            self.launched.lock().await.push(payload.meeting_id.clone());
            Ok(())
        }
    }

    fn entry(invite_id: &str, fires_at: i64) -> ScheduleEntry {
        ScheduleEntry {
            invite_id: invite_id.to_string(),
            fires_at,
            target: TriggerPayload {
                invite_id: invite_id.to_string(),
                platform: Platform::Chime,
                meeting_id: format!("meeting-{}", invite_id),
                meeting_password: None,
                scheduled_epoch_seconds: Some(fires_at + 10),
                bot_display_name_seed: "Scribe".to_string(),
            },
            fired_at: None,
        }
    }

    #[tokio::test]
    async fn test_tick_fires_each_due_entry_once() {
        let backend = Arc::new(SqliteTriggerBackend::new(db::in_memory().unwrap()));
        backend.put(&entry("a", 100)).await.unwrap();
        backend.put(&entry("b", 900)).await.unwrap();

        let target = Arc::new(RecordingTarget::default());
        let dispatcher = Dispatcher::new(backend.clone(), target.clone(), Duration::from_secs(1));

        assert_eq!(dispatcher.tick(500).await.unwrap(), 1);
        assert_eq!(dispatcher.tick(500).await.unwrap(), 0);
        assert_eq!(dispatcher.tick(1_000).await.unwrap(), 1);

        assert_eq!(
            *target.launched.lock().await,
            vec!["meeting-a".to_string(), "meeting-b".to_string()]
        );
        // Entries stay until the session finishes and removes them
        assert_eq!(backend.list().await.unwrap().len(), 2);
    }
}
