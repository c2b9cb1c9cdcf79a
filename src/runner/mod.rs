//! One bot session, from trigger to terminal status.
//!
//! wait until join time → re-check the invite → start transcription → launch
//! the page → shared session flow → tear down → summary → status → drop the
//! schedule entry.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::Config;
use crate::invite::{InviteStatus, InviteStatusUpdate, InviteStore, TriggerPayload};
use crate::platform::{adapter_for, JoinError, SessionFlow, SurfaceFactory};
use crate::scheduler::TriggerBackend;
use crate::session::{RecordingEngine, RecordingStateMachine, SessionContext, SessionEvent};
use crate::summary::delivery::assembly_timeout;
use crate::summary::{Summary, SummaryAssembler, SummaryDelivery};
use crate::transcription::TranscriptionService;

/// Time to wait before joining: `max(0, scheduled - lead - now)`.
pub fn join_delay(scheduled: Option<i64>, lead_time_secs: u64, now: i64) -> Duration {
    let Some(scheduled) = scheduled else {
        return Duration::ZERO;
    };
    let secs = scheduled - lead_time_secs as i64 - now;
    Duration::from_secs(secs.max(0) as u64)
}

#[derive(Debug)]
pub enum RunReport {
    /// The session never started
    Abandoned { reason: String },
    Finished {
        status: InviteStatus,
        summary: Option<Summary>,
    },
}

impl RunReport {
    pub fn status(&self) -> Option<InviteStatus> {
        match self {
            Self::Abandoned { .. } => None,
            Self::Finished { status, .. } => Some(*status),
        }
    }
}

pub struct TaskRunner {
    config: Config,
    store: Arc<dyn InviteStore>,
    triggers: Arc<dyn TriggerBackend>,
    surfaces: Arc<dyn SurfaceFactory>,
    transcription: Arc<dyn TranscriptionService>,
    delivery: Arc<dyn SummaryDelivery>,
    cancel: CancellationToken,
}

impl TaskRunner {
    pub fn new(
        config: Config,
        store: Arc<dyn InviteStore>,
        triggers: Arc<dyn TriggerBackend>,
        surfaces: Arc<dyn SurfaceFactory>,
        transcription: Arc<dyn TranscriptionService>,
        delivery: Arc<dyn SummaryDelivery>,
    ) -> Self {
        Self {
            config,
            store,
            triggers,
            surfaces,
            transcription,
            delivery,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling this token before join time abandons the session.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[instrument(skip_all, fields(invite_id = %payload.invite_id, platform = %payload.platform))]
    pub async fn run(&self, payload: &TriggerPayload) -> Result<RunReport> {
        let delay = join_delay(
            payload.scheduled_epoch_seconds,
            self.config.scribe.lead_time_secs,
            chrono::Utc::now().timestamp(),
        );
        info!("Sleeping {} seconds", delay.as_secs());
        tokio::select! {
            _ = self.cancel.cancelled() => {
                info!("Session cancelled before join time");
                return Ok(RunReport::Abandoned { reason: "cancelled".to_string() });
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let invite = match self
            .store
            .get(&payload.invite_id)
            .await
            .context("Failed to look up invite")?
        {
            Some(invite) if invite.status.is_terminal() => {
                info!("Invite already {}, not joining", invite.status.as_str());
                return Ok(RunReport::Abandoned {
                    reason: format!("invite already {}", invite.status.as_str()),
                });
            }
            Some(invite) => invite,
            None => {
                info!("Invite was deleted, not joining");
                self.drop_trigger(&payload.invite_id).await;
                return Ok(RunReport::Abandoned {
                    reason: "invite deleted".to_string(),
                });
            }
        };

        let ctx = SessionContext::new(invite, &payload.bot_display_name_seed, &self.config.scribe);
        let RecordingEngine {
            handle,
            directives,
            task,
        } = RecordingEngine::spawn(RecordingStateMachine::new(ctx.clone()));

        if let Err(e) = self.transcription.start(handle.clone()).await {
            warn!("Transcription unavailable, continuing without captions: {:#}", e);
        }

        let result = match self.surfaces.create().await {
            Ok(surface) => {
                let adapter = adapter_for(payload.platform, &self.config);
                let flow = SessionFlow::new(
                    &ctx,
                    self.store.as_ref(),
                    handle.clone(),
                    directives,
                    self.transcription.clone(),
                    Duration::from_millis(self.config.browser.element_timeout_ms),
                );
                let result = flow.initialize(adapter.as_ref(), surface.as_ref()).await;
                if let Err(e) = surface.close().await {
                    warn!("Failed to close browser: {}", e);
                }
                result.map_err(SessionFailure::Join)
            }
            Err(e) => Err(SessionFailure::Launch(e)),
        };

        if let Err(e) = self.transcription.stop().await {
            warn!("Failed to stop transcription: {:#}", e);
        }

        handle.send(SessionEvent::Shutdown).await;
        drop(handle);
        let session = task.await.context("Recording engine crashed")?;

        let (mut status, outcome_line) = match &result {
            Ok(outcome) => (InviteStatus::Completed, outcome.message().to_string()),
            Err(failure) => {
                warn!("Session failed: {}", failure);
                (InviteStatus::Failed, failure.to_string())
            }
        };

        let assembler = SummaryAssembler::new(
            self.delivery.clone(),
            assembly_timeout(&self.config.delivery),
        );
        let summary = match assembler.run(&session, &outcome_line).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                error!("{:#}", e);
                status = InviteStatus::Failed;
                None
            }
        };

        let update = InviteStatusUpdate {
            invite_id: payload.invite_id.clone(),
            status,
        };
        match self.store.update_status(&update).await {
            Ok(true) => {}
            Ok(false) => warn!("Invite disappeared before its final status was written"),
            Err(e) => error!("Failed to write final invite status: {:#}", e),
        }
        self.drop_trigger(&payload.invite_id).await;

        info!("Session finished: {}", status.as_str());
        Ok(RunReport::Finished { status, summary })
    }

    async fn drop_trigger(&self, invite_id: &str) {
        if let Err(e) = self.triggers.delete(invite_id).await {
            warn!("Failed to remove schedule entry: {:#}", e);
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum SessionFailure {
    #[error("{0}")]
    Join(JoinError),

    #[error("Your scribe could not start a browser: {0:#}")]
    Launch(anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_delay() {
        assert_eq!(join_delay(None, 10, 1_000), Duration::ZERO);
        assert_eq!(join_delay(Some(1_120), 10, 1_000), Duration::from_secs(110));
        assert_eq!(join_delay(Some(1_005), 10, 1_000), Duration::ZERO);
        assert_eq!(join_delay(Some(500), 10, 1_000), Duration::ZERO);
    }
}
