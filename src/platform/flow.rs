//! The session flow shared by every platform.
//!
//! One cooperative sequence owns the page: join, wait for admission, introduce
//! the bot, register observers, then wait for the meeting to end while carrying
//! out replies the recording engine asks for. Observers run in their own tasks
//! and only ever enqueue events.

use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn, Instrument};

use super::{JoinError, Locator, Observation, PlatformAdapter, RenderSurface, SurfaceError};
use crate::invite::{InviteStatus, InviteStatusUpdate, InviteStore};
use crate::session::{
    ChatMessage, Directive, RecordingHandle, SessionContext, SessionEvent, SpeakerChange,
};
use crate::transcription::TranscriptionService;

/// Label some platforms show when nobody is talking.
const NO_SPEAKER: &str = "No one";

/// How a session that got into the meeting finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The platform showed its meeting-ended signal
    Ended,
    /// A participant sent the end command
    Left,
    /// The meeting timeout elapsed first
    TimedOut,
}

impl SessionOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Ended => "The meeting has ended.",
            Self::Left => "Your scribe has been removed from the meeting.",
            Self::TimedOut => "Your scribe left because the meeting reached its time limit.",
        }
    }
}

pub struct SessionFlow<'a> {
    ctx: &'a SessionContext,
    store: &'a dyn InviteStore,
    recorder: RecordingHandle,
    directives: mpsc::Receiver<Directive>,
    transcription: Arc<dyn TranscriptionService>,
    element_timeout: Duration,
}

impl<'a> SessionFlow<'a> {
    pub fn new(
        ctx: &'a SessionContext,
        store: &'a dyn InviteStore,
        recorder: RecordingHandle,
        directives: mpsc::Receiver<Directive>,
        transcription: Arc<dyn TranscriptionService>,
        element_timeout: Duration,
    ) -> Self {
        Self {
            ctx,
            store,
            recorder,
            directives,
            transcription,
            element_timeout,
        }
    }

    /// Run the session on `surface` until it ends. Errors mean the bot never
    /// got far enough to record anything.
    #[instrument(skip_all, fields(invite_id = %self.ctx.invite.id, platform = %adapter.platform()))]
    pub async fn initialize(
        mut self,
        adapter: &dyn PlatformAdapter,
        surface: &dyn RenderSurface,
    ) -> Result<SessionOutcome, JoinError> {
        adapter.join(surface, self.ctx).await?;

        info!("Waiting for admission");
        let waiting_timeout = self.ctx.waiting_timeout;
        surface
            .wait_for(&adapter.admission_signal(), waiting_timeout)
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    JoinError::NotAdmitted {
                        waited_ms: u64::try_from(waiting_timeout.as_millis())
                            .unwrap_or(u64::MAX),
                    }
                } else {
                    JoinError::JoinControl(e)
                }
            })?;

        self.mark_joined().await;
        tokio::time::sleep(self.ctx.admission_settle).await;

        info!("Opening chat panel");
        adapter
            .open_chat(surface)
            .await
            .map_err(JoinError::JoinControl)?;

        info!("Sending introduction messages");
        send_messages(
            surface,
            &adapter.chat_input(),
            &self.ctx.intro_messages,
            self.element_timeout,
        )
        .await
        .map_err(JoinError::JoinControl)?;

        self.register_observers(adapter, surface).await;

        info!("Waiting for meeting end");
        let outcome = self.wait_for_end(adapter, surface).await;
        self.recorder.send(SessionEvent::ForceIdle).await;
        Ok(outcome)
    }

    async fn mark_joined(&self) {
        let update = InviteStatusUpdate {
            invite_id: self.ctx.invite.id.clone(),
            status: InviteStatus::Joined,
        };
        match self.store.update_status(&update).await {
            Ok(true) => info!("Invite marked Joined"),
            Ok(false) => warn!("Invite disappeared before it could be marked Joined"),
            Err(e) => warn!("Failed to mark invite Joined: {:#}", e),
        }
    }

    async fn register_observers(&self, adapter: &dyn PlatformAdapter, surface: &dyn RenderSurface) {
        match surface.observe(adapter.speaker_observer()).await {
            Ok(rx) => {
                info!("Listening for speaker changes");
                tokio::spawn(
                    forward_speakers(rx, self.recorder.clone(), self.transcription.clone())
                        .in_current_span(),
                );
            }
            Err(e) => warn!("Speaker observer unavailable, continuing without it: {}", e),
        }

        match surface.observe(adapter.chat_observer()).await {
            Ok(rx) => {
                info!("Listening for chat messages");
                tokio::spawn(
                    forward_chat(rx, self.recorder.clone(), adapter.system_senders())
                        .in_current_span(),
                );
            }
            Err(e) => warn!("Chat observer unavailable, continuing without it: {}", e),
        }
    }

    async fn wait_for_end(
        &mut self,
        adapter: &dyn PlatformAdapter,
        surface: &dyn RenderSurface,
    ) -> SessionOutcome {
        let element_timeout = self.element_timeout;
        let directives = &mut self.directives;
        let chat_input = adapter.chat_input();

        let end = adapter.wait_for_end(surface, self.ctx.meeting_timeout);
        tokio::pin!(end);
        let mut directives_open = true;

        loop {
            tokio::select! {
                result = &mut end => {
                    return match result {
                        Ok(()) => {
                            info!("Meeting ended");
                            SessionOutcome::Ended
                        }
                        Err(e) if e.is_timeout() => {
                            info!("Meeting timed out");
                            SessionOutcome::TimedOut
                        }
                        Err(e) => {
                            warn!("Lost the meeting page, treating the meeting as over: {}", e);
                            SessionOutcome::Ended
                        }
                    };
                }
                directive = directives.recv(), if directives_open => match directive {
                    Some(Directive::SendMessages(lines)) => {
                        if let Err(e) = send_messages(surface, &chat_input, &lines, element_timeout).await {
                            warn!("Failed to send chat reply: {}", e);
                        }
                    }
                    Some(Directive::Leave) => {
                        info!("Leaving meeting");
                        if let Err(e) = surface.goto("about:blank").await {
                            warn!("Failed to navigate away from the meeting: {}", e);
                        }
                        return SessionOutcome::Left;
                    }
                    None => directives_open = false,
                },
            }
        }
    }
}

async fn send_messages(
    surface: &dyn RenderSurface,
    input: &Locator,
    lines: &[String],
    timeout: Duration,
) -> Result<(), SurfaceError> {
    surface.wait_for(input, timeout).await?;
    for line in lines {
        surface.type_text(input, line, true).await?;
    }
    Ok(())
}

async fn forward_speakers(
    mut rx: mpsc::Receiver<Observation>,
    recorder: RecordingHandle,
    transcription: Arc<dyn TranscriptionService>,
) {
    while let Some(observation) = rx.recv().await {
        let Observation::Speaker(name) = observation else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || name == NO_SPEAKER {
            continue;
        }

        let at = Local::now();
        transcription.speaker_change(name, at);
        let change = SpeakerChange {
            name: name.to_string(),
            at,
        };
        if !recorder.send(SessionEvent::Speaker(change)).await {
            break;
        }
    }
    debug!("Speaker observer finished");
}

async fn forward_chat(
    mut rx: mpsc::Receiver<Observation>,
    recorder: RecordingHandle,
    system_senders: &'static [&'static str],
) {
    // Grouped follow-up messages carry no sender of their own
    let mut last_sender = String::new();

    while let Some(observation) = rx.recv().await {
        let Observation::Chat {
            sender,
            text,
            attachment,
        } = observation
        else {
            continue;
        };

        if let Some(sender) = sender.map(|s| s.trim().to_string()) {
            if !sender.is_empty() {
                last_sender = sender;
            }
        }
        if system_senders.contains(&last_sender.as_str()) {
            continue;
        }

        let message = ChatMessage {
            sender: last_sender.clone(),
            text: text.trim().to_string(),
            at: Local::now(),
            attachment,
        };
        if !recorder.send(SessionEvent::Chat(message)).await {
            break;
        }
    }
    debug!("Chat observer finished");
}
