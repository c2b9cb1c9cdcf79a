//! Recording state machine and the single task that owns session buffers.
//!
//! Observers and the transcription service only ever enqueue [`SessionEvent`]s.
//! One consumer task applies them in order, so the buffers have exactly one
//! writer. Replies the meeting should see (acknowledgements, leaving) travel
//! back to the automation flow as [`Directive`]s.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::context::{Command, SessionContext};
use crate::invite::Invite;

const EVENT_BUFFER: usize = 256;
const DIRECTIVE_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordingState {
    Idle,
    Recording,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub file_name: String,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub sender: String,
    pub text: String,
    pub at: DateTime<Local>,
    pub attachment: Option<Attachment>,
}

impl ChatMessage {
    pub fn new(sender: impl Into<String>, text: impl Into<String>, at: DateTime<Local>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            at,
            attachment: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeakerChange {
    pub name: String,
    pub at: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Caption {
    pub speaker: String,
    pub text: String,
    pub at: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Chat(ChatMessage),
    Speaker(SpeakerChange),
    Caption(Caption),
    /// Meeting over or timed out: stop recording without acknowledging
    ForceIdle,
    /// No further events will be applied
    Shutdown,
}

/// Something the automation flow must do on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    SendMessages(Vec<String>),
    Leave,
}

/// Everything captured during one session.
#[derive(Debug, Clone, Serialize)]
pub struct BotSession {
    pub invite: Invite,
    pub state: RecordingState,
    pub speakers: Vec<SpeakerChange>,
    pub messages: Vec<String>,
    pub captions: Vec<String>,
    /// File name to link
    pub attachments: BTreeMap<String, String>,
}

impl BotSession {
    pub fn new(invite: Invite) -> Self {
        Self {
            invite,
            state: RecordingState::Idle,
            speakers: Vec::new(),
            messages: Vec::new(),
            captions: Vec::new(),
            attachments: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.speakers.is_empty()
            && self.messages.is_empty()
            && self.captions.is_empty()
            && self.attachments.is_empty()
    }
}

pub fn timestamp_prefix(at: &DateTime<Local>) -> String {
    format!("[{}]", at.format("%H:%M"))
}

pub struct RecordingStateMachine {
    ctx: SessionContext,
    session: BotSession,
    last_at: Option<DateTime<Local>>,
    last_caption_speaker: Option<String>,
}

impl RecordingStateMachine {
    pub fn new(ctx: SessionContext) -> Self {
        let session = BotSession::new(ctx.invite.clone());
        Self {
            ctx,
            session,
            last_at: None,
            last_caption_speaker: None,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.session.state
    }

    pub fn session(&self) -> &BotSession {
        &self.session
    }

    pub fn into_session(self) -> BotSession {
        self.session
    }

    /// Apply one event. Returns what the page flow should do about it, if anything.
    pub fn apply(&mut self, event: SessionEvent) -> Option<Directive> {
        if self.session.state == RecordingState::Ended {
            return None;
        }

        match event {
            SessionEvent::Chat(message) => self.on_chat(message),
            SessionEvent::Speaker(change) => {
                if self.recording() {
                    let at = self.monotonic(change.at);
                    self.session.speakers.push(SpeakerChange { at, ..change });
                }
                None
            }
            SessionEvent::Caption(caption) => {
                if self.recording() {
                    self.on_caption(caption);
                }
                None
            }
            SessionEvent::ForceIdle => {
                if self.recording() {
                    info!("Recording stopped at end of meeting");
                }
                self.go_idle();
                None
            }
            SessionEvent::Shutdown => None,
        }
    }

    fn on_chat(&mut self, message: ChatMessage) -> Option<Directive> {
        if self.ctx.is_self(&message.sender) {
            return None;
        }

        match self.ctx.commands.parse(&message.text) {
            Some(Command::End) => {
                info!(sender = %message.sender, "End requested, leaving meeting");
                self.session.state = RecordingState::Ended;
                return Some(Directive::Leave);
            }
            Some(Command::Start) => {
                if self.session.state == RecordingState::Idle {
                    info!(sender = %message.sender, "Recording started");
                    self.session.state = RecordingState::Recording;
                    return Some(Directive::SendMessages(self.ctx.start_messages.clone()));
                }
                return None;
            }
            Some(Command::Pause) => {
                if self.recording() {
                    info!(sender = %message.sender, "Recording paused");
                    self.go_idle();
                    return Some(Directive::SendMessages(self.ctx.pause_messages.clone()));
                }
                return None;
            }
            None => {}
        }

        if !self.recording() {
            debug!("Not recording, message discarded");
            return None;
        }

        let at = self.monotonic(message.at);
        let body = match &message.attachment {
            Some(attachment) => {
                self.session
                    .attachments
                    .insert(attachment.file_name.clone(), attachment.link.clone());
                if message.text.is_empty() {
                    attachment.file_name.clone()
                } else {
                    format!("{} | {}", message.text, attachment.file_name)
                }
            }
            None => message.text,
        };
        self.session
            .messages
            .push(format!("{} {}: {}", timestamp_prefix(&at), message.sender, body));
        None
    }

    fn on_caption(&mut self, caption: Caption) {
        let at = self.monotonic(caption.at);
        if self.last_caption_speaker.as_deref() == Some(caption.speaker.as_str()) {
            if let Some(last) = self.session.captions.last_mut() {
                last.push(' ');
                last.push_str(&caption.text);
                return;
            }
        }
        self.session.captions.push(format!(
            "{} {}: {}",
            timestamp_prefix(&at),
            caption.speaker,
            caption.text
        ));
        self.last_caption_speaker = Some(caption.speaker);
    }

    fn go_idle(&mut self) {
        self.session.state = RecordingState::Idle;
        self.last_caption_speaker = None;
    }

    fn recording(&self) -> bool {
        self.session.state == RecordingState::Recording
    }

    /// Clamp so timestamps never run backwards within a session.
    fn monotonic(&mut self, at: DateTime<Local>) -> DateTime<Local> {
        let at = match self.last_at {
            Some(last) if at < last => last,
            _ => at,
        };
        self.last_at = Some(at);
        at
    }
}

/// Producer side of a running recording engine. Cheap to clone; one per observer.
#[derive(Clone)]
pub struct RecordingHandle {
    events: mpsc::Sender<SessionEvent>,
    state: watch::Receiver<RecordingState>,
}

impl RecordingHandle {
    /// Enqueue an event. Returns false once the engine has shut down.
    pub async fn send(&self, event: SessionEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    pub fn state(&self) -> RecordingState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RecordingState> {
        self.state.clone()
    }
}

pub struct RecordingEngine {
    pub handle: RecordingHandle,
    pub directives: mpsc::Receiver<Directive>,
    pub task: JoinHandle<BotSession>,
}

impl RecordingEngine {
    /// Spawn the consumer task. It runs until [`SessionEvent::Shutdown`] arrives
    /// or every handle is dropped, then yields the captured session.
    pub fn spawn(mut machine: RecordingStateMachine) -> Self {
        let (event_tx, mut event_rx) = mpsc::channel(EVENT_BUFFER);
        let (directive_tx, directive_rx) = mpsc::channel(DIRECTIVE_BUFFER);
        let (state_tx, state_rx) = watch::channel(machine.state());

        let task = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if event == SessionEvent::Shutdown {
                    break;
                }
                if let Some(directive) = machine.apply(event) {
                    // The flow may already be gone; nothing left to tell it
                    let _ = directive_tx.send(directive).await;
                }
                state_tx.send_replace(machine.state());
            }
            machine.into_session()
        });

        Self {
            handle: RecordingHandle {
                events: event_tx,
                state: state_rx,
            },
            directives: directive_rx,
            task,
        }
    }
}
