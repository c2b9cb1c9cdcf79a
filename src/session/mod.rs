//! Per-session state: the context every component shares and the recording
//! engine that owns what gets captured.

pub mod context;
pub mod recording;

pub use context::{Command, Commands, SessionContext};
pub use recording::{
    Attachment, BotSession, Caption, ChatMessage, Directive, RecordingEngine, RecordingHandle,
    RecordingState, RecordingStateMachine, SessionEvent, SpeakerChange,
};
