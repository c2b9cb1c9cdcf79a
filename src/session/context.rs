//! Per-session context, built once when the task runner starts and passed to
//! every component of the session.

use std::time::Duration;

use crate::config::ScribeConfig;
use crate::invite::{natural_list, Invite};

/// Chat command vocabulary. Matching is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commands {
    pub start: String,
    pub pause: String,
    pub end: String,
}

impl Default for Commands {
    fn default() -> Self {
        Self {
            start: "START".to_string(),
            pause: "PAUSE".to_string(),
            end: "END".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Pause,
    End,
}

impl Commands {
    pub fn parse(&self, text: &str) -> Option<Command> {
        let text = text.trim();
        if text == self.start {
            Some(Command::Start)
        } else if text == self.pause {
            Some(Command::Pause)
        } else if text == self.end {
            Some(Command::End)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionContext {
    pub invite: Invite,
    /// Name the bot joins under, e.g. `Scribe [Alex]`
    pub identity: String,
    pub commands: Commands,
    pub intro_messages: Vec<String>,
    pub start_messages: Vec<String>,
    pub pause_messages: Vec<String>,
    pub waiting_timeout: Duration,
    pub meeting_timeout: Duration,
    pub admission_settle: Duration,
}

impl SessionContext {
    pub fn new(invite: Invite, name_seed: &str, config: &ScribeConfig) -> Self {
        let commands = Commands::default();
        let identity = format!("Scribe [{}]", name_seed);

        let inviters = natural_list(&invite.recipients);
        let intro_first = if inviters.is_empty() {
            "Hello! I am an AI-assisted scribe.".to_string()
        } else {
            format!("Hello! I am an AI-assisted scribe. I was invited by {}.", inviters)
        };

        let intro_messages = vec![
            intro_first,
            format!(
                "If all other participants consent to my use, send \"{}\" in the chat \
                 to start saving new speakers, messages, and machine-generated captions.",
                commands.start
            ),
            format!(
                "If you do not consent to my use, send \"{}\" in the chat \
                 to remove me from this meeting.",
                commands.end
            ),
        ];
        let start_messages = vec![
            "Saving new speakers, messages, and machine-generated captions.".to_string(),
            format!(
                "Send \"{}\" in the chat to stop saving meeting details.",
                commands.pause
            ),
        ];
        let pause_messages = vec![
            "Not saving speakers, messages, or machine-generated captions.".to_string(),
            format!(
                "Send \"{}\" in the chat to start saving meeting details.",
                commands.start
            ),
        ];

        Self {
            invite,
            identity,
            commands,
            intro_messages,
            start_messages,
            pause_messages,
            waiting_timeout: config.waiting_timeout(),
            meeting_timeout: config.meeting_timeout(),
            admission_settle: Duration::from_millis(config.admission_settle_ms),
        }
    }

    /// Whether a chat sender is the bot itself.
    pub fn is_self(&self, sender: &str) -> bool {
        sender.contains(&self.identity)
    }
}
