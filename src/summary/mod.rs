//! Turns a finished session into one artifact for the invite's recipients.

pub mod delivery;

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

use crate::session::{recording::timestamp_prefix, BotSession};

pub use delivery::{delivery_from_config, CommandDelivery, FileDelivery, SummaryDelivery};

pub const NOTHING_SAVED: &str = "No meeting details were saved.";

/// A delivered meeting summary.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub invite_id: String,
    pub subject: String,
    pub recipients: Vec<String>,
    pub body: String,
    /// Chat lines, one per message, in order
    pub chat: String,
    /// Caption lines separated by blank lines
    pub transcript: String,
    /// File name to link
    pub attachments: BTreeMap<String, String>,
}

impl Summary {
    pub fn has_details(&self) -> bool {
        !self.chat.is_empty() || !self.transcript.is_empty() || !self.attachments.is_empty()
    }
}

pub struct SummaryAssembler {
    delivery: Arc<dyn SummaryDelivery>,
    timeout: Duration,
}

impl SummaryAssembler {
    pub fn new(delivery: Arc<dyn SummaryDelivery>, timeout: Duration) -> Self {
        Self { delivery, timeout }
    }

    /// Build the artifact. `outcome` is the line that explains how the session ended.
    pub fn assemble(session: &BotSession, outcome: &str) -> Summary {
        let invite = &session.invite;
        let mut summary = Summary {
            invite_id: invite.id.clone(),
            subject: invite.name.clone(),
            recipients: invite.recipients.clone(),
            body: String::new(),
            chat: session.messages.join("\n"),
            transcript: session.captions.join("\n\n"),
            attachments: session.attachments.clone(),
        };

        if session.is_empty() {
            summary.body = format!("{} {}", outcome, NOTHING_SAVED);
            return summary;
        }

        let mut body = format!("{}\n\nMeeting: {}\n", outcome, invite.name);
        if !session.speakers.is_empty() {
            body.push_str("\nSpeakers:\n");
            for change in &session.speakers {
                body.push_str(&format!("{} {}\n", timestamp_prefix(&change.at), change.name));
            }
        }
        if !summary.chat.is_empty() {
            body.push_str("\nChat:\n");
            body.push_str(&summary.chat);
            body.push('\n');
        }
        if !summary.transcript.is_empty() {
            body.push_str("\nTranscript:\n");
            body.push_str(&summary.transcript);
            body.push('\n');
        }
        if !summary.attachments.is_empty() {
            body.push_str("\nAttachments:\n");
            for (file_name, link) in &summary.attachments {
                body.push_str(&format!("{}: {}\n", file_name, link));
            }
        }
        summary.body = body;
        summary
    }

    /// Assemble and deliver, bounded by the assembly timeout.
    #[instrument(skip_all, fields(invite_id = %session.invite.id))]
    pub async fn run(&self, session: &BotSession, outcome: &str) -> Result<Summary> {
        let summary = Self::assemble(session, outcome);

        match tokio::time::timeout(self.timeout, self.delivery.deliver(&summary)).await {
            Ok(Ok(())) => {
                info!(
                    "Summary delivered via {} to {} recipient(s)",
                    self.delivery.name(),
                    summary.recipients.len()
                );
                Ok(summary)
            }
            Ok(Err(e)) => Err(e.context("Summary delivery failed")),
            Err(_) => Err(anyhow!(
                "Summary delivery timed out after {}s",
                self.timeout.as_secs()
            )),
        }
    }
}
