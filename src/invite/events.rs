//! Wire messages: change events in, trigger payloads across, status updates out.

use serde::{Deserialize, Serialize};

use super::{Invite, InviteStatus, Platform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOperation {
    Insert,
    Modify,
    Remove,
}

/// One record from the invite change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteChangeEvent {
    pub operation: ChangeOperation,
    pub invite_id: String,
    pub platform: Platform,
    pub meeting_id: String,
    #[serde(default)]
    pub meeting_password: Option<String>,
    #[serde(default)]
    pub scheduled_epoch_seconds: Option<i64>,
    pub status: InviteStatus,
    /// Display-name seed copied into the trigger payload
    #[serde(default)]
    pub bot_display_name_seed: Option<String>,
    /// Source `updatedAt`; orders events for the same invite
    #[serde(default)]
    pub version: i64,
}

impl InviteChangeEvent {
    pub fn from_invite(operation: ChangeOperation, invite: &Invite) -> Self {
        Self {
            operation,
            invite_id: invite.id.clone(),
            platform: invite.platform,
            meeting_id: invite.meeting_id.clone(),
            meeting_password: invite.meeting_password.clone(),
            scheduled_epoch_seconds: invite.scheduled_time,
            status: invite.status,
            bot_display_name_seed: None,
            version: invite.updated_at,
        }
    }

    /// Whether this event means the invite should no longer be scheduled.
    pub fn is_deletion(&self) -> bool {
        match self.operation {
            ChangeOperation::Remove => true,
            ChangeOperation::Insert | ChangeOperation::Modify => self.status.is_terminal(),
        }
    }

    pub fn trigger_payload(&self, default_seed: &str) -> TriggerPayload {
        TriggerPayload {
            invite_id: self.invite_id.clone(),
            platform: self.platform,
            meeting_id: self.meeting_id.clone(),
            meeting_password: self.meeting_password.clone(),
            scheduled_epoch_seconds: self.scheduled_epoch_seconds,
            bot_display_name_seed: self
                .bot_display_name_seed
                .clone()
                .unwrap_or_else(|| default_seed.to_string()),
        }
    }
}

/// Parameters handed to the task runner when a trigger fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerPayload {
    pub invite_id: String,
    pub platform: Platform,
    pub meeting_id: String,
    #[serde(default)]
    pub meeting_password: Option<String>,
    #[serde(default)]
    pub scheduled_epoch_seconds: Option<i64>,
    pub bot_display_name_seed: String,
}

/// Status transition written back to the invite store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteStatusUpdate {
    pub invite_id: String,
    pub status: InviteStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_change_event() {
        let event: InviteChangeEvent = serde_json::from_str(
            r#"{"operation":"INSERT","inviteId":"a","platform":"Chime","meetingId":"1234567890","scheduledEpochSeconds":120,"status":"Scheduled"}"#,
        )
        .unwrap();

        assert_eq!(event.operation, ChangeOperation::Insert);
        assert_eq!(event.scheduled_epoch_seconds, Some(120));
        assert_eq!(event.version, 0);
        assert!(!event.is_deletion());
    }

    #[test]
    fn test_modify_into_terminal_is_deletion() {
        let invite = Invite::new("Sync", Platform::Webex, "999", None);
        let mut event = InviteChangeEvent::from_invite(ChangeOperation::Modify, &invite);
        assert!(!event.is_deletion());

        event.status = InviteStatus::Completed;
        assert!(event.is_deletion());

        event.status = InviteStatus::Scheduled;
        event.operation = ChangeOperation::Remove;
        assert!(event.is_deletion());
    }

    #[test]
    fn test_trigger_payload_seed_fallback() {
        let invite = Invite::new("Sync", Platform::Teams, "https://teams/x", Some(5));
        let mut event = InviteChangeEvent::from_invite(ChangeOperation::Insert, &invite);

        assert_eq!(event.trigger_payload("Scribe").bot_display_name_seed, "Scribe");

        event.bot_display_name_seed = Some("Alex".to_string());
        let payload = event.trigger_payload("Scribe");
        assert_eq!(payload.bot_display_name_seed, "Alex");
        assert_eq!(payload.invite_id, invite.id);
        assert_eq!(payload.scheduled_epoch_seconds, Some(5));
    }
}
