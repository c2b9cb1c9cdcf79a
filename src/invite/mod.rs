//! Invite records and the messages exchanged about them.
//!
//! An invite asks for a scribe to join one meeting on one platform. The
//! scheduler reacts to invite change events, the task runner consumes the
//! trigger payload and writes status updates back.

pub mod events;
pub mod store;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

pub use events::{ChangeOperation, InviteChangeEvent, InviteStatusUpdate, TriggerPayload};
pub use store::{InviteStore, SqliteInviteStore};

/// Meeting platform an invite targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Chime,
    Webex,
    Teams,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chime => "Chime",
            Self::Webex => "Webex",
            Self::Teams => "Teams",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "Chime" => Ok(Self::Chime),
            "Webex" => Ok(Self::Webex),
            "Teams" => Ok(Self::Teams),
            _ => bail!("Unknown meeting platform: {}", s),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an invite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InviteStatus {
    Scheduled,
    Joined,
    Completed,
    Failed,
}

impl InviteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "Scheduled",
            Self::Joined => "Joined",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "Scheduled" => Ok(Self::Scheduled),
            "Joined" => Ok(Self::Joined),
            "Completed" => Ok(Self::Completed),
            "Failed" => Ok(Self::Failed),
            _ => bail!("Unknown invite status: {}", s),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A persisted request for a scribe to join a meeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    pub id: String,
    pub name: String,
    pub platform: Platform,
    /// Meeting id for Chime/Webex, full join link for Teams
    pub meeting_id: String,
    pub meeting_password: Option<String>,
    /// Epoch seconds; `None` means join immediately
    pub scheduled_time: Option<i64>,
    pub status: InviteStatus,
    /// Addresses of the people who invited the scribe
    #[serde(default)]
    pub recipients: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Invite {
    pub fn new(
        name: impl Into<String>,
        platform: Platform,
        meeting_id: impl Into<String>,
        scheduled_time: Option<i64>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            platform,
            meeting_id: meeting_id.into(),
            meeting_password: None,
            scheduled_time,
            status: InviteStatus::Scheduled,
            recipients: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.meeting_password = password;
        self
    }

    pub fn with_recipients(mut self, recipients: Vec<String>) -> Self {
        self.recipients = recipients;
        self
    }
}

/// Join a list of names the way a person would write it:
/// "a", "a and b", "a, b, and c".
pub fn natural_list(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [one] => one.clone(),
        [first, second] => format!("{} and {}", first, second),
        [rest @ .., last] => format!("{}, and {}", rest.join(", "), last),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_parse() {
        assert_eq!(Platform::parse("Chime").unwrap(), Platform::Chime);
        assert_eq!(Platform::parse("Teams").unwrap(), Platform::Teams);
        assert!(Platform::parse("Zoom").is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!InviteStatus::Scheduled.is_terminal());
        assert!(!InviteStatus::Joined.is_terminal());
        assert!(InviteStatus::Completed.is_terminal());
        assert!(InviteStatus::Failed.is_terminal());
    }

    #[test]
    fn test_natural_list() {
        let names = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(natural_list(&[]), "");
        assert_eq!(natural_list(&names(&["a@x.com"])), "a@x.com");
        assert_eq!(natural_list(&names(&["a", "b"])), "a and b");
        assert_eq!(natural_list(&names(&["a", "b", "c"])), "a, b, and c");
    }

    #[test]
    fn test_invite_serializes_camel_case() {
        let invite = Invite::new("Standup", Platform::Chime, "1234567890", Some(100));
        let json = serde_json::to_value(&invite).unwrap();
        assert_eq!(json["meetingId"], "1234567890");
        assert_eq!(json["scheduledTime"], 100);
        assert_eq!(json["status"], "Scheduled");
    }
}
