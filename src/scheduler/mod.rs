//! Turning invites into time triggers.
//!
//! invite change → [`ScheduleReconciler`] → [`TriggerBackend`] entry →
//! [`Dispatcher`] fires it → task runner.

pub mod dispatcher;
pub mod reconciler;
pub mod retry;
pub mod trigger;

use serde::{Deserialize, Serialize};

use crate::invite::{InviteChangeEvent, TriggerPayload};

pub use dispatcher::{Dispatcher, ProcessTarget, TriggerTarget, TRIGGER_ENV};
pub use reconciler::{ReconcileOutcome, ScheduleError, ScheduleReconciler, SkipReason};
pub use retry::RetryPolicy;
pub use trigger::{SqliteTriggerBackend, TriggerBackend};

/// A time-bound instruction to start a bot session for one invite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub invite_id: String,
    /// Epoch seconds
    pub fires_at: i64,
    pub target: TriggerPayload,
    /// Set once the dispatcher has launched the session
    #[serde(default)]
    pub fired_at: Option<i64>,
}

impl ScheduleEntry {
    pub fn for_event(event: &InviteChangeEvent, now: i64, lead_time_secs: i64, seed: &str) -> Self {
        Self {
            invite_id: event.invite_id.clone(),
            fires_at: fire_time(event.scheduled_epoch_seconds, now, lead_time_secs),
            target: event.trigger_payload(seed),
            fired_at: None,
        }
    }

    /// Identifier the trigger is registered under.
    pub fn target_ref(&self) -> String {
        sanitize_trigger_name(&self.invite_id)
    }
}

/// `max(now, scheduled) - lead`. Invites without a time fire right away.
pub fn fire_time(scheduled: Option<i64>, now: i64, lead_time_secs: i64) -> i64 {
    scheduled.unwrap_or(now).max(now) - lead_time_secs
}

/// Trigger names may only contain `[0-9A-Za-z-_.]`.
pub fn sanitize_trigger_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fire_time_future_meeting() {
        assert_eq!(fire_time(Some(1_120), 1_000, 10), 1_110);
    }

    #[test]
    fn test_fire_time_past_or_missing_meeting() {
        assert_eq!(fire_time(Some(500), 1_000, 10), 990);
        assert_eq!(fire_time(None, 1_000, 10), 990);
    }

    #[test]
    fn test_sanitize_trigger_name() {
        assert_eq!(sanitize_trigger_name("user@example.com#Chime#123"), "userexample.comChime123");
        assert_eq!(sanitize_trigger_name("a-b_c.d"), "a-b_c.d");
    }
}
