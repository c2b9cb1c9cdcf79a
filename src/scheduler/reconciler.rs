//! Converts invite change events into exactly one trigger per invite.
//!
//! Events for different invites are applied concurrently; events for the same
//! invite are serialized behind a per-invite lock. The lock also guards a small
//! ledger (last applied event, tombstone) which makes redelivery a no-op and
//! keeps late INSERTs from resurrecting a removed invite.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use super::retry::{Exhausted, RetryPolicy};
use super::trigger::TriggerBackend;
use super::ScheduleEntry;
use crate::invite::{ChangeOperation, InviteChangeEvent};

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Trigger backend failed for invite {invite_id} after {attempts} attempts: {last_error}")]
    Exhausted {
        invite_id: String,
        attempts: u32,
        last_error: String,
    },
}

impl ScheduleError {
    fn exhausted(invite_id: &str, e: Exhausted) -> Self {
        Self::Exhausted {
            invite_id: invite_id.to_string(),
            attempts: e.attempts,
            last_error: format!("{:#}", e.last_error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Exact redelivery of the last applied event
    Duplicate,
    /// Older than the last applied event
    Stale,
    /// The invite was removed; nothing may schedule it again
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Scheduled { fires_at: i64 },
    Unscheduled { existed: bool },
    Skipped(SkipReason),
}

/// How long an invite's ledger (and REMOVE tombstone) is kept after its last
/// event. Idle entries older than this are pruned.
pub const DEFAULT_LEDGER_TTL_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Default)]
struct KeyState {
    last: Option<InviteChangeEvent>,
    removed: bool,
    /// `now` of the last event applied or skipped for this invite
    touched: i64,
}

pub struct ScheduleReconciler {
    backend: Arc<dyn TriggerBackend>,
    policy: RetryPolicy,
    lead_time_secs: i64,
    default_seed: String,
    ledger_ttl_secs: i64,
    keys: Mutex<HashMap<String, Arc<tokio::sync::Mutex<KeyState>>>>,
}

impl ScheduleReconciler {
    pub fn new(
        backend: Arc<dyn TriggerBackend>,
        policy: RetryPolicy,
        lead_time_secs: u64,
        default_seed: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            policy,
            lead_time_secs: lead_time_secs as i64,
            default_seed: default_seed.into(),
            ledger_ttl_secs: DEFAULT_LEDGER_TTL_SECS,
            keys: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_ledger_ttl(mut self, secs: i64) -> Self {
        self.ledger_ttl_secs = secs;
        self
    }

    /// Invites currently remembered by the ledger.
    pub fn tracked_invites(&self) -> usize {
        self.keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub async fn apply(&self, event: &InviteChangeEvent) -> Result<ReconcileOutcome, ScheduleError> {
        self.apply_at(event, chrono::Utc::now().timestamp()).await
    }

    #[instrument(skip(self, event), fields(invite_id = %event.invite_id, op = ?event.operation))]
    pub async fn apply_at(
        &self,
        event: &InviteChangeEvent,
        now: i64,
    ) -> Result<ReconcileOutcome, ScheduleError> {
        let key = self.key(&event.invite_id, now);
        let mut state = key.lock().await;
        state.touched = state.touched.max(now);

        if state.removed {
            debug!("Invite already removed, ignoring event");
            return Ok(ReconcileOutcome::Skipped(SkipReason::Removed));
        }
        if let Some(last) = &state.last {
            if last == event {
                debug!("Duplicate event, ignoring");
                return Ok(ReconcileOutcome::Skipped(SkipReason::Duplicate));
            }
            if event.version < last.version {
                debug!(
                    "Stale event (version {} < {}), ignoring",
                    event.version, last.version
                );
                return Ok(ReconcileOutcome::Skipped(SkipReason::Stale));
            }
        }

        let outcome = if event.is_deletion() {
            self.unschedule(&event.invite_id).await?
        } else {
            self.schedule(event, now).await?
        };

        // Only a fully applied mutation advances the ledger
        state.last = Some(event.clone());
        if event.operation == ChangeOperation::Remove {
            state.removed = true;
        }

        Ok(outcome)
    }

    async fn schedule(
        &self,
        event: &InviteChangeEvent,
        now: i64,
    ) -> Result<ReconcileOutcome, ScheduleError> {
        let entry = ScheduleEntry::for_event(event, now, self.lead_time_secs, &self.default_seed);
        let backend = &self.backend;

        let prior = self
            .policy
            .run("Read trigger", || backend.get(&entry.invite_id))
            .await
            .map_err(|e| ScheduleError::exhausted(&entry.invite_id, e))?;

        // Same target as what is stored: keep it, including its fired mark,
        // so a status change or redelivery never launches a second session
        if let Some(existing) = prior.as_ref().filter(|p| p.target == entry.target) {
            debug!(
                fired = existing.fired_at.is_some(),
                "Trigger already in place, leaving it untouched"
            );
            return Ok(ReconcileOutcome::Scheduled {
                fires_at: existing.fires_at,
            });
        }

        let written = self
            .policy
            .run("Write trigger", || async {
                backend.put(&entry).await?;
                match backend.get(&entry.invite_id).await? {
                    Some(stored) if stored == entry => Ok(()),
                    Some(_) => anyhow::bail!("stored trigger does not match what was written"),
                    None => anyhow::bail!("trigger missing after write"),
                }
            })
            .await;

        match written {
            Ok(()) => {
                info!(
                    fires_at = entry.fires_at,
                    target = %entry.target_ref(),
                    "Trigger scheduled"
                );
                Ok(ReconcileOutcome::Scheduled {
                    fires_at: entry.fires_at,
                })
            }
            Err(e) => {
                let err = ScheduleError::exhausted(&entry.invite_id, e);
                error!("{}", err);
                self.restore(&entry.invite_id, prior).await;
                Err(err)
            }
        }
    }

    async fn unschedule(&self, invite_id: &str) -> Result<ReconcileOutcome, ScheduleError> {
        let backend = &self.backend;
        let existed = self
            .policy
            .run("Delete trigger", || backend.delete(invite_id))
            .await
            .map_err(|e| {
                let err = ScheduleError::exhausted(invite_id, e);
                error!("{}", err);
                err
            })?;

        info!(existed, "Trigger removed");
        Ok(ReconcileOutcome::Unscheduled { existed })
    }

    /// Put the backend back the way it was before a failed write.
    async fn restore(&self, invite_id: &str, prior: Option<ScheduleEntry>) {
        let result = match &prior {
            Some(entry) => self.backend.put(entry).await,
            None => self.backend.delete(invite_id).await.map(|_| ()),
        };
        if let Err(e) = result {
            warn!(invite_id, "Failed to restore prior trigger state: {:#}", e);
        }
    }

    fn key(&self, invite_id: &str, now: i64) -> Arc<tokio::sync::Mutex<KeyState>> {
        let mut keys = self
            .keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Drop ledgers nobody is using that have been quiet for a full TTL
        let ttl = self.ledger_ttl_secs;
        keys.retain(|_, key| {
            Arc::strong_count(key) > 1
                || key
                    .try_lock()
                    .map(|state| now - state.touched < ttl)
                    .unwrap_or(true)
        });

        keys.entry(invite_id.to_string()).or_default().clone()
    }
}
