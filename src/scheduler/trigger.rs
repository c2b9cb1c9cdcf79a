//! Trigger backend: where schedule entries live until they fire.

use anyhow::Result;
use async_trait::async_trait;

use super::ScheduleEntry;
use crate::db::{self, ScheduleRepository, SharedConnection};

#[async_trait]
pub trait TriggerBackend: Send + Sync {
    async fn get(&self, invite_id: &str) -> Result<Option<ScheduleEntry>>;

    /// Create or replace the entry keyed by `entry.invite_id`.
    async fn put(&self, entry: &ScheduleEntry) -> Result<()>;

    /// Returns whether an entry existed.
    async fn delete(&self, invite_id: &str) -> Result<bool>;

    async fn list(&self) -> Result<Vec<ScheduleEntry>>;
}

/// Local backend over the `schedule_entries` table.
#[derive(Clone)]
pub struct SqliteTriggerBackend {
    conn: SharedConnection,
}

impl SqliteTriggerBackend {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    pub async fn due(&self, now: i64) -> Result<Vec<ScheduleEntry>> {
        let conn = db::lock(&self.conn)?;
        ScheduleRepository::due(&conn, now)
    }

    /// Claim an entry so it fires once. False if someone else got it.
    pub async fn claim(&self, invite_id: &str, now: i64) -> Result<bool> {
        let conn = db::lock(&self.conn)?;
        ScheduleRepository::mark_fired(&conn, invite_id, now)
    }
}

#[async_trait]
impl TriggerBackend for SqliteTriggerBackend {
    async fn get(&self, invite_id: &str) -> Result<Option<ScheduleEntry>> {
        let conn = db::lock(&self.conn)?;
        ScheduleRepository::get(&conn, invite_id)
    }

    async fn put(&self, entry: &ScheduleEntry) -> Result<()> {
        let conn = db::lock(&self.conn)?;
        ScheduleRepository::upsert(&conn, entry)
    }

    async fn delete(&self, invite_id: &str) -> Result<bool> {
        let conn = db::lock(&self.conn)?;
        ScheduleRepository::delete(&conn, invite_id)
    }

    async fn list(&self) -> Result<Vec<ScheduleEntry>> {
        let conn = db::lock(&self.conn)?;
        ScheduleRepository::list(&conn)
    }
}
