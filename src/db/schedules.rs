//! Schedule entry persistence. The `invite_id` primary key keeps at most one
//! live entry per invite.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::invite::TriggerPayload;
use crate::scheduler::ScheduleEntry;

pub struct ScheduleRepository;

impl ScheduleRepository {
    /// Create or replace the entry for `entry.invite_id`. Replacing re-arms
    /// the trigger (clears `fired_at`).
    pub fn upsert(conn: &Connection, entry: &ScheduleEntry) -> Result<()> {
        let target = serde_json::to_string(&entry.target)?;
        conn.execute(
            "INSERT INTO schedule_entries (invite_id, fires_at, target, fired_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(invite_id) DO UPDATE SET \
             fires_at = excluded.fires_at, target = excluded.target, fired_at = excluded.fired_at",
            params![entry.invite_id, entry.fires_at, target, entry.fired_at],
        )
        .context("Failed to upsert schedule entry")?;
        Ok(())
    }

    pub fn get(conn: &Connection, invite_id: &str) -> Result<Option<ScheduleEntry>> {
        let row = conn
            .query_row(
                "SELECT invite_id, fires_at, target, fired_at FROM schedule_entries WHERE invite_id = ?1",
                params![invite_id],
                read_row,
            )
            .optional()
            .context("Failed to query schedule entry")?;

        row.map(RawEntry::into_entry).transpose()
    }

    pub fn delete(conn: &Connection, invite_id: &str) -> Result<bool> {
        let deleted = conn
            .execute(
                "DELETE FROM schedule_entries WHERE invite_id = ?1",
                params![invite_id],
            )
            .context("Failed to delete schedule entry")?;
        Ok(deleted > 0)
    }

    pub fn list(conn: &Connection) -> Result<Vec<ScheduleEntry>> {
        Self::query(
            conn,
            "SELECT invite_id, fires_at, target, fired_at FROM schedule_entries ORDER BY fires_at ASC",
            params![],
        )
    }

    /// Entries whose time has come and that have not fired yet.
    pub fn due(conn: &Connection, now: i64) -> Result<Vec<ScheduleEntry>> {
        Self::query(
            conn,
            "SELECT invite_id, fires_at, target, fired_at FROM schedule_entries \
             WHERE fires_at <= ?1 AND fired_at IS NULL ORDER BY fires_at ASC",
            params![now],
        )
    }

    /// Claim an entry for firing. Returns false if it was already claimed or
    /// no longer exists.
    pub fn mark_fired(conn: &Connection, invite_id: &str, now: i64) -> Result<bool> {
        let claimed = conn
            .execute(
                "UPDATE schedule_entries SET fired_at = ?1 WHERE invite_id = ?2 AND fired_at IS NULL",
                params![now, invite_id],
            )
            .context("Failed to mark schedule entry fired")?;
        Ok(claimed > 0)
    }

    fn query(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<ScheduleEntry>> {
        let mut stmt = conn.prepare(sql).context("Failed to prepare schedule query")?;
        let rows = stmt
            .query_map(params, read_row)
            .context("Failed to query schedule entries")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to map schedule entries")?;

        rows.into_iter().map(RawEntry::into_entry).collect()
    }
}

struct RawEntry {
    invite_id: String,
    fires_at: i64,
    target: String,
    fired_at: Option<i64>,
}

impl RawEntry {
    fn into_entry(self) -> Result<ScheduleEntry> {
        let target: TriggerPayload =
            serde_json::from_str(&self.target).context("Invalid schedule target")?;
        Ok(ScheduleEntry {
            invite_id: self.invite_id,
            fires_at: self.fires_at,
            target,
            fired_at: self.fired_at,
        })
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        invite_id: row.get(0)?,
        fires_at: row.get(1)?,
        target: row.get(2)?,
        fired_at: row.get(3)?,
    })
}
