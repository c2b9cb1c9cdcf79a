//! Invite record persistence.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::invite::{Invite, InviteStatus, Platform};

/// Repository for invite records.
pub struct InviteRepository;

const COLUMNS: &str = "id, name, platform, meeting_id, meeting_password, scheduled_time, \
                       status, recipients, created_at, updated_at";

impl InviteRepository {
    pub fn insert(conn: &Connection, invite: &Invite) -> Result<()> {
        let recipients = serde_json::to_string(&invite.recipients)?;
        conn.execute(
            "INSERT INTO invites (id, name, platform, meeting_id, meeting_password, \
             scheduled_time, status, recipients, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                invite.id,
                invite.name,
                invite.platform.as_str(),
                invite.meeting_id,
                invite.meeting_password,
                invite.scheduled_time,
                invite.status.as_str(),
                recipients,
                invite.created_at,
                invite.updated_at,
            ],
        )
        .context("Failed to insert invite")?;
        Ok(())
    }

    /// Update the status and bump `updated_at`. Returns the new `updated_at`,
    /// or `None` if the invite no longer exists.
    pub fn update_status(
        conn: &Connection,
        id: &str,
        status: InviteStatus,
        now: i64,
    ) -> Result<Option<i64>> {
        // updated_at never moves backwards so change events stay ordered
        let changed = conn
            .execute(
                "UPDATE invites SET status = ?1, updated_at = MAX(updated_at + 1, ?2) WHERE id = ?3",
                params![status.as_str(), now, id],
            )
            .context("Failed to update invite status")?;

        if changed == 0 {
            return Ok(None);
        }

        let updated_at = conn
            .query_row(
                "SELECT updated_at FROM invites WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .context("Failed to read invite updated_at")?;
        Ok(Some(updated_at))
    }

    pub fn delete(conn: &Connection, id: &str) -> Result<bool> {
        let deleted = conn
            .execute("DELETE FROM invites WHERE id = ?1", params![id])
            .context("Failed to delete invite")?;
        Ok(deleted > 0)
    }

    pub fn get(conn: &Connection, id: &str) -> Result<Option<Invite>> {
        let sql = format!("SELECT {} FROM invites WHERE id = ?1", COLUMNS);
        let row = conn
            .query_row(&sql, params![id], read_row)
            .optional()
            .context("Failed to query invite")?;

        row.map(RawInvite::into_invite).transpose()
    }

    /// List invites, soonest first. Immediate invites sort first.
    pub fn list(conn: &Connection, limit: usize) -> Result<Vec<Invite>> {
        let sql = format!(
            "SELECT {} FROM invites ORDER BY COALESCE(scheduled_time, 0) ASC, created_at ASC LIMIT ?1",
            COLUMNS
        );
        let mut stmt = conn.prepare(&sql).context("Failed to prepare invite list")?;

        let rows = stmt
            .query_map(params![limit as i64], read_row)
            .context("Failed to list invites")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to map invites")?;

        rows.into_iter().map(RawInvite::into_invite).collect()
    }
}

/// Row as stored; enum columns are validated when converting.
struct RawInvite {
    id: String,
    name: String,
    platform: String,
    meeting_id: String,
    meeting_password: Option<String>,
    scheduled_time: Option<i64>,
    status: String,
    recipients: String,
    created_at: i64,
    updated_at: i64,
}

impl RawInvite {
    fn into_invite(self) -> Result<Invite> {
        Ok(Invite {
            platform: Platform::parse(&self.platform)?,
            status: InviteStatus::parse(&self.status)?,
            recipients: serde_json::from_str(&self.recipients)
                .context("Invalid recipients column")?,
            id: self.id,
            name: self.name,
            meeting_id: self.meeting_id,
            meeting_password: self.meeting_password,
            scheduled_time: self.scheduled_time,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawInvite> {
    Ok(RawInvite {
        id: row.get(0)?,
        name: row.get(1)?,
        platform: row.get(2)?,
        meeting_id: row.get(3)?,
        meeting_password: row.get(4)?,
        scheduled_time: row.get(5)?,
        status: row.get(6)?,
        recipients: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}
