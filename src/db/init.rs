use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;

pub fn init_db() -> Result<Connection> {
    let db_path = crate::global::db_file()?;
    open(&db_path)
}

pub fn open(db_path: &Path) -> Result<Connection> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let conn = Connection::open(db_path).context("Failed to open database connection")?;

    migrate(&conn)?;

    Ok(conn)
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS invites (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            platform TEXT NOT NULL,
            meeting_id TEXT NOT NULL,
            meeting_password TEXT,
            scheduled_time INTEGER,
            status TEXT NOT NULL DEFAULT 'Scheduled',
            recipients TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        [],
    )
    .context("Failed to create invites table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_invites_status ON invites(status)",
        [],
    )
    .context("Failed to create invites status index")?;

    // One live trigger per invite; the primary key enforces it
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedule_entries (
            invite_id TEXT PRIMARY KEY,
            fires_at INTEGER NOT NULL,
            target TEXT NOT NULL,
            fired_at INTEGER
        )",
        [],
    )
    .context("Failed to create schedule_entries table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedule_entries_fires_at ON schedule_entries(fires_at)",
        [],
    )
    .context("Failed to create schedule_entries fires_at index")?;

    Ok(())
}
