//! SQLite persistence for invites and schedule entries.
//!
//! Raw SQL with rusqlite, no ORM. Every repository takes a `&Connection` so
//! callers decide how connections are shared.

pub mod init;
pub mod invites;
pub mod schedules;

#[cfg(test)]
mod tests;

use anyhow::{anyhow, Result};
use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};

pub use init::{init_db, migrate, open};
pub use invites::InviteRepository;
pub use schedules::ScheduleRepository;

/// Connection shared between the invite store and the trigger backend.
/// Statements are short; the lock is never held across an await.
pub type SharedConnection = Arc<Mutex<Connection>>;

pub fn shared(conn: Connection) -> SharedConnection {
    Arc::new(Mutex::new(conn))
}

pub fn lock(conn: &SharedConnection) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| anyhow!("Database connection lock poisoned"))
}

/// In-memory database with the schema applied.
pub fn in_memory() -> Result<SharedConnection> {
    let conn = Connection::open_in_memory()?;
    migrate(&conn)?;
    Ok(shared(conn))
}
