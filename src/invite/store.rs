//! Invite store abstraction and its SQLite implementation.
//!
//! The session engine only reads invites and writes status transitions. The
//! SQLite store also supports create/delete and publishes every mutation on an
//! optional change feed, which is how the reconciler learns about invites when
//! running locally.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::events::{ChangeOperation, InviteChangeEvent, InviteStatusUpdate};
use super::Invite;
use crate::db::{self, InviteRepository, SharedConnection};

#[async_trait]
pub trait InviteStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Invite>>;

    /// Apply a status transition. Returns false if the invite no longer exists.
    async fn update_status(&self, update: &InviteStatusUpdate) -> Result<bool>;
}

pub struct SqliteInviteStore {
    conn: SharedConnection,
    feed: Option<mpsc::Sender<InviteChangeEvent>>,
}

impl SqliteInviteStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn, feed: None }
    }

    /// Publish INSERT/MODIFY/REMOVE events for every mutation.
    pub fn with_feed(mut self, feed: mpsc::Sender<InviteChangeEvent>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub async fn create(&self, invite: &Invite) -> Result<()> {
        {
            let conn = db::lock(&self.conn)?;
            InviteRepository::insert(&conn, invite)?;
        }
        info!(invite_id = %invite.id, "Invite created for {}", invite.name);
        self.publish(InviteChangeEvent::from_invite(ChangeOperation::Insert, invite))
            .await;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let removed = {
            let conn = db::lock(&self.conn)?;
            let existing = InviteRepository::get(&conn, id)?;
            if existing.is_some() {
                InviteRepository::delete(&conn, id)?;
            }
            existing
        };

        match removed {
            Some(mut invite) => {
                info!(invite_id = %id, "Invite deleted");
                invite.updated_at += 1;
                self.publish(InviteChangeEvent::from_invite(ChangeOperation::Remove, &invite))
                    .await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn list(&self, limit: usize) -> Result<Vec<Invite>> {
        let conn = db::lock(&self.conn)?;
        InviteRepository::list(&conn, limit)
    }

    async fn publish(&self, event: InviteChangeEvent) {
        if let Some(feed) = &self.feed {
            if feed.send(event).await.is_err() {
                warn!("Invite change feed closed; event dropped");
            }
        }
    }
}

#[async_trait]
impl InviteStore for SqliteInviteStore {
    async fn get(&self, id: &str) -> Result<Option<Invite>> {
        let conn = db::lock(&self.conn)?;
        InviteRepository::get(&conn, id)
    }

    async fn update_status(&self, update: &InviteStatusUpdate) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let invite = {
            let conn = db::lock(&self.conn)?;
            match InviteRepository::update_status(&conn, &update.invite_id, update.status, now)? {
                Some(_) => InviteRepository::get(&conn, &update.invite_id)?,
                None => None,
            }
        };

        match invite {
            Some(invite) => {
                info!(
                    invite_id = %update.invite_id,
                    "Invite status -> {}",
                    update.status.as_str()
                );
                self.publish(InviteChangeEvent::from_invite(ChangeOperation::Modify, &invite))
                    .await;
                Ok(true)
            }
            None => {
                warn!(invite_id = %update.invite_id, "Status update for missing invite");
                Ok(false)
            }
        }
    }
}
