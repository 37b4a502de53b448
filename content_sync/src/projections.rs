//! In-memory views the UI layer subscribes to. Only ever written after a
//! merge transaction has committed.

use crate::database::repositories::{NotificationRepository, SyncCursorRepository};
use crate::database::Database;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

pub type GroupCounts = HashMap<String, i64>;

#[derive(Clone)]
pub struct SyncProjections {
    unread: Arc<watch::Sender<GroupCounts>>,
    notifications: Arc<watch::Sender<GroupCounts>>,
}

impl Default for SyncProjections {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncProjections {
    pub fn new() -> Self {
        let (unread, _) = watch::channel(GroupCounts::new());
        let (notifications, _) = watch::channel(GroupCounts::new());
        Self {
            unread: Arc::new(unread),
            notifications: Arc::new(notifications),
        }
    }

    pub fn subscribe_unread(&self) -> watch::Receiver<GroupCounts> {
        self.unread.subscribe()
    }

    pub fn subscribe_notifications(&self) -> watch::Receiver<GroupCounts> {
        self.notifications.subscribe()
    }

    pub fn unread(&self, group_id: &str) -> i64 {
        self.unread.borrow().get(group_id).copied().unwrap_or(0)
    }

    pub fn unread_notifications(&self, group_id: &str) -> i64 {
        self.notifications
            .borrow()
            .get(group_id)
            .copied()
            .unwrap_or(0)
    }

    /// Reloads one group's counts from committed storage.
    pub fn refresh(&self, database: &Database, group_id: &str) -> Result<()> {
        let (unread, notifications) = database.with_repositories(|repos| {
            let unread = repos
                .cursors()
                .get(group_id)?
                .map(|cursor| cursor.unread_count)
                .unwrap_or(0);
            let notifications = repos.notifications().count_unread(group_id)?;
            Ok((unread, notifications))
        })?;
        publish(&self.unread, group_id, unread);
        publish(&self.notifications, group_id, notifications);
        Ok(())
    }

    pub fn mark_group_read(&self, database: &Database, group_id: &str) -> Result<()> {
        database.with_repositories(|repos| repos.cursors().mark_read(group_id))?;
        publish(&self.unread, group_id, 0);
        Ok(())
    }

    pub fn mark_notifications_read(&self, database: &Database, group_id: &str) -> Result<()> {
        database.with_repositories(|repos| repos.notifications().mark_all_read(group_id))?;
        publish(&self.notifications, group_id, 0);
        Ok(())
    }

    pub(crate) fn forget(&self, group_id: &str) {
        self.unread.send_if_modified(|counts| counts.remove(group_id).is_some());
        self.notifications
            .send_if_modified(|counts| counts.remove(group_id).is_some());
    }
}

fn publish(sender: &watch::Sender<GroupCounts>, group_id: &str, value: i64) {
    sender.send_if_modified(|counts| {
        if counts.get(group_id) == Some(&value) {
            return false;
        }
        counts.insert(group_id.to_string(), value);
        true
    });
}
