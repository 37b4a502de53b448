use super::bool_to_int;
use crate::database::models::{NotificationKind, NotificationRecord};
use anyhow::Result;
use rusqlite::{params, Connection};

pub(super) struct SqliteNotificationRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

impl<'conn> super::NotificationRepository for SqliteNotificationRepository<'conn> {
    fn insert(&self, record: &NotificationRecord) -> Result<bool> {
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO notifications (id, group_id, object_id, from_publisher, kind, read, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.id,
                record.group_id,
                record.object_id,
                record.from_publisher,
                record.kind.as_str(),
                bool_to_int(record.read),
                record.timestamp,
            ],
        )?;
        Ok(inserted > 0)
    }

    fn list_for_group(&self, group_id: &str) -> Result<Vec<NotificationRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, group_id, object_id, from_publisher, kind, read, timestamp
            FROM notifications
            WHERE group_id = ?1
            ORDER BY timestamp DESC
            "#,
        )?;
        let rows = stmt.query_map(params![group_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;

        let mut notifications = Vec::new();
        for row in rows {
            let (id, group_id, object_id, from_publisher, kind, read, timestamp) = row?;
            let Some(kind) = NotificationKind::parse(&kind) else {
                tracing::warn!(notification_id = %id, kind = %kind, "skipping notification with unknown kind");
                continue;
            };
            notifications.push(NotificationRecord {
                id,
                group_id,
                object_id,
                from_publisher,
                kind,
                read: read != 0,
                timestamp,
            });
        }
        Ok(notifications)
    }

    fn count_unread(&self, group_id: &str) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            r#"
            SELECT COUNT(*)
            FROM notifications
            WHERE group_id = ?1 AND read = 0
            "#,
            params![group_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn mark_all_read(&self, group_id: &str) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE notifications
            SET read = 1
            WHERE group_id = ?1 AND read = 0
            "#,
            params![group_id],
        )?;
        Ok(())
    }
}
