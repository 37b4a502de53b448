use crate::database::models::SyncCursorRecord;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Entries kept in a cursor's diagnostic log.
pub const LOG_TAIL_LIMIT: usize = 200;

pub(super) struct SqliteSyncCursorRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

fn map_cursor(row: &Row<'_>) -> rusqlite::Result<(SyncCursorRecord, String)> {
    Ok((
        SyncCursorRecord {
            group_id: row.get(0)?,
            latest_trx_id: row.get(1)?,
            last_updated: row.get(2)?,
            unread_count: row.get(3)?,
            log_tail: Vec::new(),
        },
        row.get(4)?,
    ))
}

fn with_log_tail((mut record, raw): (SyncCursorRecord, String)) -> Result<SyncCursorRecord> {
    record.log_tail = serde_json::from_str(&raw)
        .with_context(|| format!("corrupt log tail for group {}", record.group_id))?;
    Ok(record)
}

impl<'conn> super::SyncCursorRepository for SqliteSyncCursorRepository<'conn> {
    fn get(&self, group_id: &str) -> Result<Option<SyncCursorRecord>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT group_id, latest_trx_id, last_updated, unread_count, log_tail
                FROM sync_cursors
                WHERE group_id = ?1
                "#,
                params![group_id],
                map_cursor,
            )
            .optional()?;
        row.map(with_log_tail).transpose()
    }

    fn list(&self) -> Result<Vec<SyncCursorRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT group_id, latest_trx_id, last_updated, unread_count, log_tail
            FROM sync_cursors
            ORDER BY group_id ASC
            "#,
        )?;
        let rows = stmt.query_map([], map_cursor)?;
        let mut cursors = Vec::new();
        for row in rows {
            cursors.push(with_log_tail(row?)?);
        }
        Ok(cursors)
    }

    fn ensure(&self, group_id: &str) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR IGNORE INTO sync_cursors (group_id)
            VALUES (?1)
            "#,
            params![group_id],
        )?;
        Ok(())
    }

    fn record_merge(
        &self,
        group_id: &str,
        latest_trx_id: &str,
        last_updated: &str,
        unread_delta: i64,
        log_entry: &str,
    ) -> Result<()> {
        let encoded = self.prepend_log(group_id, log_entry)?;
        self.conn.execute(
            r#"
            UPDATE sync_cursors
            SET latest_trx_id = ?1,
                last_updated = ?2,
                unread_count = unread_count + ?3,
                log_tail = ?4
            WHERE group_id = ?5
            "#,
            params![latest_trx_id, last_updated, unread_delta, encoded, group_id],
        )?;
        Ok(())
    }

    fn record_backfill(
        &self,
        group_id: &str,
        last_updated: &str,
        unread_delta: i64,
        log_entry: &str,
    ) -> Result<()> {
        let encoded = self.prepend_log(group_id, log_entry)?;
        self.conn.execute(
            r#"
            UPDATE sync_cursors
            SET last_updated = ?1,
                unread_count = unread_count + ?2,
                log_tail = ?3
            WHERE group_id = ?4
            "#,
            params![last_updated, unread_delta, encoded, group_id],
        )?;
        Ok(())
    }

    fn mark_read(&self, group_id: &str) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE sync_cursors
            SET unread_count = 0
            WHERE group_id = ?1
            "#,
            params![group_id],
        )?;
        Ok(())
    }
}

impl SqliteSyncCursorRepository<'_> {
    /// Ensures the row exists and returns its log tail with `entry` in front.
    fn prepend_log(&self, group_id: &str, entry: &str) -> Result<String> {
        use super::SyncCursorRepository;
        self.ensure(group_id)?;
        let mut log_tail = self
            .get(group_id)?
            .map(|cursor| cursor.log_tail)
            .unwrap_or_default();
        log_tail.insert(0, entry.to_string());
        log_tail.truncate(LOG_TAIL_LIMIT);
        Ok(serde_json::to_string(&log_tail)?)
    }
}
