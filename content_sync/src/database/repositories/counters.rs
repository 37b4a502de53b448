use crate::database::models::CounterRecord;
use anyhow::Result;
use rusqlite::{params, Connection};

pub(super) struct SqliteCounterRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

impl<'conn> super::CounterRepository for SqliteCounterRepository<'conn> {
    fn insert(&self, record: &CounterRecord) -> Result<bool> {
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO counters (group_id, trx_id, object_id, publisher, kind, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.group_id,
                record.trx_id,
                record.object_id,
                record.publisher,
                record.kind,
                record.timestamp,
            ],
        )?;
        Ok(inserted > 0)
    }

    fn list_for_object(&self, group_id: &str, object_id: &str) -> Result<Vec<CounterRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT group_id, trx_id, object_id, publisher, kind, timestamp
            FROM counters
            WHERE group_id = ?1 AND object_id = ?2
            ORDER BY timestamp ASC, trx_id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![group_id, object_id], |row| {
            Ok(CounterRecord {
                group_id: row.get(0)?,
                trx_id: row.get(1)?,
                object_id: row.get(2)?,
                publisher: row.get(3)?,
                kind: row.get(4)?,
                timestamp: row.get(5)?,
            })
        })?;

        let mut counters = Vec::new();
        for row in rows {
            counters.push(row?);
        }
        Ok(counters)
    }
}
