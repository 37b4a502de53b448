use crate::database::models::EmptyTrxRecord;
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

pub(super) struct SqliteEmptyTrxRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

fn map_marker(row: &Row<'_>) -> rusqlite::Result<EmptyTrxRecord> {
    Ok(EmptyTrxRecord {
        group_id: row.get(0)?,
        trx_id: row.get(1)?,
        attempts: row.get::<_, i64>(2)?.max(0) as u32,
        last_attempt_at: row.get(3)?,
    })
}

impl<'conn> super::EmptyTrxRepository for SqliteEmptyTrxRepository<'conn> {
    fn insert(&self, group_id: &str, trx_id: &str) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR IGNORE INTO empty_trx (group_id, trx_id)
            VALUES (?1, ?2)
            "#,
            params![group_id, trx_id],
        )?;
        Ok(())
    }

    fn get(&self, group_id: &str, trx_id: &str) -> Result<Option<EmptyTrxRecord>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT group_id, trx_id, attempts, last_attempt_at
                FROM empty_trx
                WHERE group_id = ?1 AND trx_id = ?2
                "#,
                params![group_id, trx_id],
                map_marker,
            )
            .optional()?)
    }

    fn list_for_group(&self, group_id: &str) -> Result<Vec<EmptyTrxRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT group_id, trx_id, attempts, last_attempt_at
            FROM empty_trx
            WHERE group_id = ?1
            ORDER BY attempts ASC, trx_id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![group_id], map_marker)?;
        let mut markers = Vec::new();
        for row in rows {
            markers.push(row?);
        }
        Ok(markers)
    }

    fn record_attempt(&self, group_id: &str, trx_id: &str, at: &str) -> Result<u32> {
        self.conn.execute(
            r#"
            UPDATE empty_trx
            SET attempts = attempts + 1,
                last_attempt_at = ?1
            WHERE group_id = ?2 AND trx_id = ?3
            "#,
            params![at, group_id, trx_id],
        )?;
        Ok(self
            .get(group_id, trx_id)?
            .map(|marker| marker.attempts)
            .unwrap_or(0))
    }

    fn remove(&self, group_id: &str, trx_id: &str) -> Result<bool> {
        let removed = self.conn.execute(
            r#"
            DELETE FROM empty_trx
            WHERE group_id = ?1 AND trx_id = ?2
            "#,
            params![group_id, trx_id],
        )?;
        Ok(removed > 0)
    }
}
