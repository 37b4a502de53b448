use crate::database::models::PendingTrxRecord;
use anyhow::Result;
use rusqlite::{params, Connection};

pub(super) struct SqlitePendingTrxRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

impl<'conn> super::PendingTrxRepository for SqlitePendingTrxRepository<'conn> {
    fn insert(&self, record: &PendingTrxRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO pending_trx (group_id, trx_id, item_json, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                record.group_id,
                record.trx_id,
                record.item_json,
                record.created_at
            ],
        )?;
        Ok(())
    }

    fn list_for_group(&self, group_id: &str) -> Result<Vec<PendingTrxRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT group_id, trx_id, item_json, created_at
            FROM pending_trx
            WHERE group_id = ?1
            ORDER BY created_at ASC
            "#,
        )?;
        let rows = stmt.query_map(params![group_id], |row| {
            Ok(PendingTrxRecord {
                group_id: row.get(0)?,
                trx_id: row.get(1)?,
                item_json: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;
        let mut pending = Vec::new();
        for row in rows {
            pending.push(row?);
        }
        Ok(pending)
    }

    fn remove(&self, group_id: &str, trx_id: &str) -> Result<bool> {
        let removed = self.conn.execute(
            r#"
            DELETE FROM pending_trx
            WHERE group_id = ?1 AND trx_id = ?2
            "#,
            params![group_id, trx_id],
        )?;
        Ok(removed > 0)
    }
}
