use crate::database::models::DeferredContentRecord;
use anyhow::Result;
use rusqlite::{params, Connection, Row};

pub(super) struct SqliteDeferredContentRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

fn map_deferred(row: &Row<'_>) -> rusqlite::Result<DeferredContentRecord> {
    Ok(DeferredContentRecord {
        group_id: row.get(0)?,
        trx_id: row.get(1)?,
        waiting_on: row.get(2)?,
        item_json: row.get(3)?,
    })
}

impl<'conn> super::DeferredContentRepository for SqliteDeferredContentRepository<'conn> {
    fn park(&self, record: &DeferredContentRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO deferred_contents (group_id, trx_id, waiting_on, item_json)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                record.group_id,
                record.trx_id,
                record.waiting_on,
                record.item_json
            ],
        )?;
        Ok(())
    }

    fn take_waiting_on(
        &self,
        group_id: &str,
        waiting_on: &str,
    ) -> Result<Vec<DeferredContentRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT group_id, trx_id, waiting_on, item_json
            FROM deferred_contents
            WHERE group_id = ?1 AND waiting_on = ?2
            ORDER BY trx_id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![group_id, waiting_on], map_deferred)?;
        let mut taken = Vec::new();
        for row in rows {
            taken.push(row?);
        }
        if !taken.is_empty() {
            self.conn.execute(
                r#"
                DELETE FROM deferred_contents
                WHERE group_id = ?1 AND waiting_on = ?2
                "#,
                params![group_id, waiting_on],
            )?;
        }
        Ok(taken)
    }

    fn list_for_group(&self, group_id: &str) -> Result<Vec<DeferredContentRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT group_id, trx_id, waiting_on, item_json
            FROM deferred_contents
            WHERE group_id = ?1
            ORDER BY trx_id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![group_id], map_deferred)?;
        let mut deferred = Vec::new();
        for row in rows {
            deferred.push(row?);
        }
        Ok(deferred)
    }
}
