use super::bool_to_int;
use crate::database::models::{RelationRecord, RelationSummaryRecord};
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

pub(super) struct SqliteRelationRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

impl<'conn> super::RelationRepository for SqliteRelationRepository<'conn> {
    fn append(&self, record: &RelationRecord) -> Result<bool> {
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO relations (group_id, trx_id, from_publisher, to_publisher, kind, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.group_id,
                record.trx_id,
                record.from_publisher,
                record.to_publisher,
                record.kind,
                record.timestamp,
            ],
        )?;
        Ok(inserted > 0)
    }

    fn apply_summary(&self, record: &RelationSummaryRecord) -> Result<()> {
        // Ties on timestamp fall back to trx id so replays converge.
        self.conn.execute(
            r#"
            INSERT INTO relation_summaries (group_id, from_publisher, to_publisher, relation, value, trx_id, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(group_id, from_publisher, to_publisher, relation) DO UPDATE SET
                value = excluded.value,
                trx_id = excluded.trx_id,
                timestamp = excluded.timestamp
            WHERE excluded.timestamp > relation_summaries.timestamp
               OR (excluded.timestamp = relation_summaries.timestamp
                   AND excluded.trx_id >= relation_summaries.trx_id)
            "#,
            params![
                record.group_id,
                record.from_publisher,
                record.to_publisher,
                record.relation,
                bool_to_int(record.value),
                record.trx_id,
                record.timestamp,
            ],
        )?;
        Ok(())
    }

    fn get_summary(
        &self,
        group_id: &str,
        from_publisher: &str,
        to_publisher: &str,
        relation: &str,
    ) -> Result<Option<RelationSummaryRecord>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT group_id, from_publisher, to_publisher, relation, value, trx_id, timestamp
                FROM relation_summaries
                WHERE group_id = ?1 AND from_publisher = ?2 AND to_publisher = ?3 AND relation = ?4
                "#,
                params![group_id, from_publisher, to_publisher, relation],
                |row| {
                    Ok(RelationSummaryRecord {
                        group_id: row.get(0)?,
                        from_publisher: row.get(1)?,
                        to_publisher: row.get(2)?,
                        relation: row.get(3)?,
                        value: row.get::<_, i64>(4)? != 0,
                        trx_id: row.get(5)?,
                        timestamp: row.get(6)?,
                    })
                },
            )
            .optional()?)
    }

    fn list_log(&self, group_id: &str) -> Result<Vec<RelationRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT group_id, trx_id, from_publisher, to_publisher, kind, timestamp
            FROM relations
            WHERE group_id = ?1
            ORDER BY timestamp ASC
            "#,
        )?;
        let rows = stmt.query_map(params![group_id], |row| {
            Ok(RelationRecord {
                group_id: row.get(0)?,
                trx_id: row.get(1)?,
                from_publisher: row.get(2)?,
                to_publisher: row.get(3)?,
                kind: row.get(4)?,
                timestamp: row.get(5)?,
            })
        })?;
        let mut log = Vec::new();
        for row in rows {
            log.push(row?);
        }
        Ok(log)
    }
}
