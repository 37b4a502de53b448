use crate::content::ContentStatus;
use crate::database::models::ImageRecord;
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

pub(super) struct SqliteImageRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

fn map_image(row: &Row<'_>) -> rusqlite::Result<ImageRecord> {
    Ok(ImageRecord {
        group_id: row.get(0)?,
        trx_id: row.get(1)?,
        publisher: row.get(2)?,
        object_id: row.get(3)?,
        name: row.get(4)?,
        media_type: row.get(5)?,
        size_bytes: row.get(6)?,
        timestamp: row.get(7)?,
        status: ContentStatus::parse(&row.get::<_, String>(8)?),
    })
}

impl<'conn> super::ImageRepository for SqliteImageRepository<'conn> {
    fn insert(&self, record: &ImageRecord) -> Result<bool> {
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO images (group_id, trx_id, publisher, object_id, name, media_type, size_bytes, timestamp, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                record.group_id,
                record.trx_id,
                record.publisher,
                record.object_id,
                record.name,
                record.media_type,
                record.size_bytes,
                record.timestamp,
                record.status.as_str(),
            ],
        )?;
        Ok(inserted > 0)
    }

    fn get(&self, group_id: &str, trx_id: &str) -> Result<Option<ImageRecord>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT group_id, trx_id, publisher, object_id, name, media_type, size_bytes, timestamp, status
                FROM images
                WHERE group_id = ?1 AND trx_id = ?2
                "#,
                params![group_id, trx_id],
                map_image,
            )
            .optional()?)
    }

    fn set_status(&self, group_id: &str, trx_id: &str, status: ContentStatus) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE images
            SET status = ?1
            WHERE group_id = ?2 AND trx_id = ?3
            "#,
            params![status.as_str(), group_id, trx_id],
        )?;
        Ok(())
    }

    fn list_for_object(&self, group_id: &str, object_id: &str) -> Result<Vec<ImageRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT group_id, trx_id, publisher, object_id, name, media_type, size_bytes, timestamp, status
            FROM images
            WHERE group_id = ?1 AND object_id = ?2
            ORDER BY timestamp ASC
            "#,
        )?;
        let rows = stmt.query_map(params![group_id, object_id], map_image)?;
        let mut images = Vec::new();
        for row in rows {
            images.push(row?);
        }
        Ok(images)
    }
}
