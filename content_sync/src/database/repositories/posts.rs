use super::bool_to_int;
use crate::content::ContentStatus;
use crate::database::models::{PostRecord, Summary};
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

pub(super) struct SqlitePostRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

const POST_COLUMNS: &str = "group_id, id, trx_id, publisher, title, content, timestamp, status, \
     deleted, hot_count, comment_count, like_count, dislike_count";

fn map_post(row: &Row<'_>) -> rusqlite::Result<PostRecord> {
    Ok(PostRecord {
        group_id: row.get(0)?,
        id: row.get(1)?,
        trx_id: row.get(2)?,
        publisher: row.get(3)?,
        title: row.get(4)?,
        content: row.get(5)?,
        timestamp: row.get(6)?,
        status: ContentStatus::parse(&row.get::<_, String>(7)?),
        deleted: row.get::<_, i64>(8)? != 0,
        summary: Summary {
            hot_count: row.get(9)?,
            comment_count: row.get(10)?,
            like_count: row.get(11)?,
            dislike_count: row.get(12)?,
        },
    })
}

impl<'conn> super::PostRepository for SqlitePostRepository<'conn> {
    fn insert(&self, record: &PostRecord) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO posts ({POST_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                record.group_id,
                record.id,
                record.trx_id,
                record.publisher,
                record.title,
                record.content,
                record.timestamp,
                record.status.as_str(),
                bool_to_int(record.deleted),
                record.summary.hot_count,
                record.summary.comment_count,
                record.summary.like_count,
                record.summary.dislike_count,
            ],
        )?;
        Ok(())
    }

    fn get(&self, group_id: &str, id: &str) -> Result<Option<PostRecord>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {POST_COLUMNS} FROM posts WHERE group_id = ?1 AND id = ?2"),
                params![group_id, id],
                map_post,
            )
            .optional()?)
    }

    fn list_recent(&self, group_id: &str, limit: usize) -> Result<Vec<PostRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {POST_COLUMNS} FROM posts \
             WHERE group_id = ?1 AND deleted = 0 \
             ORDER BY timestamp DESC \
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![group_id, limit as i64], map_post)?;
        let mut posts = Vec::new();
        for row in rows {
            posts.push(row?);
        }
        Ok(posts)
    }

    fn set_status(&self, group_id: &str, id: &str, status: ContentStatus) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE posts
            SET status = ?1
            WHERE group_id = ?2 AND id = ?3
            "#,
            params![status.as_str(), group_id, id],
        )?;
        Ok(())
    }

    fn mark_deleted(&self, group_id: &str, id: &str) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE posts
            SET deleted = 1
            WHERE group_id = ?1 AND id = ?2
            "#,
            params![group_id, id],
        )?;
        Ok(())
    }

    fn update_content(
        &self,
        group_id: &str,
        id: &str,
        title: Option<&str>,
        content: &str,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE posts
            SET title = COALESCE(?1, title),
                content = ?2
            WHERE group_id = ?3 AND id = ?4
            "#,
            params![title, content, group_id, id],
        )?;
        Ok(())
    }

    fn update_summary(&self, group_id: &str, id: &str, summary: &Summary) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE posts
            SET hot_count = ?1,
                comment_count = ?2,
                like_count = ?3,
                dislike_count = ?4
            WHERE group_id = ?5 AND id = ?6
            "#,
            params![
                summary.hot_count,
                summary.comment_count,
                summary.like_count,
                summary.dislike_count,
                group_id,
                id
            ],
        )?;
        Ok(())
    }
}
