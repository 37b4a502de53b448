use super::bool_to_int;
use crate::content::ContentStatus;
use crate::database::models::{CommentRecord, Summary};
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

pub(super) struct SqliteCommentRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

const COMMENT_COLUMNS: &str = "group_id, id, trx_id, post_id, thread_id, reply_to, publisher, \
     content, timestamp, status, deleted, hot_count, comment_count, like_count, dislike_count";

fn map_comment(row: &Row<'_>) -> rusqlite::Result<CommentRecord> {
    Ok(CommentRecord {
        group_id: row.get(0)?,
        id: row.get(1)?,
        trx_id: row.get(2)?,
        post_id: row.get(3)?,
        thread_id: row.get(4)?,
        reply_to: row.get(5)?,
        publisher: row.get(6)?,
        content: row.get(7)?,
        timestamp: row.get(8)?,
        status: ContentStatus::parse(&row.get::<_, String>(9)?),
        deleted: row.get::<_, i64>(10)? != 0,
        summary: Summary {
            hot_count: row.get(11)?,
            comment_count: row.get(12)?,
            like_count: row.get(13)?,
            dislike_count: row.get(14)?,
        },
    })
}

impl<'conn> super::CommentRepository for SqliteCommentRepository<'conn> {
    fn insert(&self, record: &CommentRecord) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO comments ({COMMENT_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ),
            params![
                record.group_id,
                record.id,
                record.trx_id,
                record.post_id,
                record.thread_id,
                record.reply_to,
                record.publisher,
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

    fn get(&self, group_id: &str, id: &str) -> Result<Option<CommentRecord>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {COMMENT_COLUMNS} FROM comments WHERE group_id = ?1 AND id = ?2"
                ),
                params![group_id, id],
                map_comment,
            )
            .optional()?)
    }

    fn list_for_post(&self, group_id: &str, post_id: &str) -> Result<Vec<CommentRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments \
             WHERE group_id = ?1 AND post_id = ?2 \
             ORDER BY timestamp ASC"
        ))?;
        let rows = stmt.query_map(params![group_id, post_id], map_comment)?;
        let mut comments = Vec::new();
        for row in rows {
            comments.push(row?);
        }
        Ok(comments)
    }

    fn count_for_post(&self, group_id: &str, post_id: &str) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            r#"
            SELECT COUNT(*)
            FROM comments
            WHERE group_id = ?1 AND post_id = ?2 AND deleted = 0
            "#,
            params![group_id, post_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn count_replies(&self, group_id: &str, comment_id: &str) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            r#"
            SELECT COUNT(*)
            FROM comments
            WHERE group_id = ?1
              AND (thread_id = ?2 OR reply_to = ?2)
              AND deleted = 0
            "#,
            params![group_id, comment_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn set_status(&self, group_id: &str, id: &str, status: ContentStatus) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE comments
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
            UPDATE comments
            SET deleted = 1
            WHERE group_id = ?1 AND id = ?2
            "#,
            params![group_id, id],
        )?;
        Ok(())
    }

    fn update_summary(&self, group_id: &str, id: &str, summary: &Summary) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE comments
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
