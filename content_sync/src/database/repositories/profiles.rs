use crate::content::ContentStatus;
use crate::database::models::ProfileRecord;
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

pub(super) struct SqliteProfileRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

impl<'conn> super::ProfileRepository for SqliteProfileRepository<'conn> {
    fn upsert(&self, record: &ProfileRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO profiles (group_id, publisher, name, avatar, trx_id, timestamp, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(group_id, publisher) DO UPDATE SET
                name = excluded.name,
                avatar = excluded.avatar,
                trx_id = excluded.trx_id,
                timestamp = excluded.timestamp,
                status = excluded.status
            "#,
            params![
                record.group_id,
                record.publisher,
                record.name,
                record.avatar,
                record.trx_id,
                record.timestamp,
                record.status.as_str(),
            ],
        )?;
        Ok(())
    }

    fn get(&self, group_id: &str, publisher: &str) -> Result<Option<ProfileRecord>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT group_id, publisher, name, avatar, trx_id, timestamp, status
                FROM profiles
                WHERE group_id = ?1 AND publisher = ?2
                "#,
                params![group_id, publisher],
                |row| {
                    Ok(ProfileRecord {
                        group_id: row.get(0)?,
                        publisher: row.get(1)?,
                        name: row.get(2)?,
                        avatar: row.get(3)?,
                        trx_id: row.get(4)?,
                        timestamp: row.get(5)?,
                        status: ContentStatus::parse(&row.get::<_, String>(6)?),
                    })
                },
            )
            .optional()?)
    }

    fn set_status(&self, group_id: &str, publisher: &str, status: ContentStatus) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE profiles
            SET status = ?1
            WHERE group_id = ?2 AND publisher = ?3
            "#,
            params![status.as_str(), group_id, publisher],
        )?;
        Ok(())
    }
}
