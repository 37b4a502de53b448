mod comments;
mod counters;
mod cursors;
mod deferred;
mod empty_trx;
mod images;
mod notifications;
mod pending;
mod posts;
mod profiles;
mod relations;

pub use cursors::LOG_TAIL_LIMIT;

use super::models::{
    CommentRecord, CounterRecord, DeferredContentRecord, EmptyTrxRecord, ImageRecord,
    NotificationRecord, PendingTrxRecord, PostRecord, ProfileRecord, RelationRecord,
    RelationSummaryRecord, Summary, SyncCursorRecord,
};
use crate::content::ContentStatus;
use anyhow::Result;
use rusqlite::Connection;

pub trait PostRepository {
    fn insert(&self, record: &PostRecord) -> Result<()>;
    fn get(&self, group_id: &str, id: &str) -> Result<Option<PostRecord>>;
    fn list_recent(&self, group_id: &str, limit: usize) -> Result<Vec<PostRecord>>;
    fn set_status(&self, group_id: &str, id: &str, status: ContentStatus) -> Result<()>;
    fn mark_deleted(&self, group_id: &str, id: &str) -> Result<()>;
    fn update_content(
        &self,
        group_id: &str,
        id: &str,
        title: Option<&str>,
        content: &str,
    ) -> Result<()>;
    fn update_summary(&self, group_id: &str, id: &str, summary: &Summary) -> Result<()>;
}

pub trait CommentRepository {
    fn insert(&self, record: &CommentRecord) -> Result<()>;
    fn get(&self, group_id: &str, id: &str) -> Result<Option<CommentRecord>>;
    fn list_for_post(&self, group_id: &str, post_id: &str) -> Result<Vec<CommentRecord>>;
    /// Non-deleted comments anywhere under the post.
    fn count_for_post(&self, group_id: &str, post_id: &str) -> Result<i64>;
    /// Non-deleted comments nested under the given comment.
    fn count_replies(&self, group_id: &str, comment_id: &str) -> Result<i64>;
    fn set_status(&self, group_id: &str, id: &str, status: ContentStatus) -> Result<()>;
    fn mark_deleted(&self, group_id: &str, id: &str) -> Result<()>;
    fn update_summary(&self, group_id: &str, id: &str, summary: &Summary) -> Result<()>;
}

pub trait ProfileRepository {
    fn upsert(&self, record: &ProfileRecord) -> Result<()>;
    fn get(&self, group_id: &str, publisher: &str) -> Result<Option<ProfileRecord>>;
    fn set_status(&self, group_id: &str, publisher: &str, status: ContentStatus) -> Result<()>;
}

pub trait CounterRepository {
    /// Returns false when the trx was already stored.
    fn insert(&self, record: &CounterRecord) -> Result<bool>;
    fn list_for_object(&self, group_id: &str, object_id: &str) -> Result<Vec<CounterRecord>>;
}

pub trait RelationRepository {
    /// Appends to the event log. Returns false when the trx was already stored.
    fn append(&self, record: &RelationRecord) -> Result<bool>;
    /// Applies an event to the materialized view unless a newer one is there.
    fn apply_summary(&self, record: &RelationSummaryRecord) -> Result<()>;
    fn get_summary(
        &self,
        group_id: &str,
        from_publisher: &str,
        to_publisher: &str,
        relation: &str,
    ) -> Result<Option<RelationSummaryRecord>>;
    fn list_log(&self, group_id: &str) -> Result<Vec<RelationRecord>>;
}

pub trait ImageRepository {
    /// Returns false when the trx was already stored.
    fn insert(&self, record: &ImageRecord) -> Result<bool>;
    fn get(&self, group_id: &str, trx_id: &str) -> Result<Option<ImageRecord>>;
    fn set_status(&self, group_id: &str, trx_id: &str, status: ContentStatus) -> Result<()>;
    fn list_for_object(&self, group_id: &str, object_id: &str) -> Result<Vec<ImageRecord>>;
}

pub trait NotificationRepository {
    /// Returns false when an identical notification already exists.
    fn insert(&self, record: &NotificationRecord) -> Result<bool>;
    fn list_for_group(&self, group_id: &str) -> Result<Vec<NotificationRecord>>;
    fn count_unread(&self, group_id: &str) -> Result<i64>;
    fn mark_all_read(&self, group_id: &str) -> Result<()>;
}

pub trait SyncCursorRepository {
    fn get(&self, group_id: &str) -> Result<Option<SyncCursorRecord>>;
    fn list(&self) -> Result<Vec<SyncCursorRecord>>;
    fn ensure(&self, group_id: &str) -> Result<()>;
    /// Advances the cursor after a committed batch and prepends a log entry.
    fn record_merge(
        &self,
        group_id: &str,
        latest_trx_id: &str,
        last_updated: &str,
        unread_delta: i64,
        log_entry: &str,
    ) -> Result<()>;
    /// Counts content merged out of band (resolved empty trx) without
    /// moving the cursor.
    fn record_backfill(
        &self,
        group_id: &str,
        last_updated: &str,
        unread_delta: i64,
        log_entry: &str,
    ) -> Result<()>;
    fn mark_read(&self, group_id: &str) -> Result<()>;
}

pub trait PendingTrxRepository {
    fn insert(&self, record: &PendingTrxRecord) -> Result<()>;
    fn list_for_group(&self, group_id: &str) -> Result<Vec<PendingTrxRecord>>;
    fn remove(&self, group_id: &str, trx_id: &str) -> Result<bool>;
}

pub trait EmptyTrxRepository {
    /// Records a missing reference. Existing markers keep their attempt count.
    fn insert(&self, group_id: &str, trx_id: &str) -> Result<()>;
    fn get(&self, group_id: &str, trx_id: &str) -> Result<Option<EmptyTrxRecord>>;
    fn list_for_group(&self, group_id: &str) -> Result<Vec<EmptyTrxRecord>>;
    fn record_attempt(&self, group_id: &str, trx_id: &str, at: &str) -> Result<u32>;
    fn remove(&self, group_id: &str, trx_id: &str) -> Result<bool>;
}

pub trait DeferredContentRepository {
    fn park(&self, record: &DeferredContentRecord) -> Result<()>;
    /// Removes and returns every item parked on `waiting_on`.
    fn take_waiting_on(
        &self,
        group_id: &str,
        waiting_on: &str,
    ) -> Result<Vec<DeferredContentRecord>>;
    fn list_for_group(&self, group_id: &str) -> Result<Vec<DeferredContentRecord>>;
}

pub struct SqliteRepositories<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRepositories<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn posts(&self) -> impl PostRepository + '_ {
        posts::SqlitePostRepository { conn: self.conn }
    }

    pub fn comments(&self) -> impl CommentRepository + '_ {
        comments::SqliteCommentRepository { conn: self.conn }
    }

    pub fn profiles(&self) -> impl ProfileRepository + '_ {
        profiles::SqliteProfileRepository { conn: self.conn }
    }

    pub fn counters(&self) -> impl CounterRepository + '_ {
        counters::SqliteCounterRepository { conn: self.conn }
    }

    pub fn relations(&self) -> impl RelationRepository + '_ {
        relations::SqliteRelationRepository { conn: self.conn }
    }

    pub fn images(&self) -> impl ImageRepository + '_ {
        images::SqliteImageRepository { conn: self.conn }
    }

    pub fn notifications(&self) -> impl NotificationRepository + '_ {
        notifications::SqliteNotificationRepository { conn: self.conn }
    }

    pub fn cursors(&self) -> impl SyncCursorRepository + '_ {
        cursors::SqliteSyncCursorRepository { conn: self.conn }
    }

    pub fn pending(&self) -> impl PendingTrxRepository + '_ {
        pending::SqlitePendingTrxRepository { conn: self.conn }
    }

    pub fn empty_trx(&self) -> impl EmptyTrxRepository + '_ {
        empty_trx::SqliteEmptyTrxRepository { conn: self.conn }
    }

    pub fn deferred(&self) -> impl DeferredContentRepository + '_ {
        deferred::SqliteDeferredContentRepository { conn: self.conn }
    }

    pub fn conn(&self) -> &'conn Connection {
        self.conn
    }
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
