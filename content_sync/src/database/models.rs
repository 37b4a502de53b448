use crate::content::ContentStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub hot_count: i64,
    pub comment_count: i64,
    pub like_count: i64,
    pub dislike_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub group_id: String,
    pub id: String,
    pub trx_id: String,
    pub publisher: String,
    pub title: Option<String>,
    pub content: String,
    pub timestamp: i64,
    pub status: ContentStatus,
    pub deleted: bool,
    pub summary: Summary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub group_id: String,
    pub id: String,
    pub trx_id: String,
    pub post_id: String,
    /// Top-level comment this belongs under; empty for top-level comments.
    pub thread_id: String,
    /// Immediate parent when nesting exceeds one level; empty otherwise.
    pub reply_to: String,
    pub publisher: String,
    pub content: String,
    pub timestamp: i64,
    pub status: ContentStatus,
    pub deleted: bool,
    pub summary: Summary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub group_id: String,
    pub publisher: String,
    pub name: String,
    pub avatar: Option<String>,
    pub trx_id: String,
    pub timestamp: i64,
    pub status: ContentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterRecord {
    pub group_id: String,
    pub trx_id: String,
    pub object_id: String,
    pub publisher: String,
    pub kind: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRecord {
    pub group_id: String,
    pub trx_id: String,
    pub from_publisher: String,
    pub to_publisher: String,
    pub kind: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationSummaryRecord {
    pub group_id: String,
    pub from_publisher: String,
    pub to_publisher: String,
    pub relation: String, // 'follow' or 'block'
    pub value: bool,
    pub trx_id: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub group_id: String,
    pub trx_id: String,
    pub publisher: String,
    pub object_id: Option<String>,
    pub name: Option<String>,
    pub media_type: String,
    pub size_bytes: Option<i64>,
    pub timestamp: i64,
    pub status: ContentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    CommentPost,
    CommentReply,
    Like,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::CommentPost => "commentPost",
            NotificationKind::CommentReply => "commentReply",
            NotificationKind::Like => "like",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "commentPost" => Some(NotificationKind::CommentPost),
            "commentReply" => Some(NotificationKind::CommentReply),
            "like" => Some(NotificationKind::Like),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub group_id: String,
    /// The comment or counter trx that triggered the notification.
    pub object_id: String,
    pub from_publisher: String,
    pub kind: NotificationKind,
    pub read: bool,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCursorRecord {
    pub group_id: String,
    pub latest_trx_id: Option<String>,
    pub last_updated: Option<String>,
    pub unread_count: i64,
    /// Newest first, bounded.
    pub log_tail: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTrxRecord {
    pub group_id: String,
    pub trx_id: String,
    pub item_json: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmptyTrxRecord {
    pub group_id: String,
    pub trx_id: String,
    pub attempts: u32,
    pub last_attempt_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredContentRecord {
    pub group_id: String,
    pub trx_id: String,
    /// Missing reference this item is parked on.
    pub waiting_on: String,
    pub item_json: String,
}
