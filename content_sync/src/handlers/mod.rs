//! Per-type merge functions. Each takes a batch of decoded items of one kind
//! and folds it into the local cache inside the caller's transaction.
//!
//! A handler never fails on a single bad item; it logs and moves on. Only
//! storage errors bubble up, and those abort the whole round.

pub mod comment;
pub mod counter;
pub mod image;
pub mod post;
pub mod profile;
pub mod relation;
pub mod summary;

use crate::content::TypedContent;
use crate::database::models::{NotificationKind, NotificationRecord};
use crate::database::repositories::{NotificationRepository, SqliteRepositories};
use anyhow::Result;
use serde::Serialize;
use uuid::Uuid;

/// What one merge round did, handed to in-memory projections after commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub group_id: String,
    /// Items in the fetched page after dedupe.
    pub fetched: usize,
    pub merged_trx_ids: Vec<String>,
    pub new_posts: usize,
    pub new_comments: usize,
    /// New content authored by someone other than the local identity.
    pub unread_delta: i64,
    pub notifications: usize,
    pub deferred: usize,
    pub promoted: usize,
    pub skipped: usize,
    pub latest_trx_id: Option<String>,
}

pub struct MergeContext<'a> {
    pub repos: &'a SqliteRepositories<'a>,
    pub group_id: &'a str,
    pub local_publisher: Option<&'a str>,
    pub now_ns: i64,
    pub report: MergeReport,
    /// Post ids inserted this round; comments parked on them get released.
    pub(crate) resolved_posts: Vec<String>,
}

impl<'a> MergeContext<'a> {
    pub fn new(
        repos: &'a SqliteRepositories<'a>,
        group_id: &'a str,
        local_publisher: Option<&'a str>,
        now_ns: i64,
    ) -> Self {
        Self {
            repos,
            group_id,
            local_publisher,
            now_ns,
            report: MergeReport {
                group_id: group_id.to_string(),
                ..MergeReport::default()
            },
            resolved_posts: Vec::new(),
        }
    }

    pub fn is_local(&self, publisher: &str) -> bool {
        self.local_publisher == Some(publisher)
    }

    /// Records a notification when `owner` is the local identity and the
    /// actor is someone else.
    pub(crate) fn notify(
        &mut self,
        owner: &str,
        actor: &str,
        object_id: &str,
        kind: NotificationKind,
        timestamp: i64,
    ) -> Result<()> {
        if !self.is_local(owner) || self.is_local(actor) {
            return Ok(());
        }
        let record = NotificationRecord {
            id: Uuid::new_v4().to_string(),
            group_id: self.group_id.to_string(),
            object_id: object_id.to_string(),
            from_publisher: actor.to_string(),
            kind,
            read: false,
            timestamp,
        };
        if self.repos.notifications().insert(&record)? {
            self.report.notifications += 1;
        }
        Ok(())
    }
}

/// Splits a decoded batch by kind and runs every handler in dependency
/// order: posts before the comments that hang off them, both before the
/// counters that summarize them.
pub fn merge_batch(ctx: &mut MergeContext<'_>, items: Vec<TypedContent>) -> Result<()> {
    let mut posts = Vec::new();
    let mut comments = Vec::new();
    let mut counters = Vec::new();
    let mut images = Vec::new();
    let mut profiles = Vec::new();
    let mut relations = Vec::new();

    for item in items {
        ctx.report.merged_trx_ids.push(item.trx_id().to_string());
        match item {
            TypedContent::Post(post) => posts.push(post),
            TypedContent::Comment(comment) => comments.push(comment),
            TypedContent::Counter(counter) => counters.push(counter),
            TypedContent::Image(image) => images.push(image),
            TypedContent::Profile(profile) => profiles.push(profile),
            TypedContent::Relation(relation) => relations.push(relation),
        }
    }

    post::handle(ctx, posts)?;
    comment::handle(ctx, comments)?;
    counter::handle(ctx, counters)?;
    image::handle(ctx, images)?;
    profile::handle(ctx, profiles)?;
    relation::handle(ctx, relations)?;
    Ok(())
}
