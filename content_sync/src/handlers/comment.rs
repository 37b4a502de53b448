//! Comment threading. A comment hangs off a post (top level), a top-level
//! comment (`thread_id` set), or a nested comment (`thread_id` and
//! `reply_to` set). Comments whose parent is not cached yet are parked in
//! `deferred_contents` behind an empty-trx marker and replayed as soon as
//! the parent lands, whether in this round or a later one. A delete that
//! arrives before its comment is parked on the comment's id the same way.

use super::{summary, MergeContext};
use crate::content::{CommentContent, ContentStatus, Envelope};
use crate::database::models::{CommentRecord, DeferredContentRecord, NotificationKind, Summary};
use crate::database::repositories::{
    CommentRepository, DeferredContentRepository, EmptyTrxRepository, PostRepository,
};
use anyhow::Result;
use std::collections::{BTreeSet, VecDeque};

struct Placement {
    post_id: String,
    thread_id: String,
    reply_to: String,
    owner: String,
    kind: NotificationKind,
}

#[derive(Default)]
struct Touched {
    posts: BTreeSet<String>,
    comments: BTreeSet<String>,
}

impl Touched {
    fn record(&mut self, post_id: &str, thread_id: &str, reply_to: &str) {
        self.posts.insert(post_id.to_string());
        for id in [thread_id, reply_to] {
            if !id.is_empty() {
                self.comments.insert(id.to_string());
            }
        }
    }
}

pub fn handle(ctx: &mut MergeContext<'_>, items: Vec<Envelope<CommentContent>>) -> Result<()> {
    let mut queue: VecDeque<Envelope<CommentContent>> = items.into();
    let mut touched = Touched::default();
    for post_id in std::mem::take(&mut ctx.resolved_posts) {
        release(ctx, &post_id, &mut queue)?;
        touched.posts.insert(post_id);
    }

    while let Some(item) = queue.pop_front() {
        if let Some(inserted) = merge_comment(ctx, item, &mut touched)? {
            release(ctx, &inserted, &mut queue)?;
            touched.comments.insert(inserted);
        }
    }

    for post_id in &touched.posts {
        summary::refresh_post(ctx.repos, ctx.group_id, post_id, ctx.now_ns)?;
    }
    for comment_id in &touched.comments {
        summary::refresh_comment(ctx.repos, ctx.group_id, comment_id, ctx.now_ns)?;
    }
    Ok(())
}

/// Clears the marker on `parent_id` and queues every comment parked on it.
fn release(
    ctx: &mut MergeContext<'_>,
    parent_id: &str,
    queue: &mut VecDeque<Envelope<CommentContent>>,
) -> Result<()> {
    let repos = ctx.repos;
    repos.empty_trx().remove(ctx.group_id, parent_id)?;
    for record in repos.deferred().take_waiting_on(ctx.group_id, parent_id)? {
        match serde_json::from_str::<Envelope<CommentContent>>(&record.item_json) {
            Ok(item) => {
                tracing::debug!(trx_id = %item.trx_id, parent = %parent_id, "releasing deferred comment");
                queue.push_back(item);
            }
            Err(err) => {
                tracing::warn!(trx_id = %record.trx_id, error = %err, "dropping unreadable deferred comment");
            }
        }
    }
    Ok(())
}

fn merge_comment(
    ctx: &mut MergeContext<'_>,
    item: Envelope<CommentContent>,
    touched: &mut Touched,
) -> Result<Option<String>> {
    let repos = ctx.repos;
    let comments = repos.comments();

    if let Some(existing) = comments.get(ctx.group_id, &item.body.id)? {
        if existing.trx_id == item.trx_id {
            if existing.status == ContentStatus::Syncing && item.status == ContentStatus::Synced {
                comments.set_status(ctx.group_id, &existing.id, ContentStatus::Synced)?;
                ctx.report.promoted += 1;
            }
        } else if existing.publisher != item.publisher {
            tracing::warn!(comment_id = %existing.id, publisher = %item.publisher, "ignoring comment update from non-author");
            ctx.report.skipped += 1;
        } else if item.body.deleted && !existing.deleted {
            comments.mark_deleted(ctx.group_id, &existing.id)?;
            touched.record(&existing.post_id, &existing.thread_id, &existing.reply_to);
        }
        return Ok(None);
    }

    if item.body.deleted {
        // Applied when the comment itself is merged and releases it.
        park(ctx, &item, &item.body.id)?;
        tracing::debug!(comment_id = %item.body.id, "delete for uncached comment, holding it");
        return Ok(None);
    }

    let Some(placement) = place(ctx, &item.body.parent_id)? else {
        defer(ctx, &item)?;
        return Ok(None);
    };

    comments.insert(&CommentRecord {
        group_id: ctx.group_id.to_string(),
        id: item.body.id.clone(),
        trx_id: item.trx_id.clone(),
        post_id: placement.post_id.clone(),
        thread_id: placement.thread_id.clone(),
        reply_to: placement.reply_to.clone(),
        publisher: item.publisher.clone(),
        content: item.body.content.clone(),
        timestamp: item.timestamp,
        status: item.status,
        deleted: false,
        summary: Summary::default(),
    })?;
    ctx.report.new_comments += 1;
    touched.record(&placement.post_id, &placement.thread_id, &placement.reply_to);
    ctx.notify(
        &placement.owner,
        &item.publisher,
        &item.body.id,
        placement.kind,
        item.timestamp,
    )?;
    Ok(Some(item.body.id))
}

fn place(ctx: &MergeContext<'_>, parent_id: &str) -> Result<Option<Placement>> {
    if let Some(post) = ctx.repos.posts().get(ctx.group_id, parent_id)? {
        return Ok(Some(Placement {
            post_id: post.id,
            thread_id: String::new(),
            reply_to: String::new(),
            owner: post.publisher,
            kind: NotificationKind::CommentPost,
        }));
    }
    let Some(parent) = ctx.repos.comments().get(ctx.group_id, parent_id)? else {
        return Ok(None);
    };
    let (thread_id, reply_to) = if parent.thread_id.is_empty() {
        (parent.id, String::new())
    } else {
        (parent.thread_id, parent.id)
    };
    Ok(Some(Placement {
        post_id: parent.post_id,
        thread_id,
        reply_to,
        owner: parent.publisher,
        kind: NotificationKind::CommentReply,
    }))
}

fn defer(ctx: &mut MergeContext<'_>, item: &Envelope<CommentContent>) -> Result<()> {
    let parent_id = &item.body.parent_id;
    ctx.repos.empty_trx().insert(ctx.group_id, parent_id)?;
    park(ctx, item, parent_id)?;
    tracing::debug!(trx_id = %item.trx_id, parent = %parent_id, "parent not cached, deferring comment");
    Ok(())
}

fn park(ctx: &mut MergeContext<'_>, item: &Envelope<CommentContent>, waiting_on: &str) -> Result<()> {
    ctx.repos.deferred().park(&DeferredContentRecord {
        group_id: ctx.group_id.to_string(),
        trx_id: item.trx_id.clone(),
        waiting_on: waiting_on.to_string(),
        item_json: serde_json::to_string(item)?,
    })?;
    ctx.report.deferred += 1;
    Ok(())
}
