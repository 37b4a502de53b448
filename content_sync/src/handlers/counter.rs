use super::{summary, MergeContext};
use crate::content::{CounterContent, CounterKind, Envelope};
use crate::database::models::{CounterRecord, NotificationKind};
use crate::database::repositories::{CommentRepository, CounterRepository, PostRepository};
use anyhow::Result;
use std::collections::BTreeSet;

pub fn handle(ctx: &mut MergeContext<'_>, items: Vec<Envelope<CounterContent>>) -> Result<()> {
    let repos = ctx.repos;
    let mut affected = BTreeSet::new();

    for item in items {
        let inserted = repos.counters().insert(&CounterRecord {
            group_id: ctx.group_id.to_string(),
            trx_id: item.trx_id.clone(),
            object_id: item.body.object_id.clone(),
            publisher: item.publisher.clone(),
            kind: item.body.kind.as_str().to_string(),
            timestamp: item.timestamp,
        })?;
        if !inserted {
            continue;
        }
        if item.body.kind == CounterKind::Like {
            if let Some(owner) = owner_of(ctx, &item.body.object_id)? {
                // Keyed by the counter event so every like surfaces once.
                ctx.notify(
                    &owner,
                    &item.publisher,
                    &item.trx_id,
                    NotificationKind::Like,
                    item.timestamp,
                )?;
            }
        }
        affected.insert(item.body.object_id);
    }

    for object_id in affected {
        let refreshed = match summary::refresh_post(repos, ctx.group_id, &object_id, ctx.now_ns)? {
            Some(summary) => Some(summary),
            None => summary::refresh_comment(repos, ctx.group_id, &object_id, ctx.now_ns)?,
        };
        if refreshed.is_none() {
            tracing::debug!(object_id = %object_id, "counter target not cached yet");
        }
    }
    Ok(())
}

fn owner_of(ctx: &MergeContext<'_>, object_id: &str) -> Result<Option<String>> {
    if let Some(post) = ctx.repos.posts().get(ctx.group_id, object_id)? {
        return Ok(Some(post.publisher));
    }
    Ok(ctx
        .repos
        .comments()
        .get(ctx.group_id, object_id)?
        .map(|comment| comment.publisher))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::{NotificationRepository, SqliteRepositories};
    use crate::handlers::post;
    use crate::handlers::test_support::{counter, post as make_post, setup_conn};

    #[test]
    fn counts_track_the_latest_event_per_publisher() {
        let conn = setup_conn();
        let repos = SqliteRepositories::new(&conn);
        let mut ctx = MergeContext::new(&repos, "g1", Some("me"), 0);
        post::handle(&mut ctx, vec![make_post("p1", "me", 1)]).unwrap();
        handle(
            &mut ctx,
            vec![
                counter("k1", "bob", "p1", CounterKind::Like, 2),
                counter("k2", "carol", "p1", CounterKind::Like, 3),
                counter("k3", "carol", "p1", CounterKind::UndoLike, 4),
                counter("k4", "dave", "p1", CounterKind::Dislike, 5),
            ],
        )
        .unwrap();

        let summary = repos.posts().get("g1", "p1").unwrap().unwrap().summary;
        assert_eq!((summary.like_count, summary.dislike_count), (1, 1));
        assert!(summary.hot_count >= 0);

        handle(
            &mut ctx,
            vec![counter("k1", "bob", "p1", CounterKind::Like, 2)],
        )
        .unwrap();
        let replayed = repos.posts().get("g1", "p1").unwrap().unwrap().summary;
        assert_eq!(replayed, summary);
    }

    #[test]
    fn likes_on_local_content_notify_once_per_event() {
        let conn = setup_conn();
        let repos = SqliteRepositories::new(&conn);
        let mut ctx = MergeContext::new(&repos, "g1", Some("me"), 0);
        post::handle(&mut ctx, vec![make_post("p1", "me", 1)]).unwrap();
        handle(
            &mut ctx,
            vec![
                counter("k1", "bob", "p1", CounterKind::Like, 2),
                counter("k2", "me", "p1", CounterKind::Like, 3),
            ],
        )
        .unwrap();

        assert_eq!(ctx.report.notifications, 1);
        assert_eq!(repos.notifications().count_unread("g1").unwrap(), 1);
    }

    #[test]
    fn counters_for_unknown_objects_are_kept() {
        let conn = setup_conn();
        let repos = SqliteRepositories::new(&conn);
        let mut ctx = MergeContext::new(&repos, "g1", None, 0);
        handle(
            &mut ctx,
            vec![counter("k1", "bob", "ghost", CounterKind::Like, 2)],
        )
        .unwrap();
        assert_eq!(repos.counters().list_for_object("g1", "ghost").unwrap().len(), 1);
    }
}
