use super::MergeContext;
use crate::content::{ContentStatus, Envelope, PostContent};
use crate::database::models::{PostRecord, Summary};
use crate::database::repositories::PostRepository;
use anyhow::Result;

pub fn handle(ctx: &mut MergeContext<'_>, items: Vec<Envelope<PostContent>>) -> Result<()> {
    for item in items {
        merge_post(ctx, item)?;
    }
    Ok(())
}

fn merge_post(ctx: &mut MergeContext<'_>, item: Envelope<PostContent>) -> Result<()> {
    let repos = ctx.repos;
    let posts = repos.posts();
    let Some(existing) = posts.get(ctx.group_id, &item.body.id)? else {
        if item.body.deleted {
            tracing::debug!(post_id = %item.body.id, trx_id = %item.trx_id, "delete for unknown post");
            ctx.report.skipped += 1;
            return Ok(());
        }
        posts.insert(&PostRecord {
            group_id: ctx.group_id.to_string(),
            id: item.body.id.clone(),
            trx_id: item.trx_id.clone(),
            publisher: item.publisher.clone(),
            title: item.body.title.clone(),
            content: item.body.content.clone(),
            timestamp: item.timestamp,
            status: item.status,
            deleted: false,
            summary: Summary::default(),
        })?;
        ctx.report.new_posts += 1;
        if !ctx.is_local(&item.publisher) {
            ctx.report.unread_delta += 1;
        }
        ctx.resolved_posts.push(item.body.id);
        return Ok(());
    };

    if existing.trx_id == item.trx_id {
        if existing.status == ContentStatus::Syncing && item.status == ContentStatus::Synced {
            posts.set_status(ctx.group_id, &existing.id, ContentStatus::Synced)?;
            ctx.report.promoted += 1;
        }
        return Ok(());
    }

    if existing.publisher != item.publisher {
        tracing::warn!(
            post_id = %existing.id,
            author = %existing.publisher,
            publisher = %item.publisher,
            "ignoring post update from non-author"
        );
        ctx.report.skipped += 1;
        return Ok(());
    }

    if item.body.deleted {
        if !existing.deleted {
            posts.mark_deleted(ctx.group_id, &existing.id)?;
            tracing::debug!(post_id = %existing.id, "post deleted");
        }
    } else {
        posts.update_content(
            ctx.group_id,
            &existing.id,
            item.body.title.as_deref(),
            &item.body.content,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::SqliteRepositories;
    use crate::handlers::test_support::{envelope, post, setup_conn};

    #[test]
    fn inserting_twice_is_a_noop() {
        let conn = setup_conn();
        let repos = SqliteRepositories::new(&conn);
        let mut ctx = MergeContext::new(&repos, "g1", Some("me"), 0);
        handle(&mut ctx, vec![post("t1", "alice", 1)]).unwrap();
        handle(&mut ctx, vec![post("t1", "alice", 1)]).unwrap();

        assert_eq!(ctx.report.new_posts, 1);
        assert_eq!(ctx.report.unread_delta, 1);
        assert_eq!(repos.posts().list_recent("g1", 10).unwrap().len(), 1);
    }

    #[test]
    fn confirmed_copy_promotes_pending_post() {
        let conn = setup_conn();
        let repos = SqliteRepositories::new(&conn);
        let mut ctx = MergeContext::new(&repos, "g1", Some("me"), 0);
        let mut pending = post("t1", "me", 1);
        pending.status = ContentStatus::Syncing;
        handle(&mut ctx, vec![pending]).unwrap();
        assert_eq!(ctx.report.unread_delta, 0);

        handle(&mut ctx, vec![post("t1", "me", 1)]).unwrap();
        let stored = repos.posts().get("g1", "t1").unwrap().unwrap();
        assert_eq!(stored.status, ContentStatus::Synced);
        assert_eq!(ctx.report.promoted, 1);
    }

    #[test]
    fn only_author_can_edit_or_delete() {
        let conn = setup_conn();
        let repos = SqliteRepositories::new(&conn);
        let mut ctx = MergeContext::new(&repos, "g1", None, 0);
        handle(&mut ctx, vec![post("t1", "alice", 1)]).unwrap();

        let edit = |trx: &str, publisher: &str, deleted: bool| {
            envelope(
                trx,
                publisher,
                2,
                PostContent {
                    id: "t1".into(),
                    title: Some("edited".into()),
                    content: "edited body".into(),
                    deleted,
                },
            )
        };
        handle(&mut ctx, vec![edit("t2", "mallory", true)]).unwrap();
        assert!(!repos.posts().get("g1", "t1").unwrap().unwrap().deleted);

        handle(&mut ctx, vec![edit("t3", "alice", false)]).unwrap();
        let stored = repos.posts().get("g1", "t1").unwrap().unwrap();
        assert_eq!(stored.content, "edited body");
        assert_eq!(stored.title.as_deref(), Some("edited"));

        handle(&mut ctx, vec![edit("t4", "alice", true)]).unwrap();
        assert!(repos.posts().get("g1", "t1").unwrap().unwrap().deleted);
        assert_eq!(ctx.report.skipped, 1);
    }
}
