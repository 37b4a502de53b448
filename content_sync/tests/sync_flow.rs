mod common;

use common::{comment, item, pipeline, post, FakeSource};
use content_sync::content::ContentStatus;
use content_sync::database::models::{CommentRecord, NotificationRecord, PostRecord};
use content_sync::database::repositories::{
    CommentRepository, DeferredContentRepository, EmptyTrxRepository, NotificationRepository,
    PendingTrxRepository, PostRepository, ProfileRepository, RelationRepository,
    SyncCursorRepository,
};
use content_sync::pending;
use content_sync::source::TypeUrl;
use serde_json::json;
use std::sync::Arc;

fn cursor_of(pipeline: &content_sync::pipeline::FetchPipeline, group: &str) -> Option<String> {
    pipeline
        .database()
        .with_repositories(|repos| repos.cursors().get(group))
        .unwrap()
        .and_then(|cursor| cursor.latest_trx_id)
}

#[tokio::test]
async fn page_after_cursor_builds_post_and_comment() {
    let source = Arc::new(FakeSource::default());
    source.append(post("g1", "t0", "alice", 1));
    let pipeline = pipeline(source.clone(), None);
    pipeline.fetch_group("g1", 20).await.unwrap();
    assert_eq!(cursor_of(&pipeline, "g1").as_deref(), Some("t0"));

    source.append(post("g1", "t1", "alice", 2));
    source.append(comment("g1", "t2", "bob", "t1", 3));
    let report = pipeline.fetch_group("g1", 20).await.unwrap();

    assert_eq!(report.fetched, 2);
    assert_eq!(report.new_posts, 1);
    assert_eq!(report.new_comments, 1);
    let (_, options) = source.requests().into_iter().nth(1).unwrap();
    assert_eq!(options.start_trx.as_deref(), Some("t0"));
    assert!(!options.include_start_trx);

    let (post, comment) = pipeline
        .database()
        .with_repositories(|repos| {
            Ok((
                repos.posts().get("g1", "t1")?,
                repos.comments().get("g1", "t2")?,
            ))
        })
        .unwrap();
    assert_eq!(post.unwrap().summary.comment_count, 1);
    let comment = comment.unwrap();
    assert_eq!(comment.status, ContentStatus::Synced);
    assert_eq!(comment.post_id, "t1");
    assert_eq!(cursor_of(&pipeline, "g1").as_deref(), Some("t2"));
}

#[tokio::test]
async fn empty_page_is_saturation_and_leaves_cursor() {
    let source = Arc::new(FakeSource::default());
    source.append(post("g1", "p1", "alice", 1));
    let pipeline = pipeline(source, None);

    assert_eq!(pipeline.fetch_group("g1", 20).await.unwrap().fetched, 1);
    let report = pipeline.fetch_group("g1", 20).await.unwrap();
    assert_eq!(report.fetched, 0);
    assert_eq!(cursor_of(&pipeline, "g1").as_deref(), Some("p1"));
}

#[tokio::test]
async fn local_submission_is_confirmed_by_the_log() {
    let source = Arc::new(FakeSource::default());
    let pipeline = pipeline(source.clone(), Some("me"));
    let draft = post("g1", "local-1", "me", 10);

    pending::submit_local(pipeline.database(), Some("me"), &draft).unwrap();
    let syncing = pipeline
        .database()
        .with_repositories(|repos| repos.posts().get("g1", "local-1"))
        .unwrap()
        .unwrap();
    assert_eq!(syncing.status, ContentStatus::Syncing);

    source.append(draft);
    let report = pipeline.fetch_group("g1", 20).await.unwrap();
    assert_eq!(report.new_posts, 0);

    let (confirmed, pending) = pipeline
        .database()
        .with_repositories(|repos| {
            Ok((
                repos.posts().get("g1", "local-1")?,
                repos.pending().list_for_group("g1")?,
            ))
        })
        .unwrap();
    assert_eq!(confirmed.unwrap().status, ContentStatus::Synced);
    assert!(pending.is_empty());
}

#[tokio::test]
async fn missing_parent_is_fetched_by_the_reconciler() {
    let source = Arc::new(FakeSource::default());
    source.append(post("g1", "p1", "alice", 1));
    source.append(comment("g1", "c1", "bob", "t99", 3));
    let pipeline = pipeline(source.clone(), None);

    let report = pipeline.fetch_group("g1", 20).await.unwrap();
    assert_eq!(report.deferred, 1);
    let marker = pipeline
        .database()
        .with_repositories(|repos| repos.empty_trx().get("g1", "t99"))
        .unwrap();
    assert!(marker.is_some());

    // The parent only shows up behind the cursor, where paging never looks.
    source.backfill(comment("g1", "t99", "carol", "p1", 2));
    let report = pipeline.fetch_group("g1", 20).await.unwrap();
    assert_eq!(report.fetched, 0);

    let (marker, parent, child, post) = pipeline
        .database()
        .with_repositories(|repos| {
            Ok((
                repos.empty_trx().get("g1", "t99")?,
                repos.comments().get("g1", "t99")?,
                repos.comments().get("g1", "c1")?,
                repos.posts().get("g1", "p1")?,
            ))
        })
        .unwrap();
    assert!(marker.is_none());
    assert_eq!(parent.unwrap().post_id, "p1");
    let child = child.unwrap();
    assert_eq!(child.post_id, "p1");
    assert_eq!(child.thread_id, "t99");
    assert_eq!(post.unwrap().summary.comment_count, 2);
}

#[tokio::test]
async fn failed_merge_rolls_back_and_retries_from_same_cursor() {
    let source = Arc::new(FakeSource::default());
    source.append(post("g1", "p0", "alice", 1));
    let pipeline = pipeline(source.clone(), None);
    pipeline.fetch_group("g1", 20).await.unwrap();

    pipeline
        .database()
        .with_repositories(|repos| {
            repos.conn().execute_batch(
                "CREATE TRIGGER reject_posts BEFORE INSERT ON posts
                 BEGIN SELECT RAISE(ABORT, 'boom'); END;",
            )?;
            Ok(())
        })
        .unwrap();
    source.append(comment("g1", "c1", "bob", "p0", 2));
    source.append(post("g1", "p1", "alice", 3));

    assert!(pipeline.fetch_group("g1", 20).await.is_err());
    assert_eq!(cursor_of(&pipeline, "g1").as_deref(), Some("p0"));
    let comment = pipeline
        .database()
        .with_repositories(|repos| repos.comments().get("g1", "c1"))
        .unwrap();
    assert!(comment.is_none());

    pipeline
        .database()
        .with_repositories(|repos| {
            repos.conn().execute_batch("DROP TRIGGER reject_posts;")?;
            Ok(())
        })
        .unwrap();
    let report = pipeline.fetch_group("g1", 20).await.unwrap();
    assert_eq!(report.fetched, 2);
    assert_eq!(cursor_of(&pipeline, "g1").as_deref(), Some("p1"));
}

#[tokio::test]
async fn source_errors_leave_state_untouched() {
    let source = Arc::new(FakeSource::default());
    source.append(post("g1", "p1", "alice", 1));
    source.set_failing("g1", true);
    let pipeline = pipeline(source.clone(), None);

    assert!(pipeline.fetch_group("g1", 20).await.is_err());
    assert_eq!(cursor_of(&pipeline, "g1"), None);

    source.set_failing("g1", false);
    assert_eq!(pipeline.fetch_group("g1", 20).await.unwrap().fetched, 1);
}

#[tokio::test]
async fn projections_track_unread_and_notifications() {
    let source = Arc::new(FakeSource::default());
    source.append(post("g1", "p1", "me", 1));
    source.append(post("g1", "p2", "bob", 2));
    source.append(comment("g1", "c1", "bob", "p1", 3));
    source.append(item(
        "g1",
        "l1",
        "bob",
        TypeUrl::Counter,
        4,
        json!({"objectId": "p1", "kind": "Like"}),
    ));
    let pipeline = pipeline(source, Some("me"));
    let mut unread_rx = pipeline.projections().subscribe_unread();

    let report = pipeline.fetch_group("g1", 20).await.unwrap();
    assert_eq!(report.unread_delta, 1);
    assert_eq!(report.notifications, 2);
    assert!(unread_rx.has_changed().unwrap());
    assert_eq!(unread_rx.borrow_and_update().get("g1"), Some(&1));

    let projections = pipeline.projections();
    assert_eq!(projections.unread("g1"), 1);
    assert_eq!(projections.unread_notifications("g1"), 2);

    projections
        .mark_group_read(pipeline.database(), "g1")
        .unwrap();
    projections
        .mark_notifications_read(pipeline.database(), "g1")
        .unwrap();
    assert_eq!(projections.unread("g1"), 0);
    assert_eq!(projections.unread_notifications("g1"), 0);
    projections.refresh(pipeline.database(), "g1").unwrap();
    assert_eq!(projections.unread_notifications("g1"), 0);
}

type Snapshot = (
    Vec<PostRecord>,
    Vec<CommentRecord>,
    Vec<NotificationRecord>,
    usize,
    Option<String>,
    i64,
);

fn snapshot(pipeline: &content_sync::pipeline::FetchPipeline) -> Snapshot {
    pipeline
        .database()
        .with_repositories(|repos| {
            let mut posts = repos.posts().list_recent("g1", 50)?;
            // Ranking is recomputed against the wall clock.
            for post in &mut posts {
                post.summary.hot_count = 0;
            }
            let mut comments = repos.comments().list_for_post("g1", "p1")?;
            for comment in &mut comments {
                comment.summary.hot_count = 0;
            }
            let cursor = repos.cursors().get("g1")?;
            Ok((
                posts,
                comments,
                repos.notifications().list_for_group("g1")?,
                repos.relations().list_log("g1")?.len(),
                cursor.as_ref().and_then(|c| c.latest_trx_id.clone()),
                cursor.map_or(0, |c| c.unread_count),
            ))
        })
        .unwrap()
}

#[tokio::test]
async fn redelivered_page_changes_nothing() {
    let source = Arc::new(FakeSource::default());
    source.append(post("g1", "p1", "me", 1));
    source.append(post("g1", "p2", "bob", 2));
    source.append(comment("g1", "c1", "bob", "p1", 3));
    source.append(item(
        "g1",
        "l1",
        "bob",
        TypeUrl::Counter,
        4,
        json!({"objectId": "p1", "kind": "Like"}),
    ));
    source.append(item(
        "g1",
        "f1",
        "bob",
        TypeUrl::Profile,
        5,
        json!({"name": "Bob"}),
    ));
    source.append(item(
        "g1",
        "r1",
        "bob",
        TypeUrl::Relation,
        6,
        json!({"to": "me", "kind": "Follow"}),
    ));
    let pipeline = pipeline(source.clone(), Some("me"));
    pipeline.fetch_group("g1", 20).await.unwrap();
    let before = snapshot(&pipeline);
    assert_eq!(before.1.len(), 1);
    assert_eq!(before.2.len(), 2);

    source.redeliver_next_page();
    let report = pipeline.fetch_group("g1", 20).await.unwrap();

    assert_eq!(report.fetched, 6);
    assert_eq!(report.new_posts, 0);
    assert_eq!(report.new_comments, 0);
    assert_eq!(report.notifications, 0);
    assert_eq!(report.unread_delta, 0);
    assert_eq!(snapshot(&pipeline), before);
    let profile = pipeline
        .database()
        .with_repositories(|repos| repos.profiles().get("g1", "bob"))
        .unwrap();
    assert_eq!(profile.unwrap().name, "Bob");
}

#[tokio::test]
async fn delete_seen_before_its_comment_still_lands() {
    let source = Arc::new(FakeSource::default());
    source.append(post("g1", "p1", "alice", 1));
    source.append(comment("g1", "c1", "bob", "t99", 3));
    source.append(item(
        "g1",
        "c1-del",
        "bob",
        TypeUrl::Comment,
        4,
        json!({"id": "c1", "replyTo": "t99", "deleted": true, "content": ""}),
    ));
    let pipeline = pipeline(source.clone(), None);
    pipeline.fetch_group("g1", 20).await.unwrap();

    source.backfill(comment("g1", "t99", "carol", "p1", 2));
    pipeline.fetch_group("g1", 20).await.unwrap();

    let (child, post, parked) = pipeline
        .database()
        .with_repositories(|repos| {
            Ok((
                repos.comments().get("g1", "c1")?,
                repos.posts().get("g1", "p1")?,
                repos.deferred().list_for_group("g1")?,
            ))
        })
        .unwrap();
    assert!(child.unwrap().deleted);
    assert_eq!(post.unwrap().summary.comment_count, 1);
    assert!(parked.is_empty());
}
