//! Derived counters. Summaries are always recomputed from the stored rows,
//! never incremented, so replaying a batch cannot drift them.

use crate::content::CounterKind;
use crate::database::models::{CounterRecord, Summary};
use crate::database::repositories::{
    CommentRepository, CounterRepository, PostRepository, SqliteRepositories,
};
use anyhow::Result;
use std::collections::HashMap;

const NANOS_PER_HOUR: f64 = 3_600_000_000_000.0;
const COMMENT_WEIGHT: f64 = 2.0;
const LIKE_WEIGHT: f64 = 1.0;
const DISLIKE_WEIGHT: f64 = 1.0;
const GRAVITY: f64 = 1.5;

/// Ranking score: engagement divided by a power of age in hours. Decays as
/// the item ages and never goes below zero.
pub fn hot_count(comment_count: i64, like_count: i64, dislike_count: i64, age_ns: i64) -> i64 {
    let engagement = comment_count as f64 * COMMENT_WEIGHT + like_count as f64 * LIKE_WEIGHT
        - dislike_count as f64 * DISLIKE_WEIGHT;
    if engagement <= 0.0 {
        return 0;
    }
    let hours = (age_ns.max(0) as f64) / NANOS_PER_HOUR;
    (engagement * 1000.0 / (hours + 2.0).powf(GRAVITY)).round() as i64
}

/// Current likes and dislikes from an object's counter log, oldest first.
/// Each publisher counts once; their latest event in a family wins.
pub fn tally(events: &[CounterRecord]) -> (i64, i64) {
    let mut likes: HashMap<&str, bool> = HashMap::new();
    let mut dislikes: HashMap<&str, bool> = HashMap::new();
    for event in events {
        match CounterKind::parse(&event.kind) {
            Some(CounterKind::Like) => {
                likes.insert(&event.publisher, true);
            }
            Some(CounterKind::UndoLike) => {
                likes.insert(&event.publisher, false);
            }
            Some(CounterKind::Dislike) => {
                dislikes.insert(&event.publisher, true);
            }
            Some(CounterKind::UndoDislike) => {
                dislikes.insert(&event.publisher, false);
            }
            None => {
                tracing::debug!(trx_id = %event.trx_id, kind = %event.kind, "ignoring unknown counter kind");
            }
        }
    }
    let count = |map: &HashMap<&str, bool>| map.values().filter(|v| **v).count() as i64;
    (count(&likes), count(&dislikes))
}

fn summarize(comment_count: i64, events: &[CounterRecord], timestamp: i64, now_ns: i64) -> Summary {
    let (like_count, dislike_count) = tally(events);
    Summary {
        hot_count: hot_count(comment_count, like_count, dislike_count, now_ns - timestamp),
        comment_count,
        like_count,
        dislike_count,
    }
}

/// Recomputes and stores a post's summary. Returns `None` for unknown posts.
pub fn refresh_post(
    repos: &SqliteRepositories<'_>,
    group_id: &str,
    post_id: &str,
    now_ns: i64,
) -> Result<Option<Summary>> {
    let Some(post) = repos.posts().get(group_id, post_id)? else {
        return Ok(None);
    };
    let comment_count = repos.comments().count_for_post(group_id, post_id)?;
    let events = repos.counters().list_for_object(group_id, post_id)?;
    let summary = summarize(comment_count, &events, post.timestamp, now_ns);
    if summary != post.summary {
        repos.posts().update_summary(group_id, post_id, &summary)?;
    }
    Ok(Some(summary))
}

/// Recomputes and stores a comment's summary. Returns `None` for unknown
/// comments.
pub fn refresh_comment(
    repos: &SqliteRepositories<'_>,
    group_id: &str,
    comment_id: &str,
    now_ns: i64,
) -> Result<Option<Summary>> {
    let Some(comment) = repos.comments().get(group_id, comment_id)? else {
        return Ok(None);
    };
    let comment_count = repos.comments().count_replies(group_id, comment_id)?;
    let events = repos.counters().list_for_object(group_id, comment_id)?;
    let summary = summarize(comment_count, &events, comment.timestamp, now_ns);
    if summary != comment.summary {
        repos
            .comments()
            .update_summary(group_id, comment_id, &summary)?;
    }
    Ok(Some(summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(trx_id: &str, publisher: &str, kind: &str) -> CounterRecord {
        CounterRecord {
            group_id: "g1".into(),
            trx_id: trx_id.into(),
            object_id: "p1".into(),
            publisher: publisher.into(),
            kind: kind.into(),
            timestamp: 0,
        }
    }

    #[test]
    fn hot_count_decays_with_age() {
        let fresh = hot_count(3, 5, 0, 0);
        let day_old = hot_count(3, 5, 0, 24 * NANOS_PER_HOUR as i64);
        assert!(fresh > day_old);
        assert!(day_old > 0);
    }

    #[test]
    fn hot_count_grows_with_engagement() {
        assert!(hot_count(2, 0, 0, 0) > hot_count(1, 0, 0, 0));
        assert!(hot_count(0, 2, 0, 0) > hot_count(0, 1, 0, 0));
        assert!(hot_count(0, 2, 1, 0) < hot_count(0, 2, 0, 0));
    }

    #[test]
    fn hot_count_never_negative() {
        assert_eq!(hot_count(0, 0, 10, 0), 0);
        assert_eq!(hot_count(0, 0, 0, -5), 0);
    }

    #[test]
    fn tally_counts_latest_event_per_publisher() {
        let events = vec![
            event("c1", "alice", "Like"),
            event("c2", "alice", "Like"),
            event("c3", "bob", "Like"),
            event("c4", "bob", "UndoLike"),
            event("c5", "carol", "Dislike"),
            event("c6", "dave", "Dislike"),
            event("c7", "dave", "UndoDislike"),
        ];
        assert_eq!(tally(&events), (1, 1));
    }
}
