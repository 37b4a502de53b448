use super::MergeContext;
use crate::content::{ContentStatus, Envelope, ProfileContent};
use crate::database::models::ProfileRecord;
use crate::database::repositories::ProfileRepository;
use anyhow::Result;

/// Last write wins per `(group, publisher)`. Equal timestamps fall back to
/// trx id so every replica settles on the same snapshot.
pub fn handle(ctx: &mut MergeContext<'_>, items: Vec<Envelope<ProfileContent>>) -> Result<()> {
    let repos = ctx.repos;
    let profiles = repos.profiles();
    for item in items {
        if let Some(existing) = profiles.get(ctx.group_id, &item.publisher)? {
            if existing.trx_id == item.trx_id {
                if existing.status == ContentStatus::Syncing && item.status == ContentStatus::Synced {
                    profiles.set_status(ctx.group_id, &item.publisher, ContentStatus::Synced)?;
                    ctx.report.promoted += 1;
                }
                continue;
            }
            if (existing.timestamp, existing.trx_id.as_str()) > (item.timestamp, item.trx_id.as_str()) {
                tracing::debug!(publisher = %item.publisher, trx_id = %item.trx_id, "stale profile snapshot");
                continue;
            }
        }
        profiles.upsert(&ProfileRecord {
            group_id: ctx.group_id.to_string(),
            publisher: item.publisher,
            name: item.body.name,
            avatar: item.body.avatar,
            trx_id: item.trx_id,
            timestamp: item.timestamp,
            status: item.status,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::SqliteRepositories;
    use crate::handlers::test_support::{envelope, setup_conn};

    fn snapshot(trx_id: &str, timestamp: i64, name: &str) -> Envelope<ProfileContent> {
        envelope(
            trx_id,
            "alice",
            timestamp,
            ProfileContent {
                name: name.into(),
                avatar: None,
            },
        )
    }

    #[test]
    fn newest_snapshot_wins_regardless_of_arrival() {
        let conn = setup_conn();
        let repos = SqliteRepositories::new(&conn);
        let mut ctx = MergeContext::new(&repos, "g1", None, 0);
        handle(&mut ctx, vec![snapshot("t2", 20, "Alice B")]).unwrap();
        handle(&mut ctx, vec![snapshot("t1", 10, "Alice A")]).unwrap();

        let stored = repos.profiles().get("g1", "alice").unwrap().unwrap();
        assert_eq!(stored.name, "Alice B");
        assert_eq!(stored.trx_id, "t2");

        handle(&mut ctx, vec![snapshot("t3", 30, "Alice C")]).unwrap();
        let stored = repos.profiles().get("g1", "alice").unwrap().unwrap();
        assert_eq!(stored.name, "Alice C");
    }

    #[test]
    fn replaying_the_same_snapshot_is_a_no_op() {
        let conn = setup_conn();
        let repos = SqliteRepositories::new(&conn);
        let mut ctx = MergeContext::new(&repos, "g1", None, 0);
        handle(&mut ctx, vec![snapshot("t1", 10, "Alice A")]).unwrap();
        let first = repos.profiles().get("g1", "alice").unwrap();

        handle(&mut ctx, vec![snapshot("t1", 10, "Alice A")]).unwrap();
        handle(
            &mut ctx,
            vec![snapshot("t1", 10, "Alice A"), snapshot("t1", 10, "Alice A")],
        )
        .unwrap();

        assert_eq!(repos.profiles().get("g1", "alice").unwrap(), first);
        assert_eq!(ctx.report.promoted, 0);
    }
}
