//! Chases trx ids that something referenced before we had them. Each
//! pipeline run looks up a small batch of outstanding markers, fewest
//! attempts first, with a bounded targeted fetch per marker. Misses are
//! counted and a marker is dropped after `max_attempts`.

use crate::config::ReconcilerConfig;
use crate::database::repositories::{EmptyTrxRepository, SyncCursorRepository};
use crate::database::Database;
use crate::pipeline::merge_items;
use crate::source::{ContentSource, FetchOptions};
use crate::utils::now_utc_iso;
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub resolved: Vec<String>,
    pub retrying: Vec<String>,
    pub abandoned: Vec<String>,
}

#[derive(Clone)]
pub struct Reconciler {
    database: Database,
    source: Arc<dyn ContentSource>,
    local_publisher: Option<String>,
    /// Zero keeps retrying forever.
    max_attempts: u32,
    batch_size: usize,
    lookup_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        database: Database,
        source: Arc<dyn ContentSource>,
        local_publisher: Option<String>,
        config: &ReconcilerConfig,
    ) -> Self {
        Self {
            database,
            source,
            local_publisher,
            max_attempts: config.max_attempts,
            batch_size: config.batch_size.max(1),
            lookup_timeout: config.lookup_timeout,
        }
    }

    /// Works through up to `batch_size` markers of `group_id`. Never fails:
    /// errors are logged and count as a missed attempt.
    #[tracing::instrument(level = "info", name = "reconcile", skip(self))]
    pub async fn run(&self, group_id: &str) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        let markers = match self
            .database
            .with_repositories(|repos| repos.empty_trx().list_for_group(group_id))
        {
            Ok(markers) => markers,
            Err(err) => {
                tracing::warn!(group_id = %group_id, error = ?err, "failed to load empty trx markers");
                return outcome;
            }
        };

        for marker in markers.into_iter().take(self.batch_size) {
            let trx_id = marker.trx_id;
            let resolved = match self.try_resolve(group_id, &trx_id).await {
                Ok(resolved) => resolved,
                Err(err) => {
                    tracing::debug!(group_id = %group_id, trx_id = %trx_id, error = ?err, "empty trx lookup failed");
                    false
                }
            };
            if resolved {
                tracing::info!(group_id = %group_id, trx_id = %trx_id, "resolved empty trx");
                outcome.resolved.push(trx_id);
                continue;
            }
            match self.record_miss(group_id, &trx_id) {
                Ok(true) => {
                    tracing::warn!(
                        group_id = %group_id,
                        trx_id = %trx_id,
                        max_attempts = self.max_attempts,
                        "giving up on empty trx"
                    );
                    outcome.abandoned.push(trx_id);
                }
                Ok(false) => outcome.retrying.push(trx_id),
                Err(err) => {
                    tracing::warn!(group_id = %group_id, trx_id = %trx_id, error = ?err, "failed to record empty trx attempt");
                    outcome.retrying.push(trx_id);
                }
            }
        }
        outcome
    }

    async fn try_resolve(&self, group_id: &str, trx_id: &str) -> Result<bool> {
        let opts = FetchOptions::single(trx_id);
        let lookup = self.source.fetch_contents(group_id, &opts);
        let items = tokio::time::timeout(self.lookup_timeout, lookup)
            .await
            .map_err(|_| anyhow!("targeted fetch of {trx_id} timed out"))?
            .with_context(|| format!("targeted fetch of {trx_id} failed"))?;
        let Some(item) = items.into_iter().next() else {
            return Ok(false);
        };
        if item.trx_id != trx_id {
            tracing::debug!(
                group_id = %group_id,
                wanted = %trx_id,
                got = %item.trx_id,
                "log returned a different trx at the marker position"
            );
            return Ok(false);
        }

        let local_publisher = self.local_publisher.as_deref();
        self.database.with_transaction(|repos| {
            let report = merge_items(
                &repos,
                group_id,
                local_publisher,
                std::slice::from_ref(&item),
                Vec::new(),
            )?;
            repos.empty_trx().remove(group_id, trx_id)?;
            let now = now_utc_iso();
            let entry = format!(
                "{now} resolved {trx_id} (+{} posts, +{} comments)",
                report.new_posts, report.new_comments,
            );
            repos
                .cursors()
                .record_backfill(group_id, &now, report.unread_delta, &entry)?;
            Ok(())
        })?;
        Ok(true)
    }

    /// Returns true when the marker was abandoned.
    fn record_miss(&self, group_id: &str, trx_id: &str) -> Result<bool> {
        let max_attempts = self.max_attempts;
        self.database.with_transaction(|repos| {
            let attempts = repos
                .empty_trx()
                .record_attempt(group_id, trx_id, &now_utc_iso())?;
            if max_attempts > 0 && attempts >= max_attempts {
                repos.empty_trx().remove(group_id, trx_id)?;
                return Ok(true);
            }
            Ok(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ContentItem, SourceError, TypeUrl};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct StubSource {
        items: Vec<ContentItem>,
        delay: Duration,
        lookups: Mutex<Vec<String>>,
    }

    impl StubSource {
        fn new(items: Vec<ContentItem>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                items,
                delay,
                lookups: Mutex::new(Vec::new()),
            })
        }

        fn lookups(&self) -> Vec<String> {
            self.lookups.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ContentSource for StubSource {
        async fn fetch_contents(
            &self,
            _group_id: &str,
            options: &FetchOptions,
        ) -> Result<Vec<ContentItem>, SourceError> {
            let wanted = options.start_trx.clone().unwrap_or_default();
            self.lookups.lock().unwrap().push(wanted.clone());
            tokio::time::sleep(self.delay).await;
            Ok(self
                .items
                .iter()
                .filter(|item| item.trx_id == wanted)
                .cloned()
                .collect())
        }

        async fn list_groups(&self) -> Result<Vec<String>, SourceError> {
            Ok(vec!["g1".into()])
        }
    }

    fn config(batch_size: usize, lookup_timeout: Duration) -> ReconcilerConfig {
        ReconcilerConfig {
            max_attempts: 10,
            batch_size,
            lookup_timeout,
        }
    }

    fn seed_markers(database: &Database, ids: &[&str]) {
        database
            .with_repositories(|repos| {
                for id in ids {
                    repos.empty_trx().insert("g1", id)?;
                }
                Ok(())
            })
            .unwrap();
    }

    #[tokio::test]
    async fn each_run_chases_a_small_batch_fewest_attempts_first() {
        let database = Database::open_in_memory().unwrap();
        seed_markers(&database, &["m1", "m2", "m3", "m4", "m5"]);
        let source = StubSource::new(Vec::new(), Duration::ZERO);
        let reconciler = Reconciler::new(
            database.clone(),
            source.clone(),
            None,
            &config(2, Duration::from_secs(1)),
        );

        let first = reconciler.run("g1").await;
        assert_eq!(first.retrying, vec!["m1", "m2"]);
        let second = reconciler.run("g1").await;
        assert_eq!(second.retrying, vec!["m3", "m4"]);
        let third = reconciler.run("g1").await;
        assert_eq!(third.retrying, vec!["m5", "m1"]);
        assert_eq!(source.lookups().len(), 6);
    }

    #[tokio::test]
    async fn slow_lookup_is_cut_off_and_counted_as_a_miss() {
        let database = Database::open_in_memory().unwrap();
        seed_markers(&database, &["m1", "m2", "m3", "m4"]);
        let source = StubSource::new(Vec::new(), Duration::from_secs(30));
        let reconciler = Reconciler::new(
            database.clone(),
            source,
            None,
            &config(2, Duration::from_millis(20)),
        );

        let started = std::time::Instant::now();
        let outcome = reconciler.run("g1").await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(outcome.retrying.len(), 2);
        let attempts: Vec<u32> = database
            .with_repositories(|repos| repos.empty_trx().list_for_group("g1"))
            .unwrap()
            .into_iter()
            .map(|marker| marker.attempts)
            .collect();
        assert_eq!(attempts, vec![0, 0, 1, 1]);
    }

    #[tokio::test]
    async fn resolved_post_counts_as_unread_without_moving_the_cursor() {
        let database = Database::open_in_memory().unwrap();
        database
            .with_repositories(|repos| {
                repos.cursors().record_merge("g1", "t5", "then", 0, "merged")?;
                repos.empty_trx().insert("g1", "p9")?;
                Ok(())
            })
            .unwrap();
        let missing = ContentItem {
            trx_id: "p9".into(),
            group_id: "g1".into(),
            publisher: "bob".into(),
            type_url: TypeUrl::Post,
            timestamp: 1,
            payload: json!({"content": "late"}),
        };
        let source = StubSource::new(vec![missing], Duration::ZERO);
        let reconciler = Reconciler::new(
            database.clone(),
            source,
            Some("me".into()),
            &ReconcilerConfig::default(),
        );

        let outcome = reconciler.run("g1").await;
        assert_eq!(outcome.resolved, vec!["p9"]);
        let cursor = database
            .with_repositories(|repos| repos.cursors().get("g1"))
            .unwrap()
            .unwrap();
        assert_eq!(cursor.latest_trx_id.as_deref(), Some("t5"));
        assert_eq!(cursor.unread_count, 1);
        assert!(cursor.log_tail[0].contains("resolved p9"));
    }
}
