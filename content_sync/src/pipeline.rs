//! One poll of one group: fetch the page after the cursor, normalize it,
//! fold it (plus any optimistic local writes) into the cache inside a single
//! transaction, then advance the cursor.

use crate::config::ReconcilerConfig;
use crate::content::{decode, ContentStatus, TypedContent};
use crate::database::repositories::{
    PendingTrxRepository, SqliteRepositories, SyncCursorRepository,
};
use crate::database::Database;
use crate::handlers::{merge_batch, MergeContext, MergeReport};
use crate::projections::SyncProjections;
use crate::reconciler::Reconciler;
use crate::source::{ContentItem, ContentSource, FetchOptions};
use crate::utils::{now_nanos, now_utc_iso};
use anyhow::{anyhow, Context, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

#[derive(Clone)]
pub struct FetchPipeline {
    database: Database,
    source: Arc<dyn ContentSource>,
    local_publisher: Option<String>,
    reconciler: Reconciler,
    projections: SyncProjections,
    group_locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl FetchPipeline {
    pub fn new(
        database: Database,
        source: Arc<dyn ContentSource>,
        local_publisher: Option<String>,
        reconciler: &ReconcilerConfig,
        projections: SyncProjections,
    ) -> Self {
        let reconciler = Reconciler::new(
            database.clone(),
            source.clone(),
            local_publisher.clone(),
            reconciler,
        );
        Self {
            database,
            source,
            local_publisher,
            reconciler,
            projections,
            group_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn source(&self) -> Arc<dyn ContentSource> {
        self.source.clone()
    }

    pub fn projections(&self) -> &SyncProjections {
        &self.projections
    }

    pub fn local_publisher(&self) -> Option<&str> {
        self.local_publisher.as_deref()
    }

    /// Fetches and merges the next page for `group_id`. An empty report
    /// (`fetched == 0`) means the group is saturated. On error nothing is
    /// merged and the cursor stays where it was.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn fetch_group(&self, group_id: &str, page_size: usize) -> Result<MergeReport> {
        let lock = self.group_lock(group_id)?;
        let _guard = lock.lock().await;

        let cursor = self
            .database
            .with_repositories(|repos| repos.cursors().get(group_id))?;
        let start_trx = cursor.and_then(|cursor| cursor.latest_trx_id);
        let options = FetchOptions::page_after(start_trx, page_size);
        let page = self
            .source
            .fetch_contents(group_id, &options)
            .await
            .with_context(|| format!("failed to fetch contents for group {group_id}"))?;

        let report = if page.is_empty() {
            tracing::debug!(group_id = %group_id, "no new content");
            MergeReport {
                group_id: group_id.to_string(),
                ..MergeReport::default()
            }
        } else {
            let report = self.commit_page(group_id, page)?;
            tracing::info!(
                group_id = %group_id,
                fetched = report.fetched,
                new_posts = report.new_posts,
                new_comments = report.new_comments,
                deferred = report.deferred,
                skipped = report.skipped,
                latest_trx_id = ?report.latest_trx_id,
                "merged content page"
            );
            report
        };

        self.reconciler.run(group_id).await;
        if let Err(err) = self.projections.refresh(&self.database, group_id) {
            tracing::warn!(group_id = %group_id, error = ?err, "failed to refresh projections");
        }
        Ok(report)
    }

    fn commit_page(&self, group_id: &str, page: Vec<ContentItem>) -> Result<MergeReport> {
        let page = normalize_page(page);
        let Some(latest_trx_id) = page.last().map(|item| item.trx_id.clone()) else {
            return Ok(MergeReport {
                group_id: group_id.to_string(),
                ..MergeReport::default()
            });
        };
        let local_publisher = self.local_publisher.as_deref();

        self.database.with_transaction(|repos| {
            let pending = reconcile_pending(&repos, group_id, &page)?;
            let mut report = merge_items(&repos, group_id, local_publisher, &page, pending)?;
            let now = now_utc_iso();
            let entry = format!(
                "{now} merged {} items (+{} posts, +{} comments, {} deferred, {} skipped) up to {latest_trx_id}",
                report.fetched, report.new_posts, report.new_comments, report.deferred, report.skipped,
            );
            repos.cursors().record_merge(
                group_id,
                &latest_trx_id,
                &now,
                report.unread_delta,
                &entry,
            )?;
            report.latest_trx_id = Some(latest_trx_id.clone());
            Ok(report)
        })
    }

    fn group_lock(&self, group_id: &str) -> Result<Arc<AsyncMutex<()>>> {
        let mut locks = self
            .group_locks
            .lock()
            .map_err(|_| anyhow!("group lock table poisoned"))?;
        Ok(locks
            .entry(group_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone())
    }
}

/// Drops redelivered trx ids and orders by timestamp. The sort is stable so
/// equal timestamps keep the source's order.
pub fn normalize_page(page: Vec<ContentItem>) -> Vec<ContentItem> {
    let mut seen = HashSet::new();
    let mut items: Vec<ContentItem> = page
        .into_iter()
        .filter(|item| seen.insert(item.trx_id.clone()))
        .collect();
    items.sort_by_key(|item| item.timestamp);
    items
}

/// Pending rows confirmed by this page are deleted; the fetched copy
/// promotes the cached row. The rest are replayed as `syncing`.
fn reconcile_pending(
    repos: &SqliteRepositories<'_>,
    group_id: &str,
    page: &[ContentItem],
) -> Result<Vec<TypedContent>> {
    let fetched: HashSet<&str> = page.iter().map(|item| item.trx_id.as_str()).collect();
    let mut replay = Vec::new();
    for row in repos.pending().list_for_group(group_id)? {
        if fetched.contains(row.trx_id.as_str()) {
            repos.pending().remove(group_id, &row.trx_id)?;
            tracing::debug!(group_id = %group_id, trx_id = %row.trx_id, "pending trx confirmed");
            continue;
        }
        let item: ContentItem = match serde_json::from_str(&row.item_json) {
            Ok(item) => item,
            Err(err) => {
                tracing::warn!(trx_id = %row.trx_id, error = %err, "unreadable pending trx");
                continue;
            }
        };
        match decode(&item, ContentStatus::Syncing) {
            Ok(typed) => replay.push(typed),
            Err(err) => tracing::warn!(trx_id = %row.trx_id, error = %err, "undecodable pending trx"),
        }
    }
    Ok(replay)
}

/// Decodes `fetched` as synced content and merges it together with any
/// already-decoded local items. Undecodable items are logged and skipped.
pub(crate) fn merge_items(
    repos: &SqliteRepositories<'_>,
    group_id: &str,
    local_publisher: Option<&str>,
    fetched: &[ContentItem],
    local: Vec<TypedContent>,
) -> Result<MergeReport> {
    let mut typed = Vec::with_capacity(fetched.len() + local.len());
    let mut skipped = 0;
    for item in fetched {
        match decode(item, ContentStatus::Synced) {
            Ok(content) => typed.push(content),
            Err(err) => {
                tracing::warn!(group_id = %group_id, error = %err, "skipping undecodable item");
                skipped += 1;
            }
        }
    }
    typed.extend(local);

    let mut ctx = MergeContext::new(repos, group_id, local_publisher, now_nanos());
    merge_batch(&mut ctx, typed)?;
    let mut report = ctx.report;
    report.fetched = fetched.len();
    report.skipped += skipped;
    Ok(report)
}
