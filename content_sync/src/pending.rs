//! Optimistic local writes. A trx the local identity just published is
//! shown straight away as `syncing` and confirmed once the remote log
//! returns it.

use crate::content::{decode, ContentStatus};
use crate::database::models::PendingTrxRecord;
use crate::database::repositories::PendingTrxRepository;
use crate::database::Database;
use crate::handlers::{merge_batch, MergeContext, MergeReport};
use crate::source::ContentItem;
use crate::utils::{now_nanos, now_utc_iso};
use anyhow::{Context, Result};

/// Records `item` as pending and merges it as `syncing` in one transaction.
pub fn submit_local(
    database: &Database,
    local_publisher: Option<&str>,
    item: &ContentItem,
) -> Result<MergeReport> {
    let typed = decode(item, ContentStatus::Syncing)
        .with_context(|| format!("cannot submit trx {}", item.trx_id))?;
    let item_json = serde_json::to_string(item)?;
    let group_id = item.group_id.as_str();

    let report = database.with_transaction(|repos| {
        repos.pending().insert(&PendingTrxRecord {
            group_id: group_id.to_string(),
            trx_id: item.trx_id.clone(),
            item_json,
            created_at: now_utc_iso(),
        })?;
        let mut ctx = MergeContext::new(&repos, group_id, local_publisher, now_nanos());
        merge_batch(&mut ctx, vec![typed])?;
        Ok(ctx.report)
    })?;
    tracing::info!(group_id = %group_id, trx_id = %item.trx_id, "submitted local trx");
    Ok(report)
}

pub fn list_pending(database: &Database, group_id: &str) -> Result<Vec<PendingTrxRecord>> {
    database.with_repositories(|repos| repos.pending().list_for_group(group_id))
}
