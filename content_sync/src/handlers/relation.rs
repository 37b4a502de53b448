use super::MergeContext;
use crate::content::{Envelope, RelationContent};
use crate::database::models::{RelationRecord, RelationSummaryRecord};
use crate::database::repositories::RelationRepository;
use anyhow::Result;

/// Appends every event to the relation log and folds it into the current
/// follow/block state. An undo flips the value instead of removing the row.
pub fn handle(ctx: &mut MergeContext<'_>, items: Vec<Envelope<RelationContent>>) -> Result<()> {
    let repos = ctx.repos;
    let relations = repos.relations();
    for item in items {
        if item.publisher == item.body.to {
            tracing::debug!(trx_id = %item.trx_id, "ignoring self relation");
            ctx.report.skipped += 1;
            continue;
        }
        let appended = relations.append(&RelationRecord {
            group_id: ctx.group_id.to_string(),
            trx_id: item.trx_id.clone(),
            from_publisher: item.publisher.clone(),
            to_publisher: item.body.to.clone(),
            kind: item.body.kind.as_str().to_string(),
            timestamp: item.timestamp,
        })?;
        if !appended {
            continue;
        }
        let (relation, value) = item.body.kind.resolve();
        relations.apply_summary(&RelationSummaryRecord {
            group_id: ctx.group_id.to_string(),
            from_publisher: item.publisher,
            to_publisher: item.body.to,
            relation: relation.to_string(),
            value,
            trx_id: item.trx_id,
            timestamp: item.timestamp,
        })?;
    }
    Ok(())
}
