use super::MergeContext;
use crate::content::{ContentStatus, Envelope, ImageContent};
use crate::database::models::ImageRecord;
use crate::database::repositories::ImageRepository;
use anyhow::Result;

pub fn handle(ctx: &mut MergeContext<'_>, items: Vec<Envelope<ImageContent>>) -> Result<()> {
    let repos = ctx.repos;
    let images = repos.images();
    for item in items {
        if let Some(existing) = images.get(ctx.group_id, &item.trx_id)? {
            if existing.status == ContentStatus::Syncing && item.status == ContentStatus::Synced {
                images.set_status(ctx.group_id, &item.trx_id, ContentStatus::Synced)?;
                ctx.report.promoted += 1;
            }
            continue;
        }
        images.insert(&ImageRecord {
            group_id: ctx.group_id.to_string(),
            trx_id: item.trx_id,
            publisher: item.publisher,
            object_id: item.body.object_id,
            name: item.body.name,
            media_type: item.body.media_type,
            size_bytes: item.body.size_bytes,
            timestamp: item.timestamp,
            status: item.status,
        })?;
    }
    Ok(())
}
