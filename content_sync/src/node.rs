use crate::bootstrap::{self, BootstrapResources};
use crate::config::SyncConfig;
use crate::database::models::{PendingTrxRecord, SyncCursorRecord};
use crate::database::repositories::SyncCursorRepository;
use crate::database::Database;
use crate::handlers::MergeReport;
use crate::pending;
use crate::pipeline::FetchPipeline;
use crate::projections::SyncProjections;
use crate::push::{PushAccelerator, PushState};
use crate::scheduler::Scheduler;
use crate::source::{ContentItem, ContentSource, HttpContentSource};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;

/// Owns every sync component for one process: the cache, the pipeline, the
/// scheduler loops and the optional push channel.
pub struct SyncNode {
    config: SyncConfig,
    bootstrap: BootstrapResources,
    scheduler: Scheduler,
    push: Option<PushAccelerator>,
}

impl SyncNode {
    /// Bootstraps storage and wires the HTTP content source. Polling does not
    /// begin until [`SyncNode::start_sync`].
    pub async fn start(config: SyncConfig) -> Result<Self> {
        let source = HttpContentSource::new(&config.api_url)
            .with_context(|| format!("invalid content source url {}", config.api_url))?;
        Self::with_source(config, Arc::new(source)).await
    }

    pub async fn with_source(config: SyncConfig, source: Arc<dyn ContentSource>) -> Result<Self> {
        let bootstrap = bootstrap::initialize(&config).await?;
        let pipeline = FetchPipeline::new(
            bootstrap.database.clone(),
            source,
            config.groups.local_publisher.clone(),
            &config.reconciler,
            SyncProjections::new(),
        );
        let scheduler = Scheduler::new(pipeline, config.scheduler.clone(), &config.groups);

        tracing::info!(
            directories_created = ?bootstrap.directories_created,
            database_initialized = bootstrap.database_initialized,
            api_url = %config.api_url,
            groups = ?config.groups.initial_groups,
            "content sync node initialized"
        );

        Ok(Self {
            config,
            bootstrap,
            scheduler,
            push: None,
        })
    }

    /// Starts the polling loops and, when configured, the push channel.
    pub fn start_sync(&mut self) -> Result<()> {
        self.scheduler.start()?;
        if self.push.is_none() {
            if let Some(push) = &self.config.push {
                self.push = Some(PushAccelerator::spawn(push.clone(), self.scheduler.clone()));
            }
        }
        Ok(())
    }

    /// Stops every loop. In-flight merges finish or roll back first.
    pub async fn shutdown(mut self) {
        if let Some(push) = self.push.take() {
            push.shutdown().await;
        }
        self.scheduler.stop().await;
    }

    /// Adopts the node's group list when none was configured.
    pub async fn discover_groups(&self) -> Result<Vec<String>> {
        let groups = self
            .pipeline()
            .source()
            .list_groups()
            .await
            .context("failed to list groups")?;
        self.bootstrap.database.with_repositories(|repos| {
            for group_id in &groups {
                repos.cursors().ensure(group_id)?;
            }
            Ok(())
        })?;
        self.scheduler.set_groups(groups.clone());
        tracing::info!(groups = ?groups, "discovered groups");
        Ok(groups)
    }

    pub async fn fetch_once(&self, group_id: &str) -> Result<MergeReport> {
        self.pipeline()
            .fetch_group(group_id, self.config.scheduler.page_size)
            .await
    }

    pub fn submit_local(&self, item: &ContentItem) -> Result<MergeReport> {
        let report = pending::submit_local(
            self.database(),
            self.config.groups.local_publisher.as_deref(),
            item,
        )?;
        self.projections().refresh(self.database(), &item.group_id)?;
        Ok(report)
    }

    pub fn list_pending(&self, group_id: &str) -> Result<Vec<PendingTrxRecord>> {
        pending::list_pending(self.database(), group_id)
    }

    pub fn mark_group_read(&self, group_id: &str) -> Result<()> {
        self.projections().mark_group_read(self.database(), group_id)
    }

    pub fn mark_notifications_read(&self, group_id: &str) -> Result<()> {
        self.projections()
            .mark_notifications_read(self.database(), group_id)
    }

    pub fn cursors(&self) -> Result<Vec<SyncCursorRecord>> {
        self.database()
            .with_repositories(|repos| repos.cursors().list())
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.bootstrap.database
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn pipeline(&self) -> &FetchPipeline {
        self.scheduler.pipeline()
    }

    pub fn projections(&self) -> &SyncProjections {
        self.pipeline().projections()
    }

    /// `None` when no push url is configured or sync has not started.
    pub fn push_state(&self) -> Option<watch::Receiver<PushState>> {
        self.push.as_ref().map(PushAccelerator::state)
    }
}
