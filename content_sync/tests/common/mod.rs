#![allow(dead_code)]

use async_trait::async_trait;
use content_sync::config::{ReconcilerConfig, SchedulerConfig};
use content_sync::database::Database;
use content_sync::pipeline::FetchPipeline;
use content_sync::projections::SyncProjections;
use content_sync::source::{ContentItem, ContentSource, FetchOptions, SourceError, TypeUrl};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory stand-in for the node API. Each group is an ordered log.
#[derive(Default)]
pub struct FakeSource {
    logs: Mutex<BTreeMap<String, Vec<ContentItem>>>,
    failing: Mutex<HashSet<String>>,
    requests: Mutex<Vec<(String, FetchOptions)>>,
    delay: Mutex<Duration>,
    redeliver: Mutex<bool>,
}

impl FakeSource {
    pub fn append(&self, item: ContentItem) {
        self.logs
            .lock()
            .unwrap()
            .entry(item.group_id.clone())
            .or_default()
            .push(item);
    }

    /// Places an item at the head of the log, behind every cursor.
    pub fn backfill(&self, item: ContentItem) {
        self.logs
            .lock()
            .unwrap()
            .entry(item.group_id.clone())
            .or_default()
            .insert(0, item);
    }

    pub fn add_group(&self, group_id: &str) {
        self.logs
            .lock()
            .unwrap()
            .entry(group_id.to_string())
            .or_default();
    }

    pub fn set_failing(&self, group_id: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(group_id.to_string());
        } else {
            set.remove(group_id);
        }
    }

    /// Every page request waits this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// The next page request ignores its cursor and returns the log from the
    /// start, the way a node redelivers after a restart.
    pub fn redeliver_next_page(&self) {
        *self.redeliver.lock().unwrap() = true;
    }

    pub fn requests(&self) -> Vec<(String, FetchOptions)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentSource for FakeSource {
    async fn fetch_contents(
        &self,
        group_id: &str,
        options: &FetchOptions,
    ) -> Result<Vec<ContentItem>, SourceError> {
        self.requests
            .lock()
            .unwrap()
            .push((group_id.to_string(), options.clone()));
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(group_id) {
            return Err(SourceError::Network("connection refused".into()));
        }
        let redeliver = !options.include_start_trx
            && std::mem::take(&mut *self.redeliver.lock().unwrap());
        let logs = self.logs.lock().unwrap();
        let Some(log) = logs.get(group_id) else {
            return Ok(Vec::new());
        };
        let start_trx = if redeliver { None } else { options.start_trx.as_ref() };
        let start = match start_trx {
            None => 0,
            Some(trx) => match log.iter().position(|item| &item.trx_id == trx) {
                Some(pos) if options.include_start_trx => pos,
                Some(pos) => pos + 1,
                None => return Ok(Vec::new()),
            },
        };
        Ok(log[start..].iter().take(options.num).cloned().collect())
    }

    async fn list_groups(&self) -> Result<Vec<String>, SourceError> {
        Ok(self.logs.lock().unwrap().keys().cloned().collect())
    }
}

pub fn item(
    group_id: &str,
    trx_id: &str,
    publisher: &str,
    type_url: TypeUrl,
    timestamp: i64,
    payload: Value,
) -> ContentItem {
    ContentItem {
        trx_id: trx_id.into(),
        group_id: group_id.into(),
        publisher: publisher.into(),
        type_url,
        timestamp,
        payload,
    }
}

pub fn post(group_id: &str, trx_id: &str, publisher: &str, timestamp: i64) -> ContentItem {
    item(
        group_id,
        trx_id,
        publisher,
        TypeUrl::Post,
        timestamp,
        json!({"content": format!("post {trx_id}")}),
    )
}

pub fn comment(
    group_id: &str,
    trx_id: &str,
    publisher: &str,
    reply_to: &str,
    timestamp: i64,
) -> ContentItem {
    item(
        group_id,
        trx_id,
        publisher,
        TypeUrl::Comment,
        timestamp,
        json!({"content": format!("comment {trx_id}"), "replyTo": reply_to}),
    )
}

pub fn pipeline(source: Arc<FakeSource>, local_publisher: Option<&str>) -> FetchPipeline {
    FetchPipeline::new(
        Database::open_in_memory().expect("database"),
        source,
        local_publisher.map(str::to_string),
        &ReconcilerConfig::default(),
        SyncProjections::new(),
    )
}

pub fn fast_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        page_size: 2,
        active_interval: Duration::from_millis(10),
        idle_interval: Duration::from_secs(10),
        jump_delay: Duration::from_millis(5),
        background_batch: 0,
        ..SchedulerConfig::default()
    }
}

/// Polls `check` until it returns true or the deadline passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..150 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
