use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub api_url: String,
    pub paths: SyncPaths,
    pub groups: GroupConfig,
    pub scheduler: SchedulerConfig,
    pub reconciler: ReconcilerConfig,
    pub push: Option<PushConfig>,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        let paths = match env::var("CONTENT_SYNC_HOME") {
            Ok(raw) if !raw.trim().is_empty() => SyncPaths::from_base_dir(raw.trim())?,
            _ => SyncPaths::discover()?,
        };
        let api_url = env::var("CONTENT_SYNC_API_URL")
            .ok()
            .filter(|raw| !raw.trim().is_empty())
            .unwrap_or_else(|| "http://127.0.0.1:8002".to_string());
        Ok(Self {
            api_url,
            paths,
            groups: GroupConfig::from_env(),
            scheduler: SchedulerConfig::from_env(),
            reconciler: ReconcilerConfig::from_env(),
            push: PushConfig::from_env(),
        })
    }

    pub fn new(api_url: impl Into<String>, paths: SyncPaths) -> Self {
        Self {
            api_url: api_url.into(),
            paths,
            groups: GroupConfig::default(),
            scheduler: SchedulerConfig::default(),
            reconciler: ReconcilerConfig::default(),
            push: None,
        }
    }
}

/// Which groups to follow and who the local user is.
#[derive(Debug, Clone, Default)]
pub struct GroupConfig {
    pub initial_groups: Vec<String>,
    pub active_group: Option<String>,
    pub local_publisher: Option<String>,
}

impl GroupConfig {
    pub fn from_env() -> Self {
        let initial_groups = env::var("CONTENT_SYNC_GROUPS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Self {
            initial_groups,
            active_group: non_empty_var("CONTENT_SYNC_ACTIVE_GROUP"),
            local_publisher: non_empty_var("CONTENT_SYNC_LOCAL_PUBLISHER"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub page_size: usize,
    pub active_interval: Duration,
    pub idle_interval: Duration,
    pub jump_delay: Duration,
    /// Concurrent fetches per secondary-loop chunk. Zero disables the loop.
    pub background_batch: usize,
    pub background_interval: Duration,
    pub history_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            active_interval: Duration::from_millis(1_000),
            idle_interval: Duration::from_millis(10_000),
            jump_delay: Duration::from_millis(200),
            background_batch: 5,
            background_interval: Duration::from_millis(60_000),
            history_limit: 150,
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            page_size: parse_var("CONTENT_SYNC_PAGE_SIZE").unwrap_or(defaults.page_size),
            active_interval: millis_var("CONTENT_SYNC_ACTIVE_INTERVAL_MS")
                .unwrap_or(defaults.active_interval),
            idle_interval: millis_var("CONTENT_SYNC_IDLE_INTERVAL_MS")
                .unwrap_or(defaults.idle_interval),
            jump_delay: millis_var("CONTENT_SYNC_JUMP_DELAY_MS").unwrap_or(defaults.jump_delay),
            background_batch: parse_var("CONTENT_SYNC_BACKGROUND_BATCH")
                .unwrap_or(defaults.background_batch),
            background_interval: millis_var("CONTENT_SYNC_BACKGROUND_INTERVAL_MS")
                .unwrap_or(defaults.background_interval),
            history_limit: defaults.history_limit,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Targeted fetch attempts before an unresolved marker is abandoned.
    pub max_attempts: u32,
    /// Markers chased per pipeline run, fewest attempts first.
    pub batch_size: usize,
    /// Upper bound on a single targeted fetch.
    pub lookup_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            batch_size: 3,
            lookup_timeout: Duration::from_millis(2_000),
        }
    }
}

impl ReconcilerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: parse_var("CONTENT_SYNC_EMPTY_TRX_MAX_ATTEMPTS")
                .unwrap_or(defaults.max_attempts),
            batch_size: parse_var("CONTENT_SYNC_EMPTY_TRX_BATCH").unwrap_or(defaults.batch_size),
            lookup_timeout: millis_var("CONTENT_SYNC_EMPTY_TRX_TIMEOUT_MS")
                .unwrap_or(defaults.lookup_timeout),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub url: String,
    pub reconnect_delay: Duration,
}

impl PushConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: Duration::from_millis(3_000),
        }
    }

    pub fn from_env() -> Option<Self> {
        let url = non_empty_var("CONTENT_SYNC_PUSH_URL")?;
        let mut config = Self::new(url);
        if let Some(delay) = millis_var("CONTENT_SYNC_PUSH_RECONNECT_MS") {
            config.reconnect_delay = delay;
        }
        Some(config)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SyncPaths {
    pub base: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub logs_dir: PathBuf,
}

impl SyncPaths {
    pub fn discover() -> Result<Self> {
        let exe_path = std::env::current_exe()
            .map_err(|err| anyhow!("failed to resolve current executable: {err}"))?;
        let base = exe_path
            .parent()
            .ok_or_else(|| anyhow!("executable path missing parent"))?
            .to_path_buf();
        Self::from_base_dir(base)
    }

    pub fn from_base_dir<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        let data_dir = base.join("data");
        let db_path = data_dir.join("content_sync.db");
        let logs_dir = base.join("logs");

        Ok(Self {
            base,
            data_dir,
            db_path,
            logs_dir,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|raw| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|raw| raw.trim().parse().ok())
}

fn millis_var(key: &str) -> Option<Duration> {
    parse_var::<u64>(key).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_hang_off_base_dir() {
        let paths = SyncPaths::from_base_dir("/tmp/sync-home").unwrap();
        assert_eq!(paths.data_dir, PathBuf::from("/tmp/sync-home/data"));
        assert_eq!(
            paths.db_path,
            PathBuf::from("/tmp/sync-home/data/content_sync.db")
        );
    }

    #[test]
    fn scheduler_defaults_pace_idle_slower_than_active() {
        let config = SchedulerConfig::default();
        assert!(config.idle_interval > config.active_interval);
        assert!(config.active_interval > config.jump_delay);
        assert_eq!(config.background_batch, 5);
    }
}
