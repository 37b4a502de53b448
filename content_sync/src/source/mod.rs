//! Client side of the node's content log API.

mod http;

pub use http::HttpContentSource;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One record of a group's append-only content log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub trx_id: String,
    pub group_id: String,
    pub publisher: String,
    pub type_url: TypeUrl,
    pub timestamp: i64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeUrl {
    Post,
    Comment,
    Profile,
    Counter,
    Relation,
    Image,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub num: usize,
    /// Resume after this trx. `None` starts from the beginning of the log.
    pub start_trx: Option<String>,
    pub include_start_trx: bool,
}

impl FetchOptions {
    pub fn page_after(start_trx: Option<String>, num: usize) -> Self {
        Self {
            num,
            start_trx,
            include_start_trx: false,
        }
    }

    /// Targeted lookup of a single trx by id.
    pub fn single(trx_id: &str) -> Self {
        Self {
            num: 1,
            start_trx: Some(trx_id.to_string()),
            include_start_trx: true,
        }
    }
}

/// Failures talking to the node. All of them are retried on a later tick.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request to content source timed out")]
    Timeout,
    #[error("content source unreachable: {0}")]
    Network(String),
    #[error("content source returned status {0}")]
    Status(u16),
    #[error("failed to decode content source response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch_contents(
        &self,
        group_id: &str,
        options: &FetchOptions,
    ) -> Result<Vec<ContentItem>, SourceError>;

    async fn list_groups(&self) -> Result<Vec<String>, SourceError>;
}
