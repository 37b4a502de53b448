use super::{ContentItem, ContentSource, FetchOptions, SourceError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// `ContentSource` backed by the node's REST API.
#[derive(Clone)]
pub struct HttpContentSource {
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct GroupsResponse {
    #[serde(default)]
    groups: Vec<GroupInfo>,
}

#[derive(Debug, Deserialize)]
struct GroupInfo {
    group_id: String,
}

impl HttpContentSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base = sanitize_base_url(base_url.into())?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base_url: base,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Appends `segments` to the base url, each percent-encoded as one segment.
    fn url(&self, segments: &[&str]) -> Result<Url, SourceError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|err| SourceError::Network(format!("invalid url: {err}")))?;
        url.path_segments_mut()
            .map_err(|()| SourceError::Network(format!("{} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }
        response
            .json::<T>()
            .await
            .map_err(|err| SourceError::Decode(err.to_string()))
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    async fn fetch_contents(
        &self,
        group_id: &str,
        options: &FetchOptions,
    ) -> Result<Vec<ContentItem>, SourceError> {
        let url = self.url(&["api", "v1", "group", group_id, "content"])?;
        let mut query = vec![
            ("num", options.num.to_string()),
            ("includestarttrx", options.include_start_trx.to_string()),
        ];
        if let Some(start) = &options.start_trx {
            query.push(("starttrx", start.clone()));
        }
        let items: Option<Vec<ContentItem>> = self.get_json(url, &query).await?;
        Ok(items.unwrap_or_default())
    }

    async fn list_groups(&self) -> Result<Vec<String>, SourceError> {
        let url = self.url(&["api", "v1", "groups"])?;
        let response: GroupsResponse = self.get_json(url, &[]).await?;
        Ok(response
            .groups
            .into_iter()
            .map(|group| group.group_id)
            .collect())
    }
}

fn classify(err: reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::Timeout
    } else if let Some(status) = err.status() {
        SourceError::Status(status.as_u16())
    } else {
        SourceError::Network(err.to_string())
    }
}

fn sanitize_base_url(raw: String) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/').to_string();
    Url::parse(&trimmed).with_context(|| format!("invalid content source url: {trimmed}"))?;
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slashes_are_stripped() {
        let source = HttpContentSource::new("http://127.0.0.1:8002///").unwrap();
        assert_eq!(source.base_url(), "http://127.0.0.1:8002");
    }

    #[test]
    fn rejects_garbage_urls() {
        assert!(HttpContentSource::new("not a url").is_err());
    }

    #[test]
    fn group_id_stays_a_single_path_segment() {
        let source = HttpContentSource::new("http://127.0.0.1:8002").unwrap();
        let url = source
            .url(&["api", "v1", "group", "a/../b?num=1#x", "content"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8002/api/v1/group/a%2F..%2Fb%3Fnum=1%23x/content"
        );
        assert_eq!(url.query(), None);
    }

    #[test]
    fn base_path_is_kept() {
        let source = HttpContentSource::new("http://127.0.0.1:8002/node/").unwrap();
        let url = source.url(&["api", "v1", "groups"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8002/node/api/v1/groups");
    }
}
