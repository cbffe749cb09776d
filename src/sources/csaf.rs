//! CSAF v2 advisory feed.
//!
//! The feed root publishes three CSV indexes of `"<path>.json","<timestamp>"`
//! rows: `changes.csv` (last modification), `releases.csv` (first release) and
//! `deletions.csv` (withdrawn documents). The effective index is the newest
//! timestamp per path from the first two, minus everything in the third.

use super::{FeedRecord, UpstreamSource};
use crate::error::{MirrorError, Result};
use crate::normalizer::parse_timestamp;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{StreamExt, TryStreamExt, stream};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

const SOURCE_NAME: &str = "CSAF";
const DOCUMENT_CONCURRENCY: usize = 8;

pub struct CsafSource {
    client: ClientWithMiddleware,
    base_url: String,
}

impl CsafSource {
    /// Create a source reading the feed rooted at `base_url`.
    pub fn new(base_url: impl Into<String>, max_retries: u32) -> Result<Self> {
        let base_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        let client = ClientBuilder::new(base_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Ok(Self { client, base_url })
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(MirrorError::source_fetch(
                SOURCE_NAME,
                format!("{url}: HTTP {}", response.status()),
            ));
        }
        Ok(response.text().await?)
    }

    async fn fetch_index(&self, file: &str) -> Result<BTreeMap<String, DateTime<Utc>>> {
        let url = format!("{}{file}", self.base_url);
        let body = self.get_text(&url).await?;
        Ok(parse_index(&body))
    }

    /// Current effective index: path to newest timestamp.
    pub async fn index(&self) -> Result<BTreeMap<String, DateTime<Utc>>> {
        let changes = self.fetch_index("changes.csv").await?;
        let releases = self.fetch_index("releases.csv").await?;
        let deletions = self.fetch_index("deletions.csv").await?;

        let mut merged = changes;
        for (path, timestamp) in releases {
            merged
                .entry(path)
                .and_modify(|existing| {
                    if timestamp > *existing {
                        *existing = timestamp;
                    }
                })
                .or_insert(timestamp);
        }
        for path in deletions.keys() {
            merged.remove(path);
        }

        Ok(merged)
    }
}

#[async_trait]
impl UpstreamSource for CsafSource {
    async fn fetch(&self, since: Option<DateTime<Utc>>) -> Result<Vec<FeedRecord>> {
        let index = self.index().await?;

        let mut pending: Vec<(String, DateTime<Utc>)> = index
            .into_iter()
            .filter(|(_, timestamp)| since.is_none_or(|since| *timestamp >= since))
            .collect();
        pending.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        info!(
            "Found {} CSAF documents to fetch since {:?}",
            pending.len(),
            since
        );

        // Any failure aborts the batch so the cursor never passes an unfetched document.
        let records: Vec<FeedRecord> = stream::iter(pending)
            .map(|(path, timestamp)| async move {
                let url = format!("{}{path}", self.base_url);
                debug!("Fetching {}", url);
                let payload = self.get_text(&url).await?;
                Ok::<_, MirrorError>(FeedRecord {
                    id: path,
                    timestamp,
                    payload,
                })
            })
            .buffered(DOCUMENT_CONCURRENCY)
            .try_collect()
            .await?;

        info!("Fetched {} CSAF documents", records.len());
        Ok(records)
    }

    fn name(&self) -> &str {
        SOURCE_NAME
    }
}

fn parse_index(body: &str) -> BTreeMap<String, DateTime<Utc>> {
    let mut entries = BTreeMap::new();
    for line in body.lines() {
        let Some((path, timestamp)) = line.split_once(',') else {
            continue;
        };
        let path = path.trim().trim_matches('"');
        let timestamp = timestamp.trim().trim_matches('"');
        if !path.ends_with(".json") {
            continue;
        }
        match parse_timestamp(timestamp) {
            Ok(parsed) => {
                entries.insert(path.to_string(), parsed);
            }
            Err(e) => warn!("Skipping index row for {}: {}", path, e),
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_csv(server: &MockServer, name: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
            .mount(server)
            .await;
    }

    async fn mount_doc(server: &MockServer, doc_path: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/{doc_path}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
            .mount(server)
            .await;
    }

    #[test]
    fn test_parse_index_skips_non_documents() {
        let index = parse_index(
            "\"2024/rhsa-2024_0001.json\",\"2024-01-02T03:04:05+00:00\"\n\
             \"index.txt\",\"2024-01-02T03:04:05+00:00\"\n\
             garbage\n\
             \"2024/rhba-2024_0002.json\",\"not a date\"\n",
        );
        assert_eq!(index.len(), 1);
        assert_eq!(
            index["2024/rhsa-2024_0001.json"],
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
        );
    }

    #[tokio::test]
    async fn test_fetch_merges_indexes_and_filters_since() {
        let server = MockServer::start().await;
        mount_csv(
            &server,
            "changes.csv",
            "\"2024/rhsa-2024_0001.json\",\"2024-03-01T00:00:00+00:00\"\n\
             \"2024/rhsa-2024_0002.json\",\"2024-01-01T00:00:00+00:00\"\n",
        )
        .await;
        mount_csv(
            &server,
            "releases.csv",
            "\"2024/rhsa-2024_0001.json\",\"2024-02-01T00:00:00+00:00\"\n\
             \"2024/rhba-2024_0003.json\",\"2024-02-15T00:00:00+00:00\"\n\
             \"2024/rhea-2024_0004.json\",\"2024-02-20T00:00:00+00:00\"\n",
        )
        .await;
        mount_csv(
            &server,
            "deletions.csv",
            "\"2024/rhea-2024_0004.json\",\"2024-02-21T00:00:00+00:00\"\n",
        )
        .await;
        mount_doc(&server, "2024/rhsa-2024_0001.json", "{\"doc\":1}").await;
        mount_doc(&server, "2024/rhba-2024_0003.json", "{\"doc\":3}").await;

        let source = CsafSource::new(server.uri(), 0).unwrap();
        let since = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let records = source.fetch(Some(since)).await.unwrap();

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["2024/rhba-2024_0003.json", "2024/rhsa-2024_0001.json"]);
        assert_eq!(
            records[1].timestamp,
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(records[1].payload, "{\"doc\":1}");
    }

    #[tokio::test]
    async fn test_document_failure_fails_batch() {
        let server = MockServer::start().await;
        mount_csv(
            &server,
            "changes.csv",
            "\"2024/rhsa-2024_0001.json\",\"2024-03-01T00:00:00+00:00\"\n",
        )
        .await;
        mount_csv(&server, "releases.csv", "").await;
        mount_csv(&server, "deletions.csv", "").await;
        Mock::given(method("GET"))
            .and(path("/2024/rhsa-2024_0001.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = CsafSource::new(server.uri(), 0).unwrap();
        let err = source.fetch(None).await.unwrap_err();
        assert!(matches!(err, MirrorError::SourceFetch { .. }));
        assert!(err.is_retryable());
    }
}
