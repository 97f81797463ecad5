use crate::types::{FeedSource, RawEntry};
use async_trait::async_trait;
use feed_rs::parser;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

const USER_AGENT: &str = "newsbrief/0.1";
const FETCH_TIMEOUT_SECS: u64 = 30;

/// Seam for pulling entries from a feed endpoint. Implementations never
/// surface errors: a failed source yields an empty batch and a log line, so
/// one broken upstream cannot abort a pipeline pass.
#[async_trait]
pub trait FeedClient: Send + Sync {
    async fn fetch(&self, source: &FeedSource) -> Vec<RawEntry>;
}

/// HTTP feed client: retrieves the source URL (optionally authenticated) and
/// parses the response as RSS/Atom.
pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new() -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    async fn fetch_inner(&self, source: &FeedSource) -> crate::types::Result<Vec<RawEntry>> {
        Url::parse(&source.url)?;

        let mut request = self.client.get(&source.url);
        if let Some(key) = source.access_key.as_deref().filter(|k| !k.is_empty()) {
            // Upstream APIs disagree on the credential header; send both.
            request = request.header("Authorization", key).header("X-API-Key", key);
        }

        let response = request.send().await?.error_for_status()?;
        let bytes = response.bytes().await?;

        let feed = parser::parse(bytes.as_ref())
            .map_err(|e| crate::types::PipelineError::Parse(e.to_string()))?;

        let entries: Vec<RawEntry> = feed.entries.into_iter().map(normalize_entry).collect();
        info!(
            "Fetched {} entries from source '{}'",
            entries.len(),
            source.name
        );
        Ok(entries)
    }
}

impl Default for FeedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedClient for FeedFetcher {
    async fn fetch(&self, source: &FeedSource) -> Vec<RawEntry> {
        match self.fetch_inner(source).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("Error fetching feed {}: {}", source.url, e);
                Vec::new()
            }
        }
    }
}

fn normalize_entry(entry: feed_rs::model::Entry) -> RawEntry {
    let link = entry
        .links
        .first()
        .map(|l| l.href.clone())
        .unwrap_or_default();
    let title = entry.title.as_ref().map(|t| t.content.clone());

    let author = extract_author(&entry);
    let published = entry.published;
    let description = entry.content.and_then(|c| c.body);
    let summary = entry.summary.map(|s| s.content);

    RawEntry {
        link,
        title: title.unwrap_or_default(),
        author,
        published,
        description,
        summary,
    }
}

type AuthorExtractor = fn(&feed_rs::model::Entry) -> Option<String>;

/// Author fields vary wildly between feeds; try each known origin in priority
/// order and take the first non-empty hit.
const AUTHOR_EXTRACTORS: &[AuthorExtractor] = &[author_from_authors, author_from_contributors];

fn extract_author(entry: &feed_rs::model::Entry) -> Option<String> {
    AUTHOR_EXTRACTORS.iter().find_map(|extract| {
        extract(entry)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
    })
}

fn author_from_authors(entry: &feed_rs::model::Entry) -> Option<String> {
    entry.authors.first().map(|p| p.name.clone())
}

fn author_from_contributors(entry: &feed_rs::model::Entry) -> Option<String> {
    entry.contributors.first().map(|p| p.name.clone())
}

/// Fixed-entry feed client for tests and offline demos.
pub struct StaticFeedClient {
    batches: std::collections::HashMap<String, Vec<RawEntry>>,
}

impl StaticFeedClient {
    pub fn new() -> Self {
        Self {
            batches: std::collections::HashMap::new(),
        }
    }

    /// Serve `entries` for any source whose URL equals `url`.
    pub fn with_entries(mut self, url: &str, entries: Vec<RawEntry>) -> Self {
        self.batches.insert(url.to_string(), entries);
        self
    }
}

impl Default for StaticFeedClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedClient for StaticFeedClient {
    async fn fetch(&self, source: &FeedSource) -> Vec<RawEntry> {
        match self.batches.get(&source.url) {
            Some(entries) => entries.clone(),
            None => {
                debug!("No static entries configured for {}", source.url);
                Vec::new()
            }
        }
    }
}
