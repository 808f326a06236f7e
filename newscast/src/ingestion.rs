use anyhow::{Context, Result};
use common::SourceConfig;
use feed_rs::model::{Entry, Feed};
use feed_rs::parser;
use reqwest::Client;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{info, warn};

use crate::model::Article;

/// Source of the batch a run starts from.
///
/// Implementations absorb per-source failures: whatever could be fetched is
/// returned, and an empty list is a valid answer.
#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_all(&self, sources: &[SourceConfig]) -> Vec<Article>;
}

/// Retry schedule for feed downloads.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each further attempt
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
        }
    }
}

/// RSS/Atom fetcher over a caller-owned HTTP client.
pub struct HttpFeedSource {
    client: Client,
    timeout: Duration,
    delay_between_sources: Duration,
    retry: RetryPolicy,
}

impl HttpFeedSource {
    pub fn new(client: Client, timeout_secs: u64) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(timeout_secs),
            delay_between_sources: Duration::ZERO,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_source_delay(mut self, delay: Duration) -> Self {
        self.delay_between_sources = delay;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch one source and map its entries, capped at `max_articles`.
    pub async fn fetch_source(&self, source: &SourceConfig) -> Result<Vec<Article>> {
        let feed = fetch_and_parse_feed(&self.client, &source.url, self.timeout, self.retry)
            .await
            .with_context(|| format!("source '{}'", source.name))?;
        Ok(entries_to_articles(source, feed))
    }
}

#[async_trait::async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch_all(&self, sources: &[SourceConfig]) -> Vec<Article> {
        let mut articles = Vec::new();
        let enabled: Vec<&SourceConfig> = sources.iter().filter(|s| s.enabled).collect();

        for (i, source) in enabled.iter().enumerate() {
            if i > 0 && !self.delay_between_sources.is_zero() {
                tokio::time::sleep(self.delay_between_sources).await;
            }

            match self.fetch_source(source).await {
                Ok(mut fetched) => {
                    info!("Fetched {} articles from {}", fetched.len(), source.name);
                    articles.append(&mut fetched);
                }
                Err(e) => {
                    warn!("Skipping source {}: {:#}", source.name, e);
                }
            }
        }

        info!(
            "Fetched {} articles from {} sources",
            articles.len(),
            enabled.len()
        );
        articles
    }
}

/// Fetches a feed from the given URL and parses it.
/// Server errors, rate limiting and network errors are retried with
/// exponential backoff; other client errors fail immediately.
pub async fn fetch_and_parse_feed(
    client: &Client,
    url: &str,
    timeout: Duration,
    retry: RetryPolicy,
) -> Result<Feed> {
    let max_attempts = retry.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            let backoff = retry.base_backoff * 2u32.pow(attempt - 2); // 1s, 2s, 4s...
            info!(
                "Retrying feed fetch for {} (attempt {}/{}) after {:?}...",
                url, attempt, max_attempts, backoff
            );
            tokio::time::sleep(backoff).await;
        }

        match client.get(url).timeout(timeout).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let bytes = response.bytes().await.context("failed to read response body")?;
                    let feed = parser::parse(bytes.as_ref()).context("failed to parse feed")?;
                    return Ok(feed);
                } else if status.is_server_error() {
                    last_error = Some(anyhow::anyhow!("server error: {}", status));
                } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    last_error = Some(anyhow::anyhow!("rate limited: {}", status));
                } else {
                    // 4xx is permanent
                    return Err(anyhow::anyhow!("feed fetch failed with status: {}", status));
                }
            }
            Err(e) => {
                last_error = Some(anyhow::Error::new(e).context("network error during fetch"));
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("unknown error after retries")))
}

/// Map feed entries to articles. Entries without a link are dropped.
pub fn entries_to_articles(source: &SourceConfig, feed: Feed) -> Vec<Article> {
    feed.entries
        .into_iter()
        .filter_map(|entry| entry_to_article(source, entry))
        .take(source.max_articles())
        .collect()
}

fn entry_to_article(source: &SourceConfig, entry: Entry) -> Option<Article> {
    let link = entry.links.first().map(|l| l.href.trim().to_string())?;
    if link.is_empty() {
        return None;
    }

    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.trim().to_string())
        .unwrap_or_default();
    let summary = entry
        .summary
        .as_ref()
        .map(|s| plain_text(&s.content))
        .unwrap_or_default();

    let mut categories: BTreeSet<String> = source.categories.iter().cloned().collect();
    categories.extend(
        entry
            .categories
            .iter()
            .map(|c| c.term.trim().to_string())
            .filter(|t| !t.is_empty()),
    );

    let mut article = Article::new(source.name.clone(), title, link).with_summary_raw(summary);
    article.published_at = entry.published.or(entry.updated);
    article.categories = categories;
    article.authors = entry.authors.into_iter().map(|p| p.name).collect();
    Some(article)
}

/// Feed summaries are often HTML fragments.
fn plain_text(fragment: &str) -> String {
    if !fragment.contains('<') {
        return fragment.trim().to_string();
    }
    match html2text::from_read(fragment.as_bytes(), 10_000) {
        Ok(text) => text.split_whitespace().collect::<Vec<_>>().join(" "),
        Err(_) => fragment.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example</title>
    <link>https://news.example.com</link>
    <description>Example feed</description>
    <item>
      <title>Harbour bridge reopens</title>
      <link>https://news.example.com/bridge</link>
      <description>&lt;p&gt;The bridge reopened after repairs.&lt;/p&gt;</description>
      <category>Local</category>
      <pubDate>Mon, 06 Oct 2025 08:00:00 GMT</pubDate>
    </item>
    <item>
      <title>No link here</title>
      <description>Dropped</description>
    </item>
    <item>
      <title>Second story</title>
      <link>https://news.example.com/second</link>
      <description>Plain summary</description>
    </item>
  </channel>
</rss>"#;

    fn source(max_articles: Option<usize>) -> SourceConfig {
        SourceConfig {
            name: "example".to_string(),
            url: "https://news.example.com/rss".to_string(),
            categories: vec!["general".to_string()],
            enabled: true,
            max_articles,
        }
    }

    #[test]
    fn test_entries_to_articles() {
        let feed = parser::parse(RSS.as_bytes()).unwrap();
        let articles = entries_to_articles(&source(None), feed);

        assert_eq!(articles.len(), 2);
        let first = &articles[0];
        assert_eq!(first.source, "example");
        assert_eq!(first.title, "Harbour bridge reopens");
        assert_eq!(first.link, "https://news.example.com/bridge");
        assert!(first.summary_raw.contains("reopened after repairs"));
        assert!(!first.summary_raw.contains('<'));
        assert!(first.published_at.is_some());
        assert!(first.categories.contains("general"));
        assert!(first.categories.contains("Local"));
        assert_eq!(articles[1].summary_raw, "Plain summary");
        assert!(first.full_text.is_none());
    }

    #[test]
    fn test_max_articles_cap() {
        let feed = parser::parse(RSS.as_bytes()).unwrap();
        let articles = entries_to_articles(&source(Some(1)), feed);
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].link, "https://news.example.com/bridge");
    }
}
