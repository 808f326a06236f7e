use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use scraper::{Html, Selector};
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::model::{Article, ExtractedContent};

/// Full-text extraction for one article page.
///
/// Never fails: problems are reported as [`ExtractedContent::failed`] so the
/// article degrades to its feed summary.
#[async_trait::async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, article: &Article) -> ExtractedContent;
}

/// Downloads the page and runs readability over it.
pub struct ReadabilityExtractor {
    client: Client,
    timeout: Duration,
}

impl ReadabilityExtractor {
    pub fn new(client: Client, timeout_secs: u64) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .context("failed to fetch article page")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("article fetch failed with status: {}", status));
        }

        response.text().await.context("failed to read response body")
    }
}

#[async_trait::async_trait]
impl ContentExtractor for ReadabilityExtractor {
    async fn extract(&self, article: &Article) -> ExtractedContent {
        let html = match self.fetch_page(&article.link).await {
            Ok(html) => html,
            Err(e) => {
                warn!("scraping: {} failed: {:#}", article.link, e);
                return ExtractedContent::failed();
            }
        };

        match extract_from_html(&html, &article.link) {
            Ok(content) => {
                info!(
                    "scraping: readability extracted {} chars from {}",
                    content.full_text.len(),
                    article.link
                );
                content
            }
            Err(e) => {
                warn!("scraping: readability failed for {}: {:#}", article.link, e);
                ExtractedContent::failed()
            }
        }
    }
}

/// Main text plus page metadata from a downloaded document.
pub fn extract_from_html(html: &str, url: &str) -> Result<ExtractedContent> {
    let url_obj = url::Url::parse(url).context("failed to parse article URL")?;
    let mut reader = Cursor::new(html.as_bytes());
    let product = readability::extractor::extract(&mut reader, &url_obj)
        .map_err(|e| anyhow::anyhow!("readability: {}", e))?;

    let full_text = match html2text::from_read(product.content.as_bytes(), 80) {
        Ok(text) => text,
        Err(e) => {
            debug!("scraping: html2text failed, using readability text: {}", e);
            product.text
        }
    };
    let full_text = full_text.trim().to_string();

    let metadata = parse_metadata(html);
    Ok(ExtractedContent {
        success: !full_text.is_empty(),
        full_text,
        authors: metadata.authors,
        top_image: metadata.top_image,
        published_at: metadata.published_at,
    })
}

/// Metadata read from `<meta>` tags.
#[derive(Debug, Default, PartialEq)]
pub struct PageMetadata {
    pub authors: Vec<String>,
    pub top_image: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

pub fn parse_metadata(html: &str) -> PageMetadata {
    let document = Html::parse_document(html);

    let mut authors: Vec<String> = meta_values(&document, r#"meta[name="author"]"#);
    for author in meta_values(&document, r#"meta[property="article:author"]"#) {
        if !author.starts_with("http") && !authors.contains(&author) {
            authors.push(author);
        }
    }

    let top_image = meta_values(&document, r#"meta[property="og:image"]"#)
        .into_iter()
        .next();

    let published_at = meta_values(&document, r#"meta[property="article:published_time"]"#)
        .into_iter()
        .find_map(|value| DateTime::parse_from_rfc3339(&value).ok())
        .map(|dt| dt.with_timezone(&Utc));

    PageMetadata {
        authors,
        top_image,
        published_at,
    }
}

fn meta_values(document: &Html, selector: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(selector) else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Extract every article with at most `concurrency` pages in flight.
/// Output order matches input order.
pub async fn extract_batch(
    extractor: &dyn ContentExtractor,
    articles: Vec<Article>,
    concurrency: usize,
) -> Vec<Article> {
    stream::iter(articles.into_iter().map(|mut article| async move {
        let content = extractor.extract(&article).await;
        article.apply_extraction(content);
        article
    }))
    .buffered(concurrency.max(1))
    .collect()
    .await
}
