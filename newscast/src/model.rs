//! Article model shared by every pipeline stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One unit of news content.
///
/// Created at fetch time and only ever enriched afterwards: extraction fills
/// `full_text`, summarization fills `ai_summary`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub source: String,
    pub title: String,
    /// Business key within a run; not unique across runs
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
    /// Short text supplied by the feed
    pub summary_raw: String,
    pub categories: BTreeSet<String>,
    /// `Some("")` means extraction was attempted and failed
    pub full_text: Option<String>,
    pub ai_summary: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub top_image: Option<String>,
    #[serde(default)]
    pub extraction_successful: bool,
}

/// Result of downloading and parsing an article page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub full_text: String,
    pub authors: Vec<String>,
    pub top_image: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub success: bool,
}

impl ExtractedContent {
    /// Marker for a failed extraction: empty text, no metadata.
    pub fn failed() -> Self {
        Self::default()
    }
}

impl Article {
    pub fn new(source: impl Into<String>, title: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            title: title.into(),
            link: link.into(),
            ..Default::default()
        }
    }

    pub fn with_summary_raw(mut self, summary: impl Into<String>) -> Self {
        self.summary_raw = summary.into();
        self
    }

    pub fn with_full_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.extraction_successful = !text.is_empty();
        self.full_text = Some(text);
        self
    }

    /// Merge extraction output into the article. A failed extraction leaves
    /// an empty `full_text` so later stages fall back to `summary_raw`.
    pub fn apply_extraction(&mut self, content: ExtractedContent) {
        self.extraction_successful = content.success && !content.full_text.is_empty();
        self.full_text = Some(if self.extraction_successful {
            content.full_text
        } else {
            String::new()
        });
        if !content.authors.is_empty() {
            self.authors = content.authors;
        }
        if content.top_image.is_some() {
            self.top_image = content.top_image;
        }
        if self.published_at.is_none() {
            self.published_at = content.published_at;
        }
    }

    fn non_empty(field: &Option<String>) -> Option<&str> {
        field.as_deref().filter(|s| !s.is_empty())
    }

    /// Character count of the extracted text; 0 when extraction failed.
    pub fn full_text_len(&self) -> usize {
        Self::non_empty(&self.full_text).map_or(0, |t| t.chars().count())
    }

    /// Best available body for summarization: extracted text, else the feed summary.
    pub fn body_text(&self) -> &str {
        Self::non_empty(&self.full_text).unwrap_or(&self.summary_raw)
    }

    /// Lower-cased text used for similarity scoring. The title is repeated
    /// to weight it roughly twice by term frequency.
    pub fn comparison_text(&self) -> String {
        let content = Self::non_empty(&self.full_text)
            .or_else(|| Self::non_empty(&self.ai_summary))
            .unwrap_or(&self.summary_raw);
        format!("{} {} {}", self.title, self.title, content).to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_text_prefers_full_text() {
        let article = Article::new("feed", "Big News", "https://example.com/a")
            .with_summary_raw("Feed Summary")
            .with_full_text("Full Body");
        assert_eq!(article.comparison_text(), "big news big news full body");
    }

    #[test]
    fn comparison_text_falls_back_to_ai_summary_then_raw() {
        let mut article = Article::new("feed", "Title", "https://example.com/a")
            .with_summary_raw("Raw")
            .with_full_text("");
        assert_eq!(article.comparison_text(), "title title raw");

        article.ai_summary = Some("Generated".to_string());
        assert_eq!(article.comparison_text(), "title title generated");
    }

    #[test]
    fn failed_extraction_degrades_to_summary_raw() {
        let mut article = Article::new("feed", "Title", "https://example.com/a")
            .with_summary_raw("from the feed");
        article.apply_extraction(ExtractedContent::failed());

        assert!(!article.extraction_successful);
        assert_eq!(article.full_text.as_deref(), Some(""));
        assert_eq!(article.full_text_len(), 0);
        assert_eq!(article.body_text(), "from the feed");
    }

    #[test]
    fn full_text_len_counts_characters() {
        let article = Article::new("feed", "t", "l").with_full_text("héllo");
        assert_eq!(article.full_text_len(), 5);
    }
}
