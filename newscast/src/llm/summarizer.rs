// Summarizer module
use std::sync::Arc;
use tracing::{debug, info};

use super::{LlmProvider, LlmRequest};
use crate::stage::{StageError, StageResult};

/// Stored in place of a summary when both the LLM and the extractive path fail.
pub const SUMMARY_FAILED: &str = "Summary generation failed - content processing error";
pub const NO_VALID_SUMMARIES: &str = "No valid summaries available for meta-summary generation";

const EXTRACTIVE_MARKER: &str = "[Extractive summary - AI summarization unavailable]";
const FALLBACK_META_MARKER: &str = "[Fallback meta-summary - AI summarization unavailable]";
const EXTRACTIVE_MAX_CHARS: usize = 200;
const EXTRACTIVE_MAX_SENTENCES: usize = 5;

const META_SYSTEM_PROMPT: &str =
    "You are a podcast scriptwriter. Write engaging, natural spoken scripts for a 10 to 20 minute news podcast.";

const BUSINESS_KEYWORDS: &[&str] = &["business", "company", "market", "economic", "financial", "trade"];
const TECH_KEYWORDS: &[&str] = &["technology", "tech", "digital", "ai", "artificial", "software", "startup"];
const POLITICS_KEYWORDS: &[&str] = &["government", "political", "policy", "election", "minister", "parliament"];

/// LLM-backed primary paths for the summarization stages.
///
/// Only the primary paths live here; the local fallbacks are free functions
/// so the orchestrator can hand them to [`crate::stage::with_fallback`].
#[derive(Clone)]
pub struct Summarizer {
    provider: Option<Arc<dyn LlmProvider>>,
    summary_max_tokens: usize,
    meta_max_tokens: usize,
}

impl Summarizer {
    pub fn new(provider: Option<Arc<dyn LlmProvider>>) -> Self {
        Self {
            provider,
            summary_max_tokens: 150,
            meta_max_tokens: 4000,
        }
    }

    /// A summarizer with no provider: every primary call reports `Unavailable`.
    pub fn offline() -> Self {
        Self::new(None)
    }

    pub fn with_token_limits(mut self, summary_max_tokens: usize, meta_max_tokens: usize) -> Self {
        self.summary_max_tokens = summary_max_tokens;
        self.meta_max_tokens = meta_max_tokens;
        self
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_some()
    }

    /// Summarize one article in 1-2 sentences.
    pub async fn summarize(&self, text: &str) -> StageResult<String> {
        let provider = self.provider()?;
        if text.trim().is_empty() {
            return Err(StageError::invalid_response("no text to summarize"));
        }

        let request = LlmRequest {
            prompt: summary_prompt(text),
            max_tokens: Some(self.summary_max_tokens),
            ..Default::default()
        };
        let content = generate(provider.as_ref(), request).await?;
        debug!(chars = content.len(), "AI summary generated");
        Ok(content)
    }

    /// Turn the day's summaries into a podcast script.
    pub async fn meta_summarize(&self, summaries: &[String]) -> StageResult<String> {
        let provider = self.provider()?;
        let request = LlmRequest {
            prompt: meta_prompt(summaries),
            system: Some(META_SYSTEM_PROMPT.to_string()),
            max_tokens: Some(self.meta_max_tokens),
            ..Default::default()
        };
        let content = generate(provider.as_ref(), request).await?;
        info!(chars = content.len(), model = provider.model(), "AI meta-summary generated");
        Ok(content)
    }

    fn provider(&self) -> StageResult<&Arc<dyn LlmProvider>> {
        self.provider
            .as_ref()
            .ok_or_else(|| StageError::unavailable("no LLM provider configured"))
    }
}

async fn generate(provider: &dyn LlmProvider, request: LlmRequest) -> StageResult<String> {
    let response = provider
        .generate(request)
        .await
        .map_err(|e| StageError::from_anyhow(&e))?;

    if response.content.trim().is_empty() {
        return Err(StageError::invalid_response("LLM returned an empty completion"));
    }
    Ok(response.content)
}

fn summary_prompt(text: &str) -> String {
    format!(
        "Summarize the following news article in 1-2 sentences. \
         Focus on the key facts and main points:\n\n{}",
        text
    )
}

fn meta_prompt(summaries: &[String]) -> String {
    format!(
        "Take the following article summaries and turn them into a single, engaging news podcast script.\n\n\
         Guidelines:\n\
         - Audience: general listeners who want a clear, concise news update.\n\
         - Length: aim for about 700 words.\n\
         - Style: conversational but professional, like a news podcast host. Avoid jargon.\n\
         - Open with a greeting and a quick overview of what is coming up.\n\
         - Group related stories into segments (world, business, tech, science, culture) \
         and transition smoothly between them.\n\
         - End with a brief wrap-up and a sign-off.\n\
         - Do not repeat the summaries verbatim; rewrite them as natural spoken language.\n\n\
         Here are the article summaries to use:\n{}\n\n\
         Now write the complete podcast script.",
        summaries.join("\n\n")
    )
}

/// Local fallback for a single article: the leading sentences, up to about
/// 200 characters, tagged as extractive.
pub fn extractive_summary(text: &str) -> StageResult<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(StageError::invalid_response("no text to summarize"));
    }

    let mut parts: Vec<&str> = Vec::new();
    let mut char_count = 0;
    for sentence in text.split(". ").take(EXTRACTIVE_MAX_SENTENCES) {
        let len = sentence.chars().count();
        if char_count + len > EXTRACTIVE_MAX_CHARS {
            break;
        }
        parts.push(sentence.trim());
        char_count += len;
    }

    let mut summary = if parts.is_empty() {
        // First sentence alone is over the limit
        text.chars().take(EXTRACTIVE_MAX_CHARS).collect::<String>().trim_end().to_string()
    } else {
        parts.join(". ")
    };
    if !summary.ends_with('.') {
        summary.push('.');
    }
    summary.push(' ');
    summary.push_str(EXTRACTIVE_MARKER);
    Ok(summary)
}

/// Drop placeholder summaries that must not feed the meta-summary.
pub fn usable_summaries<'a, I>(summaries: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    summaries
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.starts_with("Summary generation failed"))
        .map(str::to_string)
        .collect()
}

/// Local fallback for the meta-summary: story count, detected themes and
/// the opening sentence of the first three summaries.
pub fn fallback_meta_summary(summaries: &[String]) -> String {
    let all_text = summaries.join(" ").to_lowercase();
    let words: std::collections::HashSet<&str> = all_text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let mentions = |keywords: &[&str]| keywords.iter().any(|k| words.contains(k));

    let mut themes = Vec::new();
    if mentions(BUSINESS_KEYWORDS) {
        themes.push("business and economics");
    }
    if mentions(TECH_KEYWORDS) {
        themes.push("technology");
    }
    if mentions(POLITICS_KEYWORDS) {
        themes.push("politics and governance");
    }

    let mut meta = format!("Today's news covers {} key stories", summaries.len());
    if !themes.is_empty() {
        meta.push_str(&format!(" focusing on {}", themes.join(", ")));
    }
    meta.push_str(". Key developments include various updates across different sectors. ");

    let highlights: Vec<&str> = summaries
        .iter()
        .take(3)
        .filter_map(|s| s.split('.').next())
        .map(str::trim)
        .filter(|s| s.chars().count() > 10)
        .collect();
    if !highlights.is_empty() {
        meta.push_str(&format!("Major highlights: {}. ", highlights.join("; ")));
    }

    meta.push_str(FALLBACK_META_MARKER);
    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, UsageMetadata};
    use crate::stage::StageErrorKind;
    use std::sync::Mutex;

    struct RecordingProvider {
        reply: String,
        requests: Mutex<Vec<LlmRequest>>,
    }

    #[async_trait::async_trait]
    impl LlmProvider for RecordingProvider {
        async fn generate(&self, request: LlmRequest) -> anyhow::Result<LlmResponse> {
            self.requests.lock().unwrap().push(request);
            Ok(LlmResponse {
                content: self.reply.clone(),
                usage: UsageMetadata::default(),
                model: "test".to_string(),
            })
        }

        fn model(&self) -> &str {
            "test"
        }
    }

    fn recording(reply: &str) -> Arc<RecordingProvider> {
        Arc::new(RecordingProvider {
            reply: reply.to_string(),
            requests: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn test_extractive_summary() {
        let text = "The council approved the budget on Monday. Spending on roads rises by ten percent. \
                    Critics say schools lose out";

        let summary = extractive_summary(text).unwrap();

        assert!(summary.starts_with("The council approved the budget on Monday. Spending on roads"));
        assert!(summary.ends_with(EXTRACTIVE_MARKER));
    }

    #[test]
    fn test_extractive_summary_caps_length() {
        let sentence = "word ".repeat(30);
        let text = format!("{}. {}. {}", sentence.trim(), sentence.trim(), sentence.trim());

        let summary = extractive_summary(&text).unwrap();
        let body = summary.trim_end_matches(EXTRACTIVE_MARKER).trim();

        assert!(body.chars().count() <= EXTRACTIVE_MAX_CHARS + 1);
        assert!(!body.is_empty());
    }

    #[test]
    fn test_extractive_summary_rejects_empty_text() {
        let err = extractive_summary("   ").unwrap_err();
        assert_eq!(err.kind, StageErrorKind::InvalidResponse);
    }

    #[test]
    fn test_usable_summaries_filters_sentinels() {
        let kept = usable_summaries(["A real summary.", SUMMARY_FAILED, "", "Another one."]);
        assert_eq!(kept, vec!["A real summary.", "Another one."]);
    }

    #[test]
    fn test_fallback_meta_summary() {
        let summaries = vec![
            "The central bank raised rates as the market slid. More to follow.".to_string(),
            "Parliament passed the election reform bill late on Tuesday.".to_string(),
            "Short.".to_string(),
            "A fourth story nobody will quote here.".to_string(),
        ];

        let meta = fallback_meta_summary(&summaries);

        assert!(meta.starts_with("Today's news covers 4 key stories focusing on business and economics, politics and governance."));
        assert!(meta.contains("Major highlights: The central bank raised rates as the market slid; Parliament passed"));
        assert!(!meta.contains("fourth story"));
        assert!(meta.ends_with(FALLBACK_META_MARKER));
    }

    #[test]
    fn test_fallback_meta_summary_theme_words_are_whole_words() {
        // "said" contains "ai" but is not a technology mention
        let meta = fallback_meta_summary(&["The mayor said the park will reopen in spring.".to_string()]);
        assert!(!meta.contains("technology"));
    }

    #[tokio::test]
    async fn test_offline_summarizer_is_unavailable() {
        let summarizer = Summarizer::offline();
        assert!(!summarizer.is_available());

        let err = summarizer.summarize("Some article text.").await.unwrap_err();
        assert_eq!(err.kind, StageErrorKind::Unavailable);

        let err = summarizer.meta_summarize(&["x".to_string()]).await.unwrap_err();
        assert_eq!(err.kind, StageErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn test_meta_summarize_sends_system_prompt() {
        let provider = recording("Good morning and welcome.");
        let shared: Arc<dyn LlmProvider> = provider.clone();
        let summarizer = Summarizer::new(Some(shared));

        let script = summarizer
            .meta_summarize(&["First story.".to_string(), "Second story.".to_string()])
            .await
            .unwrap();

        assert_eq!(script, "Good morning and welcome.");
        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].system.as_deref().unwrap_or_default().contains("podcast scriptwriter"));
        assert!(requests[0].prompt.contains("First story.\n\nSecond story."));
    }

    #[tokio::test]
    async fn test_blank_completion_is_invalid() {
        let provider: Arc<dyn LlmProvider> = recording("  ");
        let summarizer = Summarizer::new(Some(provider));
        let err = summarizer.summarize("Article body.").await.unwrap_err();
        assert_eq!(err.kind, StageErrorKind::InvalidResponse);
    }
}
