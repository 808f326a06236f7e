use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::stage::{Branch, StageError, StageErrorKind, StageResult};

pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 4000;

/// Bot API uploads are capped around 50 MB
const AUDIO_WARN_MB: f64 = 45.0;

/// End-user channel for the finished run.
#[async_trait::async_trait]
pub trait Messenger: Send + Sync {
    async fn send_audio(&self, path: &Path, caption: &str) -> StageResult<()>;

    /// Send a text message, split as the channel requires. Returns the
    /// number of messages sent.
    async fn send_text(&self, text: &str) -> StageResult<usize>;
}

/// What reached the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub podcast_sent: bool,
    pub text_sent: bool,
    /// `None` when delivery was not attempted or both paths failed
    pub branch: Option<Branch>,
    pub error: Option<String>,
}

impl DeliveryResult {
    pub fn delivered(&self) -> bool {
        self.podcast_sent || self.text_sent
    }
}

pub fn podcast_caption(date: NaiveDate) -> String {
    format!("Daily News Podcast - {}", date.format("%B %d, %Y"))
}

/// Text fallback framing around the meta-summary.
pub fn text_digest(summary: &str, date: NaiveDate) -> String {
    format!(
        "Daily News Summary - {}\n\n{}\n\nAudio podcast generation failed, here's the text version instead.",
        date.format("%B %d, %Y"),
        clean_text(summary)
    )
}

/// Drop control characters; line breaks and tabs become single spaces.
pub fn clean_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '\n' || c == '\r' || c == '\t' {
            if !out.ends_with(' ') {
                out.push(' ');
            }
        } else if !c.is_control() {
            out.push(c);
        }
    }
    out.trim().to_string()
}

/// Split into chunks of at most `max_chars` characters. Multi-part messages
/// get "Part i/n" headers.
pub fn chunk_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let chars: Vec<char> = text.chars().collect();
    let chunks: Vec<String> = chars.chunks(max_chars).map(|c| c.iter().collect()).collect();
    let total = chunks.len();

    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            if i == 0 {
                format!("Daily News Summary - Part {}/{}\n\n{}", i + 1, total, chunk)
            } else {
                format!("Part {}/{}\n\n{}", i + 1, total, chunk)
            }
        })
        .collect()
}

/// Telegram Bot API messenger.
pub struct TelegramMessenger {
    client: Client,
    api_url: String,
    bot_token: String,
    chat_id: String,
    max_message_chars: usize,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramMessenger {
    pub fn new(
        client: Client,
        api_url: impl Into<String>,
        bot_token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            max_message_chars: DEFAULT_MAX_MESSAGE_CHARS,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_max_message_chars(mut self, max: usize) -> Self {
        self.max_message_chars = max;
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.bot_token, method)
    }

    async fn check(response: reqwest::Response) -> StageResult<()> {
        let status = response.status();
        let body = response.text().await?;
        let parsed: Option<TelegramResponse> = serde_json::from_str(&body).ok();

        match parsed {
            Some(reply) if status.is_success() && reply.ok => Ok(()),
            Some(reply) => Err(StageError::new(
                StageErrorKind::Http,
                format!(
                    "Telegram API error {}: {}",
                    status,
                    reply.description.unwrap_or_default()
                ),
            )),
            None if status.is_success() => Err(StageError::invalid_response("Telegram reply is not JSON")),
            None => Err(StageError::new(
                StageErrorKind::Http,
                format!("Telegram API error {}: {}", status, body),
            )),
        }
    }
}

#[async_trait::async_trait]
impl Messenger for TelegramMessenger {
    async fn send_audio(&self, path: &Path, caption: &str) -> StageResult<()> {
        let bytes = tokio::fs::read(path).await?;
        let size_mb = bytes.len() as f64 / (1024.0 * 1024.0);
        if size_mb > AUDIO_WARN_MB {
            warn!("File size {:.1}MB may be too large for Telegram", size_mb);
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "podcast.wav".to_string());
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/wav")?;
        let form = reqwest::multipart::Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", caption.to_string())
            .text("title", "Daily News Podcast")
            .text("performer", "Newscast")
            .part("audio", part);

        info!("Sending podcast via Telegram: {}", path.display());
        let response = self
            .client
            .post(self.method_url("sendAudio"))
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await?;
        Self::check(response).await?;
        info!("Podcast sent to Telegram chat {}", self.chat_id);
        Ok(())
    }

    async fn send_text(&self, text: &str) -> StageResult<usize> {
        let chunks = chunk_message(text, self.max_message_chars);
        for chunk in &chunks {
            let response = self
                .client
                .post(self.method_url("sendMessage"))
                .timeout(self.timeout)
                .json(&serde_json::json!({ "chat_id": self.chat_id, "text": chunk }))
                .send()
                .await?;
            Self::check(response).await?;
        }
        info!("Text summary sent to Telegram in {} message(s)", chunks.len());
        Ok(chunks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("line one\r\nline two\tend\u{0007}"), "line one line two end");
        assert_eq!(clean_text("  \n "), "");
    }

    #[test]
    fn test_short_message_is_single_chunk() {
        assert_eq!(chunk_message("hello", 4000), vec!["hello".to_string()]);
    }

    #[test]
    fn test_long_message_is_split_with_headers() {
        let text = "a".repeat(9000);
        let chunks = chunk_message(&text, 4000);

        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].starts_with("Daily News Summary - Part 1/3\n\n"));
        assert!(chunks[1].starts_with("Part 2/3\n\n"));
        assert!(chunks[2].ends_with(&"a".repeat(1000)));
        let body_chars: usize = chunks
            .iter()
            .map(|c| c.split("\n\n").nth(1).unwrap().chars().count())
            .sum();
        assert_eq!(body_chars, 9000);
    }

    #[test]
    fn test_chunking_respects_char_boundaries() {
        let text = "é".repeat(10);
        let chunks = chunk_message(&text, 4);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[2].ends_with("éé"));
    }

    #[test]
    fn test_text_digest() {
        let date = NaiveDate::from_ymd_opt(2025, 10, 6).unwrap();
        let digest = text_digest("Top story.\nSecond story.", date);
        assert!(digest.starts_with("Daily News Summary - October 06, 2025\n\nTop story. Second story."));
        assert!(digest.ends_with("text version instead."));
    }
}
