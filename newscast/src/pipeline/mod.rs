//! Pipeline orchestrator.
//!
//! One run walks the stages in order: fetch, extract, deduplicate,
//! summarize, meta-summarize, synthesize, deliver. Only an empty fetch and an
//! empty post-dedup batch end a run early; every other failure is recorded in
//! the run statistics and the run continues with a degraded value.

use chrono::{NaiveDate, Utc};
use common::{Config, SourceConfig};
use futures::FutureExt;
use reqwest::Client;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

pub mod result;
pub mod stats;

pub use result::{PodcastInfo, RunResult, RunStatus};
pub use stats::{BranchMarker, PipelineStage, RunStatistics};

use crate::dedup::Deduplicator;
use crate::delivery::{podcast_caption, text_digest, DeliveryResult, Messenger, TelegramMessenger};
use crate::ingestion::{FeedSource, HttpFeedSource};
use crate::llm::remote::{self, RemoteLlmProvider};
use crate::llm::summarizer::{extractive_summary, fallback_meta_summary, usable_summaries, NO_VALID_SUMMARIES, SUMMARY_FAILED};
use crate::llm::{LlmProvider, Summarizer};
use crate::model::Article;
use crate::scraping::{extract_batch, ContentExtractor, ReadabilityExtractor};
use crate::speech::{self, podcast_file_name, podcast_script, AudioLimits, CloudTts, EspeakTts, SpeechSynthesizer};
use crate::stage::{with_fallback, Branch, StageError};
use crate::storage::{PodcastArchive, RunHistory};

/// Conditions that end a run before delivery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("No articles fetched from RSS feeds")]
    NoArticlesFetched,
    #[error("No articles remaining after deduplication")]
    NoArticlesAfterDedup,
    #[error("pipeline cancelled before {0}")]
    Cancelled(PipelineStage),
}

struct Outcome {
    articles: Vec<Article>,
    meta_summary: String,
    podcast: Option<PodcastInfo>,
    delivery: DeliveryResult,
}

/// The orchestrator and the collaborators it drives.
///
/// Holds configuration and shared clients only. Every run builds its own
/// statistics and its own TF-IDF vocabulary, so concurrent runs never share
/// mutable state.
pub struct Pipeline {
    sources: Vec<SourceConfig>,
    feed: Arc<dyn FeedSource>,
    extractor: Arc<dyn ContentExtractor>,
    extraction_concurrency: usize,
    deduplicator: Deduplicator,
    summarizer: Summarizer,
    summary_delay: Duration,
    speech_enabled: bool,
    primary_speech: Option<Arc<dyn SpeechSynthesizer>>,
    fallback_speech: Option<Arc<dyn SpeechSynthesizer>>,
    audio_limits: AudioLimits,
    output_dir: PathBuf,
    archive: Option<PodcastArchive>,
    messenger: Option<Arc<dyn Messenger>>,
    history: Option<RunHistory>,
}

pub struct PipelineBuilder {
    pipeline: Pipeline,
}

impl PipelineBuilder {
    pub fn sources(mut self, sources: Vec<SourceConfig>) -> Self {
        self.pipeline.sources = sources;
        self
    }

    pub fn extraction_concurrency(mut self, concurrency: usize) -> Self {
        self.pipeline.extraction_concurrency = concurrency.max(1);
        self
    }

    pub fn dedup(mut self, threshold: f64, max_features: usize) -> Self {
        self.pipeline.deduplicator = Deduplicator::new(threshold, max_features);
        self
    }

    pub fn summarizer(mut self, summarizer: Summarizer) -> Self {
        self.pipeline.summarizer = summarizer;
        self
    }

    /// Pause between per-article LLM calls.
    pub fn summary_delay(mut self, delay: Duration) -> Self {
        self.pipeline.summary_delay = delay;
        self
    }

    pub fn speech(
        mut self,
        primary: Option<Arc<dyn SpeechSynthesizer>>,
        fallback: Option<Arc<dyn SpeechSynthesizer>>,
    ) -> Self {
        self.pipeline.primary_speech = primary;
        self.pipeline.fallback_speech = fallback;
        self
    }

    pub fn speech_enabled(mut self, enabled: bool) -> Self {
        self.pipeline.speech_enabled = enabled;
        self
    }

    pub fn audio_limits(mut self, limits: AudioLimits) -> Self {
        self.pipeline.audio_limits = limits;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pipeline.output_dir = dir.into();
        self
    }

    pub fn archive(mut self, archive: Option<PodcastArchive>) -> Self {
        self.pipeline.archive = archive;
        self
    }

    pub fn messenger(mut self, messenger: Option<Arc<dyn Messenger>>) -> Self {
        self.pipeline.messenger = messenger;
        self
    }

    pub fn history(mut self, history: Option<RunHistory>) -> Self {
        self.pipeline.history = history;
        self
    }

    pub fn build(self) -> Pipeline {
        self.pipeline
    }

    /// Wire the HTTP-backed collaborators from configuration.
    ///
    /// `client` is shared by every collaborator. Missing credentials leave the
    /// matching primary path unconfigured, which the stages treat as
    /// unavailable and answer with their fallback.
    pub fn from_config(config: &Config, client: Client) -> Self {
        let politeness = &config.politeness;
        let feed = HttpFeedSource::new(client.clone(), politeness.fetch_timeout_seconds())
            .with_source_delay(Duration::from_millis(politeness.delay_between_sources_ms()));
        let extractor = ReadabilityExtractor::new(client.clone(), politeness.extraction_timeout_seconds());

        let mut builder = Pipeline::builder(Arc::new(feed), Arc::new(extractor))
            .sources(config.enabled_sources())
            .extraction_concurrency(politeness.extraction_concurrency())
            .dedup(config.dedup.threshold(), config.dedup.max_features());

        if let Some(llm) = &config.llm {
            match common::secret_from_env(llm.api_key_env.as_deref()) {
                Some(key) => {
                    let provider = RemoteLlmProvider::new(
                        client.clone(),
                        llm.api_url.clone().unwrap_or_else(|| remote::DEFAULT_API_URL.to_string()),
                        key,
                        llm.model.clone().unwrap_or_else(|| remote::DEFAULT_MODEL.to_string()),
                    )
                    .with_defaults(
                        llm.timeout_seconds.unwrap_or(60),
                        llm.max_tokens(),
                        llm.temperature.unwrap_or(0.7),
                    );
                    info!("LLM provider configured: {}", provider.model());
                    let provider: Arc<dyn LlmProvider> = Arc::new(provider);
                    builder = builder
                        .summarizer(
                            Summarizer::new(Some(provider)).with_token_limits(150, llm.meta_max_tokens()),
                        )
                        .summary_delay(Duration::from_millis(llm.request_delay_ms()));
                }
                None => warn!("LLM API key not set; summaries will use the extractive fallback"),
            }
        }

        let tts = &config.tts;
        let cloud = common::secret_from_env(tts.api_key_env.as_deref()).map(|key| {
            let engine = CloudTts::new(
                client.clone(),
                tts.api_url.clone().unwrap_or_else(|| speech::DEFAULT_CLOUD_TTS_URL.to_string()),
                key,
            )
            .with_voice(
                tts.voice.clone().unwrap_or_else(|| "en-US-Standard-F".to_string()),
                tts.language_code.clone().unwrap_or_else(|| "en-US".to_string()),
            );
            Arc::new(engine) as Arc<dyn SpeechSynthesizer>
        });
        if cloud.is_none() && tts.enabled() {
            warn!("Cloud TTS key not set; podcasts will use espeak");
        }
        let espeak: Arc<dyn SpeechSynthesizer> = Arc::new(EspeakTts::new(
            tts.espeak_binary.clone().unwrap_or_else(|| "espeak".to_string()),
            tts.espeak_voice.clone().unwrap_or_else(|| "en+f3".to_string()),
            tts.words_per_minute(),
        ));

        builder = builder
            .speech_enabled(tts.enabled())
            .speech(cloud, Some(espeak))
            .audio_limits(AudioLimits {
                words_per_minute: tts.words_per_minute(),
                max_size_mb: config.storage.max_podcast_size_mb(),
            })
            .output_dir(tts.output_dir())
            .archive(
                config
                    .storage
                    .archive_dir
                    .as_ref()
                    .map(|dir| PodcastArchive::new(dir, config.storage.retention_days())),
            );

        if let Some(delivery) = &config.delivery {
            let token = common::secret_from_env(delivery.bot_token_env.as_deref());
            let chat_id = common::secret_from_env(delivery.chat_id_env.as_deref());
            match (token, chat_id) {
                (Some(token), Some(chat_id)) => {
                    let messenger = TelegramMessenger::new(
                        client,
                        delivery
                            .api_url
                            .clone()
                            .unwrap_or_else(|| crate::delivery::DEFAULT_TELEGRAM_API_URL.to_string()),
                        token,
                        chat_id,
                    )
                    .with_max_message_chars(delivery.max_message_chars());
                    let messenger: Arc<dyn Messenger> = Arc::new(messenger);
                    builder = builder.messenger(Some(messenger));
                }
                _ => warn!("Telegram credentials not set; delivery disabled"),
            }
        }

        builder
    }
}

impl Pipeline {
    /// Builder with everything optional left unconfigured.
    pub fn builder(feed: Arc<dyn FeedSource>, extractor: Arc<dyn ContentExtractor>) -> PipelineBuilder {
        PipelineBuilder {
            pipeline: Pipeline {
                sources: Vec::new(),
                feed,
                extractor,
                extraction_concurrency: 4,
                deduplicator: Deduplicator::new(common::DEFAULT_DUPLICATE_THRESHOLD, common::DEFAULT_MAX_FEATURES),
                summarizer: Summarizer::offline(),
                summary_delay: Duration::ZERO,
                speech_enabled: true,
                primary_speech: None,
                fallback_speech: None,
                audio_limits: AudioLimits::default(),
                output_dir: PathBuf::from("podcasts"),
                archive: None,
                messenger: None,
                history: None,
            },
        }
    }

    pub fn archive(&self) -> Option<&PodcastArchive> {
        self.archive.as_ref()
    }

    pub fn history(&self) -> Option<&RunHistory> {
        self.history.as_ref()
    }

    /// Execute one run. Always returns a well-formed result.
    pub async fn run(&self, cancel: &CancellationToken) -> RunResult {
        self.run_as(Uuid::new_v4(), cancel).await
    }

    async fn run_as(&self, run_id: Uuid, cancel: &CancellationToken) -> RunResult {
        let mut stats = RunStatistics::new(run_id, Utc::now());
        info!(run_id = %run_id, sources = self.sources.len(), "Starting news pipeline run");

        let outcome = self.execute(&mut stats, cancel).await;
        let finished_at = Utc::now();
        stats.finish(finished_at);

        let result = match outcome {
            Ok(outcome) => {
                info!(
                    run_id = %run_id,
                    "Pipeline completed successfully in {:.1} seconds",
                    stats.duration_seconds
                );
                info!("Final stats: {}", stats.summary_line());
                RunResult {
                    run_id,
                    status: RunStatus::Success,
                    timestamp: finished_at,
                    error: None,
                    articles_processed: outcome.articles.len(),
                    meta_summary: Some(outcome.meta_summary),
                    podcast: outcome.podcast,
                    delivery: Some(outcome.delivery),
                    statistics: stats,
                }
            }
            Err(e) => {
                let message = e.to_string();
                if matches!(e, PipelineError::Cancelled(_)) {
                    stats.cancelled = true;
                }
                stats.push_error(message.clone());
                error!(run_id = %run_id, "Pipeline failed: {}", message);
                RunResult::failed(message, stats)
            }
        };

        self.record(&result).await;
        result
    }

    async fn record(&self, result: &RunResult) {
        if let Some(history) = &self.history {
            if let Err(e) = history.record(result).await {
                warn!(run_id = %result.run_id, "Failed to store run history: {:#}", e);
            }
        }
    }

    /// Run on a spawned task. A panic that escapes the stage guards becomes
    /// an error result instead of tearing down the caller.
    pub async fn run_detached(self: Arc<Self>, cancel: CancellationToken) -> RunResult {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let pipeline = Arc::clone(&self);
        let handle = tokio::spawn(async move { pipeline.run_as(run_id, &cancel).await });

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                let message = if e.is_panic() {
                    format!("pipeline panicked: {}", panic_message(&*e.into_panic()))
                } else {
                    format!("pipeline task aborted: {}", e)
                };
                error!(run_id = %run_id, "{}", message);
                let mut stats = RunStatistics::new(run_id, started_at);
                stats.push_error(message.clone());
                stats.finish(Utc::now());
                let result = RunResult::failed(message, stats);
                self.record(&result).await;
                result
            }
        }
    }

    async fn execute(&self, stats: &mut RunStatistics, cancel: &CancellationToken) -> Result<Outcome, PipelineError> {
        let today = stats.started_at.date_naive();

        checkpoint(cancel, PipelineStage::Fetching)?;
        info!("Step 1: Fetching articles from {} sources", self.sources.len());
        let articles = match guard(PipelineStage::Fetching, self.feed.fetch_all(&self.sources)).await {
            Ok(articles) => articles,
            Err(message) => {
                stats.push_error(message);
                Vec::new()
            }
        };
        stats.record_fetch(articles.len());
        if articles.is_empty() {
            return Err(PipelineError::NoArticlesFetched);
        }

        checkpoint(cancel, PipelineStage::Extracting)?;
        info!("Step 2: Extracting full content for {} articles", articles.len());
        let articles = self.extraction_stage(articles, stats).await;

        checkpoint(cancel, PipelineStage::Deduplicating)?;
        info!("Step 3: Removing near-duplicate articles");
        let mut articles = self.dedup_stage(articles, stats)?;

        checkpoint(cancel, PipelineStage::Summarizing)?;
        info!("Step 4: Generating summaries for {} articles", articles.len());
        self.summary_stage(&mut articles, stats).await;

        checkpoint(cancel, PipelineStage::MetaSummarizing)?;
        info!("Step 5: Generating meta-summary");
        let meta_summary = self.meta_summary_stage(&articles, today, stats).await;

        checkpoint(cancel, PipelineStage::Synthesizing)?;
        info!("Step 6: Creating podcast");
        let podcast = self.synthesis_stage(&meta_summary, today, stats).await;

        checkpoint(cancel, PipelineStage::Delivering)?;
        info!("Step 7: Delivering");
        let delivery = self.delivery_stage(podcast.as_ref(), &meta_summary, today, stats).await;

        Ok(Outcome {
            articles,
            meta_summary,
            podcast,
            delivery,
        })
    }

    async fn extraction_stage(&self, articles: Vec<Article>, stats: &mut RunStatistics) -> Vec<Article> {
        let attempt = extract_batch(self.extractor.as_ref(), articles.clone(), self.extraction_concurrency);
        let articles = match guard(PipelineStage::Extracting, attempt).await {
            Ok(extracted) => extracted,
            Err(message) => {
                stats.push_error(message);
                articles
            }
        };

        let extracted = articles.iter().filter(|a| a.extraction_successful).count();
        stats.record_extraction(extracted, articles.len() - extracted);
        info!("Extracted content for {}/{} articles", extracted, articles.len());
        articles
    }

    fn dedup_stage(&self, articles: Vec<Article>, stats: &mut RunStatistics) -> Result<Vec<Article>, PipelineError> {
        let deduplicator = &self.deduplicator;
        let kept = match std::panic::catch_unwind(AssertUnwindSafe(|| deduplicator.deduplicate(articles))) {
            Ok(outcome) => {
                stats.record_dedup(outcome.kept.len(), outcome.decision.pairs_found(), outcome.records);
                outcome.kept
            }
            Err(panic) => {
                let message = format!("{} stage failed: {}", PipelineStage::Deduplicating, panic_message(&*panic));
                error!("{}", message);
                stats.push_error(message);
                stats.record_dedup(0, 0, Vec::new());
                Vec::new()
            }
        };
        require_survivors(kept)
    }

    async fn summary_stage(&self, articles: &mut [Article], stats: &mut RunStatistics) {
        let (mut primary, mut fallback, mut failed) = (0, 0, 0);
        let pace = self.summarizer.is_available() && !self.summary_delay.is_zero();

        for (i, article) in articles.iter_mut().enumerate() {
            if i > 0 && pace {
                tokio::time::sleep(self.summary_delay).await;
            }

            let body = article.body_text().to_string();
            let attempt = with_fallback(
                "summarize",
                self.summarizer.summarize(&body),
                || async { extractive_summary(&body) },
            );

            let summary = match guard(PipelineStage::Summarizing, attempt).await {
                Ok(Ok(resolved)) => {
                    if resolved.used_fallback() {
                        fallback += 1;
                    } else {
                        primary += 1;
                    }
                    resolved.value
                }
                Ok(Err(e)) => {
                    warn!("Summary failed for {}: {}", article.link, e);
                    fallback += 1;
                    failed += 1;
                    SUMMARY_FAILED.to_string()
                }
                Err(message) => {
                    stats.push_error(message);
                    fallback += 1;
                    failed += 1;
                    SUMMARY_FAILED.to_string()
                }
            };
            article.ai_summary = Some(summary);
        }

        stats.record_summaries(primary, fallback, failed);
        info!(
            "Summaries: {} AI, {} fallback ({} failed)",
            primary, fallback, failed
        );
    }

    async fn meta_summary_stage(&self, articles: &[Article], today: NaiveDate, stats: &mut RunStatistics) -> String {
        let summaries = usable_summaries(articles.iter().filter_map(|a| a.ai_summary.as_deref()));
        if summaries.is_empty() {
            warn!("No valid summaries for the meta-summary");
            stats.record_meta_summary(BranchMarker::Skipped);
            return NO_VALID_SUMMARIES.to_string();
        }

        let attempt = with_fallback(
            "meta_summary",
            self.summarizer.meta_summarize(&summaries),
            || async { Ok(fallback_meta_summary(&summaries)) },
        );
        let failure = match guard(PipelineStage::MetaSummarizing, attempt).await {
            Ok(Ok(resolved)) => {
                stats.record_meta_summary(resolved.branch.into());
                info!("Meta-summary ready: {} chars", resolved.value.len());
                return resolved.value;
            }
            Ok(Err(e)) => format!("Meta-summary generation failed: {}", e),
            Err(message) => message,
        };

        stats.push_error(failure);
        stats.record_meta_summary(BranchMarker::Failed);
        format!(
            "Daily news summary for {} - {} articles processed.",
            today.format("%Y-%m-%d"),
            articles.len()
        )
    }

    async fn synthesis_stage(&self, meta_summary: &str, today: NaiveDate, stats: &mut RunStatistics) -> Option<PodcastInfo> {
        if !self.speech_enabled {
            info!("Speech synthesis disabled");
            stats.record_synthesis(BranchMarker::Skipped, false);
            return None;
        }

        let script = podcast_script(meta_summary, today);
        let output = self.output_dir.join(podcast_file_name(today));
        let attempt = with_fallback(
            "synthesis",
            speech::render(self.primary_speech.as_deref(), &script, &output, self.audio_limits),
            || speech::render(self.fallback_speech.as_deref(), &script, &output, self.audio_limits),
        );

        let failure = match guard(PipelineStage::Synthesizing, attempt).await {
            Ok(Ok(resolved)) => {
                let branch = resolved.branch;
                let mut podcast = PodcastInfo::from_audio(resolved.value, branch);
                if let Some(archive) = &self.archive {
                    match archive.archive(&podcast.local_file, Utc::now()).await {
                        Ok(path) => podcast.archive_path = Some(path),
                        Err(e) => warn!("Podcast archive failed: {:#}", e),
                    }
                }
                stats.record_synthesis(branch.into(), true);
                return Some(podcast);
            }
            Ok(Err(e)) => format!("Podcast generation failed: {}", e),
            Err(message) => message,
        };

        warn!("{}", failure);
        stats.push_error(failure);
        stats.record_synthesis(BranchMarker::Failed, false);
        None
    }

    async fn delivery_stage(
        &self,
        podcast: Option<&PodcastInfo>,
        meta_summary: &str,
        today: NaiveDate,
        stats: &mut RunStatistics,
    ) -> DeliveryResult {
        let Some(messenger) = &self.messenger else {
            info!("Delivery not configured");
            stats.record_delivery(BranchMarker::Skipped, false);
            return DeliveryResult {
                error: Some("delivery not configured".to_string()),
                ..Default::default()
            };
        };

        let caption = podcast_caption(today);
        let digest = text_digest(meta_summary, today);
        let send_audio = async {
            match podcast {
                Some(podcast) => messenger.send_audio(&podcast.local_file, &caption).await,
                None => Err(StageError::unavailable("no podcast to send")),
            }
        };
        let attempt = with_fallback("delivery", send_audio, || async {
            messenger.send_text(&digest).await.map(|_| ())
        });

        let failure = match guard(PipelineStage::Delivering, attempt).await {
            Ok(Ok(resolved)) => {
                stats.record_delivery(resolved.branch.into(), true);
                return DeliveryResult {
                    podcast_sent: resolved.branch == Branch::Primary,
                    text_sent: resolved.branch == Branch::Fallback,
                    branch: Some(resolved.branch),
                    error: None,
                };
            }
            Ok(Err(e)) => format!("Delivery failed: {}", e),
            Err(message) => message,
        };

        warn!("{}", failure);
        stats.push_error(failure.clone());
        stats.record_delivery(BranchMarker::Failed, false);
        DeliveryResult {
            error: Some(failure),
            ..Default::default()
        }
    }
}

fn checkpoint(cancel: &CancellationToken, next: PipelineStage) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        warn!("Cancellation requested, stopping before {}", next);
        return Err(PipelineError::Cancelled(next));
    }
    Ok(())
}

fn require_survivors(kept: Vec<Article>) -> Result<Vec<Article>, PipelineError> {
    if kept.is_empty() {
        return Err(PipelineError::NoArticlesAfterDedup);
    }
    Ok(kept)
}

/// Run a stage future, turning a panic into an error message.
async fn guard<F: Future>(stage: PipelineStage, fut: F) -> Result<F::Output, String> {
    AssertUnwindSafe(fut).catch_unwind().await.map_err(|panic| {
        let message = format!("{} stage failed: {}", stage, panic_message(&*panic));
        error!("{}", message);
        message
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_dedup_result_is_fatal() {
        assert_eq!(require_survivors(Vec::new()), Err(PipelineError::NoArticlesAfterDedup));
        let one = vec![Article::new("s", "t", "l")];
        assert_eq!(require_survivors(one.clone()), Ok(one));
    }

    #[test]
    fn fatal_messages() {
        assert_eq!(PipelineError::NoArticlesFetched.to_string(), "No articles fetched from RSS feeds");
        assert_eq!(
            PipelineError::Cancelled(PipelineStage::Synthesizing).to_string(),
            "pipeline cancelled before synthesizing"
        );
    }

    #[tokio::test]
    async fn guard_converts_panics() {
        let ok = guard(PipelineStage::Fetching, async { 7 }).await;
        assert_eq!(ok, Ok(7));

        let err = guard(PipelineStage::Fetching, async {
            if true {
                panic!("feed parser exploded");
            }
            7
        })
        .await
        .unwrap_err();
        assert_eq!(err, "fetching stage failed: feed parser exploded");
    }

    #[tokio::test]
    async fn from_config_gives_meta_summary_its_own_token_budget() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({ "max_tokens": 4000 })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "model": "test-model",
                    "choices": [{ "message": { "role": "assistant", "content": "Good evening." } }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let toml = format!(
            r#"
            [[sources]]
            name = "wire"
            url = "https://wire.example.com/rss"

            [llm]
            api_url = "{}"
            api_key_env = "NEWSCAST_META_BUDGET_TEST_KEY"
            max_tokens = 200
            "#,
            server.url()
        );
        tokio::fs::write(&path, toml).await.unwrap();
        std::env::set_var("NEWSCAST_META_BUDGET_TEST_KEY", "key");

        let config = Config::from_file(&path).await.unwrap();
        let pipeline = PipelineBuilder::from_config(&config, Client::new()).build();
        let script = pipeline
            .summarizer
            .meta_summarize(&["Rates held steady.".to_string()])
            .await
            .unwrap();

        assert_eq!(script, "Good evening.");
        mock.assert_async().await;
    }

    #[test]
    fn checkpoint_respects_token() {
        let token = CancellationToken::new();
        assert!(checkpoint(&token, PipelineStage::Fetching).is_ok());
        token.cancel();
        assert_eq!(
            checkpoint(&token, PipelineStage::Extracting),
            Err(PipelineError::Cancelled(PipelineStage::Extracting))
        );
    }
}
