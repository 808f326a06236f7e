/*!
common/src/lib.rs

Shared configuration types and DB helper functions for Newscast.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader for a TOML config file, with default/override layering
- A helper to initialize the SQLite pool used for run history
*/

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_DUPLICATE_THRESHOLD: f64 = 0.85;
pub const DEFAULT_MAX_FEATURES: usize = 5000;

/// One RSS/Atom feed to pull articles from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum entries kept from this feed per run (default 50)
    pub max_articles: Option<usize>,
}

impl SourceConfig {
    pub fn max_articles(&self) -> usize {
        self.max_articles.unwrap_or(50)
    }
}

/// Near-duplicate detection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Similarity strictly above this value marks a pair as duplicate
    pub threshold: Option<f64>,
    /// Vocabulary cap for the TF-IDF vectorizer
    pub max_features: Option<usize>,
}

impl DedupConfig {
    pub fn threshold(&self) -> f64 {
        self.threshold.unwrap_or(DEFAULT_DUPLICATE_THRESHOLD)
    }

    pub fn max_features(&self) -> usize {
        self.max_features.unwrap_or(DEFAULT_MAX_FEATURES)
    }
}

/// Politeness / fetching configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolitenessConfig {
    pub fetch_timeout_seconds: Option<u64>,
    pub extraction_timeout_seconds: Option<u64>,
    pub delay_between_sources_ms: Option<u64>,
    pub extraction_concurrency: Option<usize>,
    pub user_agent: Option<String>,
}

impl PolitenessConfig {
    pub fn fetch_timeout_seconds(&self) -> u64 {
        self.fetch_timeout_seconds.unwrap_or(30)
    }

    pub fn extraction_timeout_seconds(&self) -> u64 {
        self.extraction_timeout_seconds.unwrap_or(30)
    }

    pub fn delay_between_sources_ms(&self) -> u64 {
        self.delay_between_sources_ms.unwrap_or(1000)
    }

    pub fn extraction_concurrency(&self) -> usize {
        self.extraction_concurrency.unwrap_or(4).max(1)
    }

    pub fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| "Newscast/0.1.0".to_string())
    }
}

/// Remote LLM config (OpenAI-compatible chat completions endpoint)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_url: Option<String>,
    /// Name of the environment variable holding the API key
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
    /// Completion budget for the podcast script, which runs much longer than a summary
    pub meta_max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    /// Pause between per-article summarization calls
    pub request_delay_ms: Option<u64>,
}

impl LlmConfig {
    pub fn max_tokens(&self) -> usize {
        self.max_tokens.unwrap_or(1000)
    }

    pub fn meta_max_tokens(&self) -> usize {
        self.meta_max_tokens.unwrap_or(4000)
    }

    pub fn request_delay_ms(&self) -> u64 {
        self.request_delay_ms.unwrap_or(500)
    }
}

/// Text-to-speech configuration (cloud primary, espeak fallback)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TtsConfig {
    pub enabled: Option<bool>,
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub voice: Option<String>,
    pub language_code: Option<String>,
    pub espeak_binary: Option<String>,
    pub espeak_voice: Option<String>,
    pub words_per_minute: Option<u32>,
    pub output_dir: Option<String>,
}

impl TtsConfig {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn words_per_minute(&self) -> u32 {
        self.words_per_minute.unwrap_or(150).max(1)
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(self.output_dir.as_deref().unwrap_or("podcasts"))
    }
}

/// Telegram delivery configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub api_url: Option<String>,
    pub bot_token_env: Option<String>,
    pub chat_id_env: Option<String>,
    pub max_message_chars: Option<usize>,
}

impl DeliveryConfig {
    pub fn max_message_chars(&self) -> usize {
        self.max_message_chars.unwrap_or(4000).max(100)
    }
}

/// Podcast archive and retention
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    pub archive_dir: Option<String>,
    pub retention_days: Option<i64>,
    pub max_podcast_size_mb: Option<f64>,
}

impl StorageConfig {
    pub fn retention_days(&self) -> i64 {
        self.retention_days.unwrap_or(1)
    }

    pub fn max_podcast_size_mb(&self) -> f64 {
        self.max_podcast_size_mb.unwrap_or(25.0)
    }
}

/// Run history database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/newscast.db")
    pub path: String,
}

/// HTTP surface
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: Option<String>,
    pub port: Option<u16>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub politeness: PolitenessConfig,
    pub llm: Option<LlmConfig>,
    #[serde(default)]
    pub tts: TtsConfig,
    pub delivery: Option<DeliveryConfig>,
    #[serde(default)]
    pub storage: StorageConfig,
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.dedup.threshold();
        if !(0.0..=1.0).contains(&threshold) {
            bail!("dedup.threshold must be within [0, 1], got {}", threshold);
        }
        if self.dedup.max_features() == 0 {
            bail!("dedup.max_features must be positive");
        }
        if self.sources.iter().all(|s| !s.enabled) {
            bail!("no enabled sources configured");
        }
        if let Some(source) = self.sources.iter().find(|s| s.name.trim().is_empty()) {
            bail!("source with url {} has an empty name", source.url);
        }
        Ok(())
    }

    pub fn enabled_sources(&self) -> Vec<SourceConfig> {
        self.sources.iter().filter(|s| s.enabled).cloned().collect()
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Read a secret from the environment variable named in config.
/// Returns `None` when no variable is configured, or it is unset or blank.
pub fn secret_from_env(var_name: Option<&str>) -> Option<String> {
    let name = var_name?;
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Initialize an SQLite connection pool.
///
/// Creates the parent directory if necessary and the DB file if missing.
/// The pool is small: run history sees one writer per pipeline run.
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [[sources]]
        name = "techcrunch"
        url = "http://feeds.feedburner.com/TechCrunch/"
        categories = ["technology", "startups"]

        [[sources]]
        name = "disabled"
        url = "https://example.com/rss"
        enabled = false
    "#;

    #[test]
    fn config_defaults_apply() {
        let cfg: Config = toml::from_str(MINIMAL).expect("parse config");
        assert_eq!(cfg.sources.len(), 2);
        assert_eq!(cfg.dedup.threshold(), 0.85);
        assert_eq!(cfg.dedup.max_features(), 5000);
        assert_eq!(cfg.sources[0].max_articles(), 50);
        assert!(cfg.tts.enabled());
        assert_eq!(cfg.enabled_sources().len(), 1);
        assert!(cfg.validate().is_ok());

        let llm = LlmConfig::default();
        assert_eq!(llm.max_tokens(), 1000);
        assert_eq!(llm.meta_max_tokens(), 4000);
    }

    #[test]
    fn validate_rejects_threshold_out_of_range() {
        let mut cfg: Config = toml::from_str(MINIMAL).expect("parse config");
        cfg.dedup.threshold = Some(1.5);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_no_enabled_sources() {
        let mut cfg: Config = toml::from_str(MINIMAL).expect("parse config");
        cfg.sources.retain(|s| !s.enabled);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("no enabled sources"));
    }

    #[tokio::test]
    async fn override_file_wins_over_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let default_path = dir.path().join("config.default.toml");
        let override_path = dir.path().join("config.toml");

        tokio::fs::write(&default_path, format!("{}\n[dedup]\nthreshold = 0.85\nmax_features = 100\n", MINIMAL))
            .await
            .expect("write default");
        tokio::fs::write(&override_path, "[dedup]\nthreshold = 0.9\n")
            .await
            .expect("write override");

        let cfg = Config::load_with_defaults(Some(&default_path), Some(&override_path))
            .await
            .expect("load config");

        assert_eq!(cfg.dedup.threshold(), 0.9);
        assert_eq!(cfg.dedup.max_features(), 100);
        assert_eq!(cfg.sources.len(), 2);
    }

    #[test]
    fn secret_from_env_ignores_blank_values() {
        std::env::set_var("NEWSCAST_TEST_BLANK_SECRET", "   ");
        assert_eq!(secret_from_env(Some("NEWSCAST_TEST_BLANK_SECRET")), None);
        std::env::set_var("NEWSCAST_TEST_SECRET", " abc \n");
        assert_eq!(secret_from_env(Some("NEWSCAST_TEST_SECRET")).as_deref(), Some("abc"));
        assert_eq!(secret_from_env(None), None);
    }

    #[tokio::test]
    async fn db_pool_creates_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("nested").join("history.db");
        let pool = init_db_pool(&db_path.to_string_lossy()).await.expect("init pool");
        let conn = pool.acquire().await.expect("acquire conn");
        drop(conn);
        assert!(db_path.exists());
    }
}
