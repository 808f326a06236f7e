//! Podcast audio: script assembly and the two speech engines.
//!
//! Engines only write a file. [`render`] measures the result and applies the
//! size limit so both branches of the synthesis stage are held to the same rules.

use base64::Engine as _;
use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::stage::{StageError, StageErrorKind, StageResult};

pub const DEFAULT_CLOUD_TTS_URL: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";

const PODCAST_TITLE: &str = "Daily News Summary";
const OUTRO: &str = "That concludes today's news summary.";

/// A synthesized podcast on local disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFile {
    pub path: PathBuf,
    pub duration_minutes: f64,
    pub size_mb: f64,
    pub engine: String,
}

#[async_trait::async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Short engine name reported in run output
    fn engine(&self) -> &str;

    /// Write `script` as audio to `output`.
    async fn synthesize(&self, script: &str, output: &Path) -> StageResult<()>;
}

/// Limits applied to every rendered file.
#[derive(Debug, Clone, Copy)]
pub struct AudioLimits {
    pub words_per_minute: u32,
    pub max_size_mb: f64,
}

impl Default for AudioLimits {
    fn default() -> Self {
        Self {
            words_per_minute: 150,
            max_size_mb: 25.0,
        }
    }
}

/// Run one engine and describe its output. `None` means the engine is not
/// configured and reports `Unavailable`.
pub async fn render(
    synthesizer: Option<&dyn SpeechSynthesizer>,
    script: &str,
    output: &Path,
    limits: AudioLimits,
) -> StageResult<AudioFile> {
    let synthesizer = synthesizer.ok_or_else(|| StageError::unavailable("speech engine not configured"))?;

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    synthesizer.synthesize(script, output).await?;

    let metadata = tokio::fs::metadata(output).await?;
    let size_mb = metadata.len() as f64 / (1024.0 * 1024.0);
    if metadata.len() == 0 {
        return Err(StageError::invalid_response(format!(
            "{} produced an empty file",
            synthesizer.engine()
        )));
    }
    if size_mb > limits.max_size_mb {
        if let Err(e) = tokio::fs::remove_file(output).await {
            warn!("Could not remove oversized podcast {}: {}", output.display(), e);
        }
        return Err(StageError::invalid_response(format!(
            "podcast is {:.1} MB, limit is {:.1} MB",
            size_mb, limits.max_size_mb
        )));
    }

    let audio = AudioFile {
        path: output.to_path_buf(),
        duration_minutes: estimate_duration_minutes(script, limits.words_per_minute),
        size_mb,
        engine: synthesizer.engine().to_string(),
    };
    info!(
        engine = %audio.engine,
        "Podcast created: {} ({:.1} min, {:.2} MB)",
        audio.path.display(),
        audio.duration_minutes,
        audio.size_mb
    );
    Ok(audio)
}

/// Spoken length from word count; no audio decoding.
pub fn estimate_duration_minutes(script: &str, words_per_minute: u32) -> f64 {
    let words = script.split_whitespace().count() as f64;
    words / f64::from(words_per_minute.max(1))
}

/// Intro, paced content and outro as one script.
pub fn podcast_script(content: &str, date: NaiveDate) -> String {
    let intro = format!(
        "Welcome to {} for {}.\n\nI'm your AI host.",
        PODCAST_TITLE,
        date.format("%B %d, %Y")
    );
    format!("{}\n\n{}\n\n{}", intro, add_pauses(content.trim()), OUTRO)
}

/// Ellipses after sentence ends read as short pauses.
fn add_pauses(content: &str) -> String {
    content
        .replace(". ", ". ... ")
        .replace('!', "! ... ")
        .replace('?', "? ... ")
}

pub fn podcast_file_name(date: NaiveDate) -> String {
    format!("daily_news_{}.wav", date.format("%Y%m%d"))
}

/// Google Text-to-Speech compatible REST engine.
pub struct CloudTts {
    client: Client,
    api_url: String,
    api_key: String,
    voice: String,
    language_code: String,
    timeout: Duration,
}

impl CloudTts {
    pub fn new(client: Client, api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
            voice: "en-US-Standard-F".to_string(),
            language_code: "en-US".to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>, language_code: impl Into<String>) -> Self {
        self.voice = voice.into();
        self.language_code = language_code.into();
        self
    }
}

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    input: SynthesisInput<'a>,
    voice: VoiceSelection<'a>,
    #[serde(rename = "audioConfig")]
    audio_config: AudioConfig,
}

#[derive(Serialize)]
struct SynthesisInput<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct VoiceSelection<'a> {
    #[serde(rename = "languageCode")]
    language_code: &'a str,
    name: &'a str,
}

#[derive(Serialize)]
struct AudioConfig {
    #[serde(rename = "audioEncoding")]
    audio_encoding: &'static str,
    #[serde(rename = "speakingRate")]
    speaking_rate: f32,
    pitch: f32,
}

#[derive(Deserialize)]
struct SynthesizeResponse {
    #[serde(rename = "audioContent")]
    audio_content: String,
}

#[async_trait::async_trait]
impl SpeechSynthesizer for CloudTts {
    fn engine(&self) -> &str {
        "cloud_tts"
    }

    async fn synthesize(&self, script: &str, output: &Path) -> StageResult<()> {
        let body = SynthesizeRequest {
            input: SynthesisInput { text: script },
            voice: VoiceSelection {
                language_code: &self.language_code,
                name: &self.voice,
            },
            audio_config: AudioConfig {
                audio_encoding: "LINEAR16",
                speaking_rate: 1.0,
                pitch: 0.0,
            },
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("X-Goog-Api-Key", &self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StageError::new(
                StageErrorKind::Http,
                format!("TTS API error {}: {}", status, text),
            ));
        }

        let payload: SynthesizeResponse = response.json().await?;
        let audio = base64::engine::general_purpose::STANDARD
            .decode(payload.audio_content.as_bytes())
            .map_err(|e| StageError::invalid_response(format!("audioContent is not base64: {}", e)))?;

        tokio::fs::write(output, &audio).await?;
        debug!("Cloud TTS wrote {} bytes to {}", audio.len(), output.display());
        Ok(())
    }
}

/// Local `espeak` engine.
pub struct EspeakTts {
    binary: String,
    voice: String,
    words_per_minute: u32,
    pitch: u32,
    amplitude: u32,
}

impl EspeakTts {
    pub fn new(binary: impl Into<String>, voice: impl Into<String>, words_per_minute: u32) -> Self {
        Self {
            binary: binary.into(),
            voice: voice.into(),
            words_per_minute,
            pitch: 45,
            amplitude: 110,
        }
    }

    /// Whether the binary can be started at all.
    pub async fn is_installed(&self) -> bool {
        tokio::process::Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map(|out| out.status.success())
            .unwrap_or(false)
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for EspeakTts {
    fn engine(&self) -> &str {
        "espeak"
    }

    async fn synthesize(&self, script: &str, output: &Path) -> StageResult<()> {
        // Scripts go through a file; long arguments hit command line limits
        let script_file = output.with_extension("txt");
        tokio::fs::write(&script_file, script).await?;

        let result = tokio::process::Command::new(&self.binary)
            .arg("-f")
            .arg(&script_file)
            .arg("-v")
            .arg(&self.voice)
            .arg("-s")
            .arg(self.words_per_minute.to_string())
            .arg("-p")
            .arg(self.pitch.to_string())
            .arg("-a")
            .arg(self.amplitude.to_string())
            .args(["-g", "10"])
            .arg("-w")
            .arg(output)
            .output()
            .await;

        if let Err(e) = tokio::fs::remove_file(&script_file).await {
            debug!("Could not remove {}: {}", script_file.display(), e);
        }

        let out = match result {
            Ok(out) => out,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StageError::unavailable(format!("{} is not installed", self.binary)));
            }
            Err(e) => return Err(e.into()),
        };

        if !out.status.success() {
            return Err(StageError::internal(format!(
                "espeak exited with {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(())
    }
}
