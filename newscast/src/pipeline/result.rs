use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use super::stats::RunStatistics;
use crate::delivery::DeliveryResult;
use crate::speech::AudioFile;
use crate::stage::Branch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// The produced podcast and where it went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodcastInfo {
    pub local_file: PathBuf,
    pub duration_minutes: f64,
    pub size_mb: f64,
    pub engine: String,
    pub branch: Branch,
    pub archive_path: Option<PathBuf>,
}

impl PodcastInfo {
    pub fn from_audio(audio: AudioFile, branch: Branch) -> Self {
        Self {
            local_file: audio.path,
            duration_minutes: audio.duration_minutes,
            size_mb: audio.size_mb,
            engine: audio.engine,
            branch,
            archive_path: None,
        }
    }
}

/// Everything a caller learns about one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
    pub articles_processed: usize,
    pub meta_summary: Option<String>,
    pub podcast: Option<PodcastInfo>,
    pub delivery: Option<DeliveryResult>,
    pub statistics: RunStatistics,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// Error result carrying whatever statistics were gathered.
    pub fn failed(error: impl Into<String>, statistics: RunStatistics) -> Self {
        Self {
            run_id: statistics.run_id,
            status: RunStatus::Error,
            timestamp: statistics.finished_at.unwrap_or_else(Utc::now),
            error: Some(error.into()),
            articles_processed: 0,
            meta_summary: None,
            podcast: None,
            delivery: None,
            statistics,
        }
    }
}
