//! Run-scoped statistics accumulator.
//!
//! Each `record_*` method is called once, after its stage has fully
//! completed, so a cancelled or failed run only reports finished stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dedup::RemovalRecord;
use crate::stage::Branch;

/// Pipeline phases in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Fetching,
    Extracting,
    Deduplicating,
    Summarizing,
    MetaSummarizing,
    Synthesizing,
    Delivering,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Fetching => "fetching",
            Self::Extracting => "extracting",
            Self::Deduplicating => "deduplicating",
            Self::Summarizing => "summarizing",
            Self::MetaSummarizing => "meta-summarizing",
            Self::Synthesizing => "synthesizing",
            Self::Delivering => "delivering",
        };
        f.write_str(s)
    }
}

/// How an aggregate stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchMarker {
    Primary,
    Fallback,
    /// Both paths failed
    Failed,
    /// Not attempted: disabled, not configured or nothing to work on
    Skipped,
}

impl From<Branch> for BranchMarker {
    fn from(branch: Branch) -> Self {
        match branch {
            Branch::Primary => Self::Primary,
            Branch::Fallback => Self::Fallback,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: f64,

    pub articles_fetched: usize,
    /// Articles whose page extraction produced text
    pub articles_extracted: usize,
    pub extraction_failures: usize,
    pub articles_after_dedup: usize,
    pub duplicates_removed: usize,
    pub duplicate_pairs: usize,
    pub removals: Vec<RemovalRecord>,

    pub summaries_primary: usize,
    /// Articles whose primary summarization failed
    pub summaries_fallback: usize,
    /// Subset of `summaries_fallback` where the fallback failed as well
    pub summaries_failed: usize,

    pub meta_summary_branch: Option<BranchMarker>,
    pub synthesis_branch: Option<BranchMarker>,
    pub delivery_branch: Option<BranchMarker>,
    pub podcast_created: bool,
    pub delivered: bool,

    pub stages_completed: Vec<PipelineStage>,
    pub cancelled: bool,
    pub errors: Vec<String>,
}

impl RunStatistics {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: None,
            duration_seconds: 0.0,
            articles_fetched: 0,
            articles_extracted: 0,
            extraction_failures: 0,
            articles_after_dedup: 0,
            duplicates_removed: 0,
            duplicate_pairs: 0,
            removals: Vec::new(),
            summaries_primary: 0,
            summaries_fallback: 0,
            summaries_failed: 0,
            meta_summary_branch: None,
            synthesis_branch: None,
            delivery_branch: None,
            podcast_created: false,
            delivered: false,
            stages_completed: Vec::new(),
            cancelled: false,
            errors: Vec::new(),
        }
    }

    pub fn has_completed(&self, stage: PipelineStage) -> bool {
        self.stages_completed.contains(&stage)
    }

    fn complete(&mut self, stage: PipelineStage) {
        if !self.has_completed(stage) {
            self.stages_completed.push(stage);
        }
    }

    pub(crate) fn record_fetch(&mut self, fetched: usize) {
        self.articles_fetched = fetched;
        self.complete(PipelineStage::Fetching);
    }

    pub(crate) fn record_extraction(&mut self, extracted: usize, failed: usize) {
        self.articles_extracted = extracted;
        self.extraction_failures = failed;
        self.complete(PipelineStage::Extracting);
    }

    pub(crate) fn record_dedup(&mut self, kept: usize, pairs: usize, removals: Vec<RemovalRecord>) {
        self.articles_after_dedup = kept;
        self.duplicates_removed = removals.len();
        self.duplicate_pairs = pairs;
        self.removals = removals;
        self.complete(PipelineStage::Deduplicating);
    }

    pub(crate) fn record_summaries(&mut self, primary: usize, fallback: usize, failed: usize) {
        self.summaries_primary = primary;
        self.summaries_fallback = fallback;
        self.summaries_failed = failed;
        self.complete(PipelineStage::Summarizing);
    }

    pub(crate) fn record_meta_summary(&mut self, marker: BranchMarker) {
        self.meta_summary_branch = Some(marker);
        self.complete(PipelineStage::MetaSummarizing);
    }

    pub(crate) fn record_synthesis(&mut self, marker: BranchMarker, podcast_created: bool) {
        self.synthesis_branch = Some(marker);
        self.podcast_created = podcast_created;
        self.complete(PipelineStage::Synthesizing);
    }

    pub(crate) fn record_delivery(&mut self, marker: BranchMarker, delivered: bool) {
        self.delivery_branch = Some(marker);
        self.delivered = delivered;
        self.complete(PipelineStage::Delivering);
    }

    pub(crate) fn push_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub(crate) fn finish(&mut self, finished_at: DateTime<Utc>) {
        self.finished_at = Some(finished_at);
        self.duration_seconds = (finished_at - self.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
    }

    /// One-line run summary for logs.
    pub fn summary_line(&self) -> String {
        let mark = |ok: bool| if ok { "yes" } else { "no" };
        format!(
            "{} fetched -> {} after dedup -> {} AI summaries -> podcast: {} -> delivered: {}",
            self.articles_fetched,
            self.articles_after_dedup,
            self.summaries_primary,
            mark(self.podcast_created),
            mark(self.delivered)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn stages_are_recorded_once() {
        let mut stats = RunStatistics::new(Uuid::new_v4(), Utc::now());
        stats.record_fetch(5);
        stats.record_fetch(5);
        assert_eq!(stats.stages_completed, vec![PipelineStage::Fetching]);
        assert_eq!(stats.articles_fetched, 5);
    }

    #[test]
    fn dedup_counts_come_from_removals() {
        let mut stats = RunStatistics::new(Uuid::new_v4(), Utc::now());
        let removal = RemovalRecord {
            removed_index: 1,
            kept_index: 0,
            score: 0.97,
            removed_title: "t".into(),
            removed_link: "l".into(),
            removed_source: "s".into(),
        };
        stats.record_dedup(3, 2, vec![removal]);
        assert_eq!(stats.duplicates_removed, 1);
        assert_eq!(stats.duplicate_pairs, 2);
        assert_eq!(stats.articles_after_dedup, 3);
    }

    #[test]
    fn finish_sets_duration() {
        let start = Utc::now();
        let mut stats = RunStatistics::new(Uuid::new_v4(), start);
        stats.finish(start + Duration::milliseconds(1500));
        assert!((stats.duration_seconds - 1.5).abs() < 1e-9);
        assert!(stats.finished_at.is_some());
    }

    #[test]
    fn serializes_markers_in_snake_case() {
        let mut stats = RunStatistics::new(Uuid::new_v4(), Utc::now());
        stats.record_meta_summary(BranchMarker::Fallback);
        stats.record_synthesis(BranchMarker::Skipped, false);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["meta_summary_branch"], "fallback");
        assert_eq!(json["synthesis_branch"], "skipped");
        assert_eq!(json["stages_completed"][0], "meta_summarizing");
    }
}
