use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::pipeline::RunResult;

const ARCHIVE_PREFIX: &str = "podcast_";
const ARCHIVE_STAMP: &str = "%Y%m%d_%H%M%S";

/// An archived podcast file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedPodcast {
    pub file_name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub archived_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub deleted: Vec<String>,
    pub kept: usize,
    pub retention_days: i64,
}

/// Local podcast archive with time-based retention.
///
/// Archived names carry their archive time (`podcast_YYYYmmdd_HHMMSS_<name>`),
/// which retention uses in preference to filesystem timestamps.
#[derive(Debug, Clone)]
pub struct PodcastArchive {
    dir: PathBuf,
    retention_days: i64,
}

impl PodcastArchive {
    pub fn new(dir: impl Into<PathBuf>, retention_days: i64) -> Self {
        Self {
            dir: dir.into(),
            retention_days,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn retention_days(&self) -> i64 {
        self.retention_days
    }

    /// Copy `source` into the archive. Returns the archived path.
    pub async fn archive(&self, source: &Path, now: DateTime<Utc>) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create archive dir {}", self.dir.display()))?;

        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("podcast path has no file name")?;
        let target = self
            .dir
            .join(format!("{}{}_{}", ARCHIVE_PREFIX, now.format(ARCHIVE_STAMP), name));

        tokio::fs::copy(source, &target)
            .await
            .with_context(|| format!("failed to archive {}", source.display()))?;
        info!("Podcast archived: {}", target.display());
        Ok(target)
    }

    /// Archived podcasts, newest first. A missing archive dir is empty.
    pub async fn list(&self) -> Result<Vec<ArchivedPodcast>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", self.dir.display()))
            }
        };

        let mut podcasts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if !file_name.starts_with(ARCHIVE_PREFIX) {
                continue;
            }
            let archived_at = archive_time(&file_name)
                .or_else(|| metadata.modified().ok().map(DateTime::<Utc>::from))
                .unwrap_or_else(Utc::now);
            podcasts.push(ArchivedPodcast {
                file_name,
                path: entry.path(),
                size_bytes: metadata.len(),
                archived_at,
            });
        }

        podcasts.sort_by(|a, b| b.archived_at.cmp(&a.archived_at));
        Ok(podcasts)
    }

    /// Delete podcasts older than the retention period.
    /// A retention of zero or less disables cleanup.
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<CleanupReport> {
        let mut report = CleanupReport {
            retention_days: self.retention_days,
            ..Default::default()
        };
        let podcasts = self.list().await?;

        if self.retention_days <= 0 {
            info!("Podcast cleanup disabled (retention_days <= 0)");
            report.kept = podcasts.len();
            return Ok(report);
        }

        let cutoff = now - Duration::days(self.retention_days);
        for podcast in podcasts {
            if podcast.archived_at >= cutoff {
                report.kept += 1;
                continue;
            }
            match tokio::fs::remove_file(&podcast.path).await {
                Ok(()) => {
                    debug!("Deleted expired podcast {}", podcast.file_name);
                    report.deleted.push(podcast.file_name);
                }
                Err(e) => {
                    warn!("Could not delete {}: {}", podcast.path.display(), e);
                    report.kept += 1;
                }
            }
        }

        info!(
            "Podcast cleanup: {} deleted, {} kept",
            report.deleted.len(),
            report.kept
        );
        Ok(report)
    }
}

fn archive_time(file_name: &str) -> Option<DateTime<Utc>> {
    let stamp = file_name.strip_prefix(ARCHIVE_PREFIX)?.get(..15)?;
    let naive = NaiveDateTime::parse_from_str(stamp, ARCHIVE_STAMP).ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Stored summary of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub articles_processed: i64,
    pub error: Option<String>,
    pub statistics: serde_json::Value,
}

/// Run history in SQLite.
#[derive(Debug, Clone)]
pub struct RunHistory {
    pool: SqlitePool,
}

impl RunHistory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the database at `path` and create the table if needed.
    pub async fn open(path: &str) -> Result<Self> {
        let pool = common::init_db_pool(path).await?;
        let history = Self::new(pool);
        history.ensure_schema().await?;
        Ok(history)
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_runs (
                run_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                articles_processed INTEGER NOT NULL,
                error TEXT,
                statistics_json TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create pipeline_runs table")?;
        Ok(())
    }

    pub async fn record(&self, result: &RunResult) -> Result<()> {
        let statistics = serde_json::to_string(&result.statistics)
            .context("failed to serialize run statistics")?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO pipeline_runs
            (run_id, status, started_at, finished_at, articles_processed, error, statistics_json)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(result.run_id.to_string())
        .bind(result.status.as_str())
        .bind(result.statistics.started_at)
        .bind(result.statistics.finished_at)
        .bind(result.articles_processed as i64)
        .bind(&result.error)
        .bind(&statistics)
        .execute(&self.pool)
        .await
        .context("failed to insert pipeline run")?;

        debug!("Stored run {}", result.run_id);
        Ok(())
    }

    /// Most recent runs first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, status, started_at, finished_at, articles_processed, error, statistics_json
            FROM pipeline_runs
            ORDER BY started_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to list pipeline runs")?;

        rows.into_iter()
            .map(|row| -> Result<RunRecord> {
                let statistics: String = row.try_get("statistics_json")?;
                Ok(RunRecord {
                    run_id: row.try_get("run_id")?,
                    status: row.try_get("status")?,
                    started_at: row.try_get("started_at")?,
                    finished_at: row.try_get("finished_at")?,
                    articles_processed: row.try_get("articles_processed")?,
                    error: row.try_get("error")?,
                    statistics: serde_json::from_str(&statistics)
                        .context("stored statistics are not valid JSON")?,
                })
            })
            .collect()
    }
}
