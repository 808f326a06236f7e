// Near-duplicate detection for one batch of articles
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::Article;

pub mod resolver;
pub mod similarity;
mod stopwords;

pub use resolver::{DuplicateResolver, RemovalDecision, SimilarityPair};
pub use similarity::{SimilarityMatrix, SimilarityScorer};

/// Audit entry for one removed article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalRecord {
    pub removed_index: usize,
    pub kept_index: usize,
    pub score: f64,
    pub removed_title: String,
    pub removed_link: String,
    pub removed_source: String,
}

/// Batch after duplicate removal, in original order.
#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub kept: Vec<Article>,
    pub removed: Vec<Article>,
    pub decision: RemovalDecision,
    pub records: Vec<RemovalRecord>,
}

/// Scorer + resolver pair. Holds configuration only; every call fits a
/// fresh vocabulary on its own batch.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    scorer: SimilarityScorer,
    resolver: DuplicateResolver,
}

impl Deduplicator {
    pub fn new(threshold: f64, max_features: usize) -> Self {
        Self {
            scorer: SimilarityScorer::new(max_features),
            resolver: DuplicateResolver::new(threshold),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.resolver.threshold()
    }

    /// Decide removals without touching the batch.
    pub fn decide(&self, batch: &[Article]) -> RemovalDecision {
        let pairs = self.scorer.find_pairs(batch, self.resolver.threshold());
        self.resolver.resolve(batch, &pairs)
    }

    pub fn deduplicate(&self, batch: Vec<Article>) -> DedupOutcome {
        let original = batch.len();
        debug!("Checking for duplicates among {} articles", original);

        let decision = self.decide(&batch);
        let records = decision
            .causes
            .iter()
            .map(|(&removed, pair)| {
                let kept = if pair.index_a == removed { pair.index_b } else { pair.index_a };
                let article = &batch[removed];
                RemovalRecord {
                    removed_index: removed,
                    kept_index: kept,
                    score: pair.score,
                    removed_title: article.title.clone(),
                    removed_link: article.link.clone(),
                    removed_source: article.source.clone(),
                }
            })
            .collect();

        let (removed, kept): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .enumerate()
            .partition(|(index, _)| decision.is_removed(*index));
        let kept: Vec<Article> = kept.into_iter().map(|(_, a)| a).collect();
        let removed: Vec<Article> = removed.into_iter().map(|(_, a)| a).collect();

        info!(
            pairs = decision.pairs_found(),
            removed = removed.len(),
            "Deduplication complete: {} -> {} articles",
            original,
            kept.len()
        );

        DedupOutcome {
            kept,
            removed,
            decision,
            records,
        }
    }
}
