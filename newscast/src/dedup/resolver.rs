//! Keep/drop policy turning similarity pairs into a removal set.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::model::Article;

/// Candidate duplicate relationship between two batch positions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityPair {
    pub index_a: usize,
    pub index_b: usize,
    pub score: f64,
}

impl SimilarityPair {
    /// Build a pair with canonical ordering (`index_a < index_b`).
    pub fn new(i: usize, j: usize, score: f64) -> Self {
        Self {
            index_a: i.min(j),
            index_b: i.max(j),
            score,
        }
    }
}

/// Indices to exclude from the batch and the pair that first caused each exclusion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemovalDecision {
    pub removed: BTreeSet<usize>,
    pub causes: BTreeMap<usize, SimilarityPair>,
    /// Every pair considered, in scoring order
    pub pairs: Vec<SimilarityPair>,
}

impl RemovalDecision {
    pub fn pairs_found(&self) -> usize {
        self.pairs.len()
    }

    pub fn removal_count(&self) -> usize {
        self.removed.len()
    }

    pub fn is_removed(&self, index: usize) -> bool {
        self.removed.contains(&index)
    }

    pub fn cause_of(&self, index: usize) -> Option<&SimilarityPair> {
        self.causes.get(&index)
    }
}

/// Pairwise duplicate resolver.
///
/// Each pair above the threshold is decided on its own: the article with the
/// strictly shorter `full_text` loses, ties drop the higher index. Losers of
/// all pairs are unioned; no transitive clustering is attempted, so A~B and
/// B~C never implies anything about A and C.
#[derive(Debug, Clone)]
pub struct DuplicateResolver {
    threshold: f64,
}

impl DuplicateResolver {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Index of the article to drop for one pair.
    pub fn loser(batch: &[Article], pair: &SimilarityPair) -> usize {
        let len_a = batch[pair.index_a].full_text_len();
        let len_b = batch[pair.index_b].full_text_len();
        if len_a >= len_b {
            pair.index_b
        } else {
            pair.index_a
        }
    }

    /// Pairs at or below the threshold, or pointing outside the batch, are ignored.
    pub fn resolve(&self, batch: &[Article], pairs: &[SimilarityPair]) -> RemovalDecision {
        let mut decision = RemovalDecision::default();

        for pair in pairs {
            if pair.score <= self.threshold || pair.index_b >= batch.len() || pair.index_a == pair.index_b {
                continue;
            }
            decision.pairs.push(*pair);

            let loser = Self::loser(batch, pair);
            if decision.removed.insert(loser) {
                decision.causes.insert(loser, *pair);
            }
        }

        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article_with_len(len: usize) -> Article {
        Article::new("feed", "title", format!("https://example.com/{}", len)).with_full_text("x".repeat(len))
    }

    #[test]
    fn pair_is_canonicalized() {
        let pair = SimilarityPair::new(4, 1, 0.9);
        assert_eq!((pair.index_a, pair.index_b), (1, 4));
    }

    #[test]
    fn shorter_full_text_is_removed() {
        let batch = vec![article_with_len(100), article_with_len(50)];
        let resolver = DuplicateResolver::new(0.85);

        let decision = resolver.resolve(&batch, &[SimilarityPair::new(0, 1, 0.95)]);
        assert_eq!(decision.removed, BTreeSet::from([1]));

        let reversed = vec![article_with_len(50), article_with_len(100)];
        let decision = resolver.resolve(&reversed, &[SimilarityPair::new(0, 1, 0.95)]);
        assert_eq!(decision.removed, BTreeSet::from([0]));
    }

    #[test]
    fn equal_lengths_remove_higher_index() {
        let batch = vec![article_with_len(70), article_with_len(70)];
        let decision = DuplicateResolver::new(0.85).resolve(&batch, &[SimilarityPair::new(0, 1, 0.99)]);
        assert_eq!(decision.removed, BTreeSet::from([1]));
    }

    #[test]
    fn failed_extractions_tie_and_drop_higher_index() {
        let batch = vec![
            Article::new("a", "t", "l1").with_full_text(""),
            Article::new("b", "t", "l2").with_full_text(""),
        ];
        let decision = DuplicateResolver::new(0.5).resolve(&batch, &[SimilarityPair::new(0, 1, 0.9)]);
        assert_eq!(decision.removed, BTreeSet::from([1]));
    }

    #[test]
    fn resolution_is_pairwise_not_transitive() {
        // A~B and B~C but not A~C. B is the shortest and loses both pairs;
        // A and C both survive even though they are linked through B.
        let batch = vec![article_with_len(300), article_with_len(10), article_with_len(200)];
        let pairs = [SimilarityPair::new(0, 1, 0.9), SimilarityPair::new(1, 2, 0.9)];
        let decision = DuplicateResolver::new(0.85).resolve(&batch, &pairs);
        assert_eq!(decision.removed, BTreeSet::from([1]));
        assert_eq!(decision.pairs_found(), 2);
        assert_eq!(decision.cause_of(1), Some(&pairs[0]));
    }

    #[test]
    fn chained_pairs_can_remove_middle_and_tail() {
        // B beats C, A beats B: both B and C are dropped by independent decisions.
        let batch = vec![article_with_len(300), article_with_len(200), article_with_len(100)];
        let pairs = [SimilarityPair::new(0, 1, 0.9), SimilarityPair::new(1, 2, 0.9)];
        let decision = DuplicateResolver::new(0.85).resolve(&batch, &pairs);
        assert_eq!(decision.removed, BTreeSet::from([1, 2]));
    }

    #[test]
    fn pairs_not_above_threshold_are_ignored() {
        let batch = vec![article_with_len(10), article_with_len(20)];
        let decision = DuplicateResolver::new(0.85).resolve(&batch, &[SimilarityPair::new(0, 1, 0.85)]);
        assert!(decision.removed.is_empty());
        assert_eq!(decision.pairs_found(), 0);
    }

    #[test]
    fn raising_threshold_never_grows_removal_set() {
        let batch: Vec<Article> = (1..=5).map(|i| article_with_len(i * 10)).collect();
        let pairs = vec![
            SimilarityPair::new(0, 1, 0.86),
            SimilarityPair::new(1, 2, 0.91),
            SimilarityPair::new(2, 3, 0.97),
            SimilarityPair::new(0, 4, 0.88),
        ];

        let mut previous = usize::MAX;
        for threshold in [0.0, 0.85, 0.87, 0.9, 0.95, 0.99] {
            let count = DuplicateResolver::new(threshold).resolve(&batch, &pairs).removal_count();
            assert!(count <= previous, "threshold {} grew removals", threshold);
            previous = count;
        }
    }
}
