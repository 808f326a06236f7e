//! TF-IDF vectorization and cosine similarity over one batch of articles.
//!
//! The vocabulary and IDF weights are fitted on the batch being scored and
//! dropped afterwards; nothing is shared between calls.

use std::collections::{HashMap, HashSet};

use super::resolver::SimilarityPair;
use super::stopwords;
use crate::model::Article;

/// Sparse, L2-normalized document vector sorted by term index.
type SparseVector = Vec<(usize, f64)>;

/// Pairwise textual similarity scorer (unigrams + bigrams, English stop words removed).
#[derive(Debug, Clone)]
pub struct SimilarityScorer {
    max_features: usize,
}

/// Dense symmetric `n x n` similarity matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatrix {
    n: usize,
    scores: Vec<f64>,
}

impl SimilarityMatrix {
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.scores[i * self.n + j]
    }
}

impl Default for SimilarityScorer {
    fn default() -> Self {
        Self::new(common::DEFAULT_MAX_FEATURES)
    }
}

impl SimilarityScorer {
    pub fn new(max_features: usize) -> Self {
        Self {
            max_features: max_features.max(1),
        }
    }

    /// Score every pair of articles in the batch.
    pub fn score_matrix(&self, articles: &[Article]) -> SimilarityMatrix {
        let texts: Vec<String> = articles.iter().map(Article::comparison_text).collect();
        self.score_texts(&texts)
    }

    pub fn score_texts(&self, texts: &[String]) -> SimilarityMatrix {
        let n = texts.len();
        let vectors = fit_transform(texts, self.max_features);
        let mut scores = vec![0.0; n * n];

        for i in 0..n {
            scores[i * n + i] = if vectors[i].is_empty() { 0.0 } else { 1.0 };
            for j in (i + 1)..n {
                let score = cosine(&vectors[i], &vectors[j]);
                scores[i * n + j] = score;
                scores[j * n + i] = score;
            }
        }

        SimilarityMatrix { n, scores }
    }

    /// Pairs `(i, j)`, `i < j`, whose similarity is strictly above `threshold`.
    /// Batches with fewer than two articles are not vectorized at all.
    pub fn find_pairs(&self, articles: &[Article], threshold: f64) -> Vec<SimilarityPair> {
        if articles.len() < 2 {
            return Vec::new();
        }

        let matrix = self.score_matrix(articles);
        let mut pairs = Vec::new();
        for i in 0..matrix.len() {
            for j in (i + 1)..matrix.len() {
                let score = matrix.get(i, j);
                if score > threshold {
                    pairs.push(SimilarityPair::new(i, j, score));
                }
            }
        }
        pairs
    }
}

/// Split on non-word characters, keeping tokens of two or more characters.
fn tokenize<'a>(text: &'a str, stop_words: &HashSet<&'static str>) -> Vec<&'a str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.chars().count() >= 2)
        .filter(|t| !stop_words.contains(t))
        .collect()
}

fn term_counts(text: &str, stop_words: &HashSet<&'static str>) -> HashMap<String, usize> {
    let tokens = tokenize(text, stop_words);
    let mut counts = HashMap::new();

    for token in &tokens {
        *counts.entry((*token).to_string()).or_insert(0) += 1;
    }
    for window in tokens.windows(2) {
        *counts.entry(format!("{} {}", window[0], window[1])).or_insert(0) += 1;
    }
    counts
}

fn fit_transform(texts: &[String], max_features: usize) -> Vec<SparseVector> {
    let stop_words = stopwords::english();
    let docs: Vec<HashMap<String, usize>> = texts.iter().map(|t| term_counts(t, &stop_words)).collect();

    let mut corpus_freq: HashMap<&str, usize> = HashMap::new();
    let mut doc_freq: HashMap<&str, usize> = HashMap::new();
    for doc in &docs {
        for (term, count) in doc {
            *corpus_freq.entry(term.as_str()).or_insert(0) += count;
            *doc_freq.entry(term.as_str()).or_insert(0) += 1;
        }
    }

    // Keep the most frequent terms; ties broken alphabetically so the cut is deterministic.
    let mut ranked: Vec<(&str, usize)> = corpus_freq.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(max_features);

    let mut kept: Vec<&str> = ranked.into_iter().map(|(term, _)| term).collect();
    kept.sort_unstable();

    let n_docs = texts.len() as f64;
    let vocabulary: HashMap<&str, (usize, f64)> = kept
        .iter()
        .enumerate()
        .map(|(index, term)| {
            let df = doc_freq.get(term).copied().unwrap_or(0) as f64;
            let idf = ((1.0 + n_docs) / (1.0 + df)).ln() + 1.0;
            (*term, (index, idf))
        })
        .collect();

    docs.iter()
        .map(|doc| {
            let mut vector: SparseVector = doc
                .iter()
                .filter_map(|(term, count)| {
                    vocabulary
                        .get(term.as_str())
                        .map(|(index, idf)| (*index, *count as f64 * idf))
                })
                .collect();
            vector.sort_unstable_by_key(|(index, _)| *index);

            let norm = vector.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
            if norm == 0.0 {
                return Vec::new();
            }
            for (_, weight) in vector.iter_mut() {
                *weight /= norm;
            }
            vector
        })
        .collect()
}

/// Cosine similarity of two normalized vectors; zero vectors score 0.0.
fn cosine(a: &SparseVector, b: &SparseVector) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let (mut i, mut j) = (0, 0);
    let mut dot = 0.0;
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                dot += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    dot.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn tokenize_drops_stop_words_and_single_chars() {
        let stop = stopwords::english();
        let tokens = tokenize("the central bank raised a rate, x y 2024", &stop);
        assert_eq!(tokens, vec!["central", "bank", "raised", "rate", "2024"]);
    }

    #[test]
    fn term_counts_include_bigrams_after_stop_word_removal() {
        let stop = stopwords::english();
        let counts = term_counts("bank of england raises rates", &stop);
        assert_eq!(counts.get("bank england"), Some(&1));
        assert_eq!(counts.get("raises rates"), Some(&1));
        assert!(!counts.contains_key("of"));
    }

    #[test]
    fn identical_texts_score_one() {
        let scorer = SimilarityScorer::default();
        let matrix = scorer.score_texts(&texts(&[
            "markets rally as inflation cools",
            "markets rally as inflation cools",
            "volcano erupts near remote island village",
        ]));
        assert!((matrix.get(0, 1) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn disjoint_vocabularies_score_zero() {
        let scorer = SimilarityScorer::default();
        let matrix = scorer.score_texts(&texts(&[
            "football championship final tonight",
            "quantum computing breakthrough announced",
        ]));
        assert_eq!(matrix.get(0, 1), 0.0);
    }

    #[test]
    fn matrix_is_symmetric() {
        let scorer = SimilarityScorer::default();
        let matrix = scorer.score_texts(&texts(&[
            "electric cars sales climb in europe",
            "europe electric vehicle sales climb again",
            "new species of frog discovered in peru",
            "sales of frog themed toys climb",
        ]));
        for i in 0..matrix.len() {
            for j in 0..matrix.len() {
                assert_eq!(matrix.get(i, j), matrix.get(j, i));
                assert!((0.0..=1.0).contains(&matrix.get(i, j)));
            }
        }
    }

    #[test]
    fn empty_texts_score_zero_not_nan() {
        let scorer = SimilarityScorer::default();
        let matrix = scorer.score_texts(&texts(&["", "  ", "the and of"]));
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(matrix.get(i, j), 0.0);
            }
        }
    }

    #[test]
    fn fewer_than_two_articles_yield_no_pairs() {
        let scorer = SimilarityScorer::default();
        assert!(scorer.find_pairs(&[], 0.5).is_empty());
        let single = [Article::new("feed", "only one", "https://example.com/1")];
        assert!(scorer.find_pairs(&single, 0.0).is_empty());
    }

    #[test]
    fn vocabulary_cap_limits_features() {
        // With a single feature only the most frequent term survives, so the
        // documents sharing it become identical.
        let scorer = SimilarityScorer::new(1);
        let matrix = scorer.score_texts(&texts(&[
            "economy economy economy growth",
            "economy economy economy recession",
        ]));
        assert!((matrix.get(0, 1) - 1.0).abs() < 1e-9);
    }
}
