//! In-memory vector index over sparse TF-IDF weights with cosine scoring.
//!
//! Documents are stored as raw term counts; weights are derived at query time
//! from the current corpus statistics, so scores never go stale as documents
//! arrive and there is no re-embedding step. A real embedding model can sit
//! behind the same [`SparseVector`] shape.

use std::collections::HashMap;

use super::tokenizer::{TermCounts, Vocabulary};
use super::ScoredId;

/// Sparse weight vector keyed by term id.
#[derive(Debug, Clone, Default)]
pub struct SparseVector {
    weights: HashMap<u32, f32>,
    norm: f32,
}

impl SparseVector {
    pub fn from_weights(weights: HashMap<u32, f32>) -> Self {
        let norm = weights.values().fold(0.0f32, |acc, w| acc + w * w).sqrt();
        Self { weights, norm }
    }

    /// Cosine of the angle between two sparse vectors. Iterates the smaller
    /// side and probes the larger, so disjoint supports cost nothing.
    pub fn similarity(&self, other: &SparseVector) -> f32 {
        if self.norm == 0.0 || other.norm == 0.0 {
            return 0.0;
        }
        let (probe, table) = if self.weights.len() <= other.weights.len() {
            (self, other)
        } else {
            (other, self)
        };
        let overlap: f32 = probe
            .weights
            .iter()
            .filter_map(|(term, w)| table.weights.get(term).map(|v| w * v))
            .sum();
        overlap / (self.norm * other.norm)
    }

    /// Number of nonzero terms.
    pub fn support(&self) -> usize {
        self.weights.len()
    }

    pub fn is_zero(&self) -> bool {
        self.norm == 0.0
    }
}

struct IndexedDoc {
    id: String,
    counts: TermCounts,
}

/// TF-IDF vector index. Document frequencies are tracked incrementally and
/// applied when vectors are materialized, never baked into stored state.
pub struct VectorIndex {
    vocabulary: Vocabulary,
    docs: Vec<IndexedDoc>,
    texts: HashMap<String, String>,
    docs_with_term: HashMap<u32, u32>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self {
            vocabulary: Vocabulary::new(),
            docs: Vec::new(),
            texts: HashMap::new(),
            docs_with_term: HashMap::new(),
        }
    }

    pub fn insert(&mut self, id: impl Into<String>, content: &str) {
        let id = id.into();
        let counts = self.vocabulary.count_terms(content);
        for (term, _) in counts.terms() {
            *self.docs_with_term.entry(term).or_default() += 1;
        }
        self.texts.insert(id.clone(), content.to_string());
        self.docs.push(IndexedDoc { id, counts });
    }

    /// Materialize arbitrary text as a weight vector against the current
    /// corpus statistics.
    pub fn embed(&self, text: &str) -> SparseVector {
        self.weigh(&self.vocabulary.count_known_terms(text))
    }

    pub fn search(&self, query: &str, top_k: usize) -> Vec<ScoredId> {
        let query_vector = self.embed(query);
        self.search_vector(&query_vector, top_k)
    }

    pub fn search_vector(&self, query: &SparseVector, top_k: usize) -> Vec<ScoredId> {
        if query.is_zero() {
            return Vec::new();
        }
        let mut hits: Vec<ScoredId> = self
            .docs
            .iter()
            .filter_map(|doc| {
                let score = query.similarity(&self.weigh(&doc.counts));
                (score > 0.0).then(|| ScoredId {
                    id: doc.id.clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        hits
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn content(&self, id: &str) -> Option<&str> {
        self.texts.get(id).map(|s| s.as_str())
    }

    /// Term frequency scaled by inverse document frequency, sparse.
    fn weigh(&self, counts: &TermCounts) -> SparseVector {
        let length = counts.total_terms();
        if length == 0 {
            return SparseVector::default();
        }
        let corpus = self.docs.len().max(1) as f32;

        let weights = counts
            .terms()
            .map(|(term, occurrences)| {
                let seen_in = self.docs_with_term.get(&term).copied().unwrap_or(1).max(1) as f32;
                let rarity = (corpus / seen_in).ln() + 1.0;
                (term, occurrences as f32 / length as f32 * rarity)
            })
            .collect();
        SparseVector::from_weights(weights)
    }
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}
