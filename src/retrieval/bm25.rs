//! Okapi BM25 lexical index with corpus-level document frequencies.

use std::collections::HashMap;

use super::tokenizer::{TermCounts, Vocabulary};
use super::ScoredId;

const DEFAULT_K1: f32 = 1.5;
const DEFAULT_B: f32 = 0.75;

struct Bm25Doc {
    id: String,
    counts: TermCounts,
}

/// BM25 index over the bag-of-terms view of each document.
pub struct Bm25Index {
    vocabulary: Vocabulary,
    docs: Vec<Bm25Doc>,
    docs_with_term: HashMap<u32, u32>,
    total_terms: u64,
    k1: f32,
    b: f32,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self {
            vocabulary: Vocabulary::new(),
            docs: Vec::new(),
            docs_with_term: HashMap::new(),
            total_terms: 0,
            k1: DEFAULT_K1,
            b: DEFAULT_B,
        }
    }

    pub fn with_parameters(mut self, k1: f32, b: f32) -> Self {
        self.k1 = k1;
        self.b = b;
        self
    }

    pub fn insert(&mut self, id: impl Into<String>, content: &str) {
        let counts = self.vocabulary.count_terms(content);
        for (term, _) in counts.terms() {
            *self.docs_with_term.entry(term).or_default() += 1;
        }
        self.total_terms += u64::from(counts.total_terms());
        self.docs.push(Bm25Doc {
            id: id.into(),
            counts,
        });
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn search(&self, query: &str, top_k: usize) -> Vec<ScoredId> {
        let query_counts = self.vocabulary.count_known_terms(query);
        if self.docs.is_empty() || query_counts.is_empty() {
            return Vec::new();
        }

        let corpus = self.docs.len() as f32;
        let mean_length = self.total_terms as f32 / corpus;

        let mut hits: Vec<ScoredId> = self
            .docs
            .iter()
            .filter_map(|doc| {
                let score: f32 = query_counts
                    .terms()
                    .map(|(term, _)| self.term_score(doc, term, corpus, mean_length))
                    .sum();
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

    /// One query term's contribution to one document's score.
    fn term_score(&self, doc: &Bm25Doc, term: u32, corpus: f32, mean_length: f32) -> f32 {
        let occurrences = doc.counts.count(term) as f32;
        if occurrences == 0.0 {
            return 0.0;
        }
        let seen_in = self.docs_with_term.get(&term).copied().unwrap_or(0) as f32;
        let rarity = (1.0 + (corpus - seen_in + 0.5) / (seen_in + 0.5)).ln();
        let length_ratio = doc.counts.total_terms() as f32 / mean_length.max(1.0);
        let saturation =
            occurrences + self.k1 * (1.0 - self.b + self.b * length_ratio);
        rarity * occurrences * (self.k1 + 1.0) / saturation
    }
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::new()
    }
}
