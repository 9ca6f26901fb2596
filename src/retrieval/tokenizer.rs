//! Term extraction shared by the lexical and vector indexes.
//!
//! Text is reduced to lowercase terms (runs of alphanumerics, `_`, `-`) and
//! represented as bag-of-terms counts against a growable vocabulary. Queries
//! are counted read-only so they cannot distort corpus statistics.

use std::collections::HashMap;

/// Bag-of-terms view of one piece of text.
#[derive(Debug, Clone, Default)]
pub struct TermCounts {
    counts: HashMap<u32, u32>,
    total: u32,
}

impl TermCounts {
    fn tally(&mut self, term: u32) {
        *self.counts.entry(term).or_default() += 1;
        self.total += 1;
    }

    /// Occurrences of one term.
    pub fn count(&self, term: u32) -> u32 {
        self.counts.get(&term).copied().unwrap_or(0)
    }

    /// All `(term, count)` pairs, unordered.
    pub fn terms(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.counts.iter().map(|(&term, &count)| (term, count))
    }

    /// Number of distinct terms.
    pub fn distinct(&self) -> usize {
        self.counts.len()
    }

    /// Total term occurrences (the document length).
    pub fn total_terms(&self) -> u32 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

/// Splits text into normalized terms. Everything that is not alphanumeric,
/// `_`, or `-` is a separator.
fn terms_of(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
        .filter(|term| !term.is_empty())
        .map(str::to_lowercase)
}

/// Growable term vocabulary mapping normalized terms to dense ids.
#[derive(Debug, Default)]
pub struct Vocabulary {
    ids: HashMap<String, u32>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a document's terms, assigning fresh ids to unseen terms.
    pub fn count_terms(&mut self, text: &str) -> TermCounts {
        let mut counts = TermCounts::default();
        for term in terms_of(text) {
            let next = self.ids.len() as u32;
            let id = *self.ids.entry(term).or_insert(next);
            counts.tally(id);
        }
        counts
    }

    /// Count only already-known terms; the vocabulary is left untouched.
    /// Used for queries.
    pub fn count_known_terms(&self, text: &str) -> TermCounts {
        let mut counts = TermCounts::default();
        for term in terms_of(text) {
            if let Some(&id) = self.ids.get(&term) {
                counts.tally(id);
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terms_split_on_punctuation() {
        let mut vocab = Vocabulary::new();
        let counts = vocab.count_terms("load_csv(path): KeyError!");
        assert_eq!(counts.distinct(), 3);
        assert_eq!(vocab.len(), 3);
    }

    #[test]
    fn terms_are_case_insensitive() {
        let mut vocab = Vocabulary::new();
        let upper = vocab.count_terms("Error");
        let lower = vocab.count_terms("error");
        assert_eq!(vocab.len(), 1);
        let (term, _) = upper.terms().next().unwrap();
        assert_eq!(lower.count(term), 1);
    }

    #[test]
    fn empty_text_counts_nothing() {
        let mut vocab = Vocabulary::new();
        assert!(vocab.count_terms("").is_empty());
        assert!(vocab.count_terms("  …  ").is_empty());
    }

    #[test]
    fn repeated_terms_accumulate() {
        let mut vocab = Vocabulary::new();
        let counts = vocab.count_terms("the cat and the mat and the hat");
        assert_eq!(counts.total_terms(), 8);
        let the_id = vocab.count_known_terms("the").terms().next().unwrap().0;
        assert_eq!(counts.count(the_id), 3);
    }

    #[test]
    fn hyphen_and_underscore_stay_inside_terms() {
        let mut vocab = Vocabulary::new();
        let counts = vocab.count_terms("customer_id dry-run");
        assert_eq!(counts.distinct(), 2);
    }

    #[test]
    fn known_term_counting_does_not_grow_vocab() {
        let mut vocab = Vocabulary::new();
        vocab.count_terms("known words only");
        let before = vocab.len();

        let query = vocab.count_known_terms("known unknown");
        assert_eq!(vocab.len(), before);
        assert_eq!(query.total_terms(), 1);
    }
}
