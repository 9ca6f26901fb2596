//! Hybrid retrieval core — BM25 + vector search with weighted score fusion,
//! file grouping, and a root-cause heuristic over error logs.
//!
//! Used to pre-seed and enrich the agent's knowledge of the codebase: index
//! file chunks once, then ask for the handful of files most likely to contain
//! the failure.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub mod bm25;
pub mod tokenizer;
pub mod vector;

use bm25::Bm25Index;
use vector::{SparseVector, VectorIndex};

// ─── Data Model ─────────────────────────────────────────────────────────────

/// A raw per-modality ranking entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredId {
    pub id: String,
    pub score: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocMetadata {
    pub file_path: String,
    pub file_name: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// An indexed chunk of a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub metadata: DocMetadata,
}

/// One fused search result with per-modality provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub id: String,
    pub score: f32,
    pub metadata: DocMetadata,
    pub bm25_score: f32,
    pub vector_score: f32,
    pub combined_score: f32,
}

/// Chunks of a single file bundled together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileGroup {
    pub file_path: String,
    pub file_name: String,
    pub chunks: Vec<FusedResult>,
    pub max_score: f32,
    pub total_score: f32,
}

// ─── Fusion Config ──────────────────────────────────────────────────────────

/// Words too common to count as significant error tokens.
pub const DEFAULT_STOPLIST: [&str; 24] = [
    "the", "and", "for", "with", "that", "this", "from", "have", "not", "are", "was", "were",
    "will", "your", "into", "when", "then", "them", "file", "line", "most", "recent", "call",
    "traceback",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default = "default_bm25_weight")]
    pub bm25_weight: f32,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
    #[serde(default = "default_stoplist")]
    pub stoplist: HashSet<String>,
}

fn default_bm25_weight() -> f32 {
    0.3
}
fn default_vector_weight() -> f32 {
    0.7
}
fn default_stoplist() -> HashSet<String> {
    DEFAULT_STOPLIST.iter().map(|s| s.to_string()).collect()
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            bm25_weight: default_bm25_weight(),
            vector_weight: default_vector_weight(),
            stoplist: default_stoplist(),
        }
    }
}

// ─── Score Fusion ───────────────────────────────────────────────────────────

/// Per-document fused score, before metadata attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedScore {
    pub id: String,
    pub bm25_score: f32,
    pub vector_score: f32,
    pub combined_score: f32,
}

/// Fuse two rankings. Weights are normalized to sum to 1; a document missing
/// from one ranking contributes 0 for that modality. Ties keep the incoming
/// vector order (vector hits are seeded first and the sort is stable).
pub fn fuse_rankings(
    vector_hits: &[ScoredId],
    bm25_hits: &[ScoredId],
    config: &FusionConfig,
) -> Vec<FusedScore> {
    let weight_sum = config.bm25_weight + config.vector_weight;
    let (bm25_weight, vector_weight) = if weight_sum > 0.0 {
        (config.bm25_weight / weight_sum, config.vector_weight / weight_sum)
    } else {
        (0.5, 0.5)
    };

    let mut order: Vec<String> = Vec::new();
    let mut vector_scores: HashMap<String, f32> = HashMap::new();
    let mut bm25_scores: HashMap<String, f32> = HashMap::new();

    for hit in vector_hits {
        if !vector_scores.contains_key(&hit.id) {
            order.push(hit.id.clone());
        }
        vector_scores.insert(hit.id.clone(), hit.score);
    }
    for hit in bm25_hits {
        if !vector_scores.contains_key(&hit.id) && !bm25_scores.contains_key(&hit.id) {
            order.push(hit.id.clone());
        }
        bm25_scores.insert(hit.id.clone(), hit.score);
    }

    let mut fused: Vec<FusedScore> = order
        .into_iter()
        .map(|id| {
            let bm25_score = bm25_scores.get(&id).copied().unwrap_or(0.0);
            let vector_score = vector_scores.get(&id).copied().unwrap_or(0.0);
            FusedScore {
                combined_score: bm25_weight * bm25_score + vector_weight * vector_score,
                id,
                bm25_score,
                vector_score,
            }
        })
        .collect();

    fused.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    fused
}

// ─── Query Preparation ──────────────────────────────────────────────────────

fn error_capture_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)(?:error|exception|failed):\s*([^\n]+)").expect("pattern"))
}

fn stack_entry_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)\bat\s+([\w$.]+)").expect("pattern"))
}

fn file_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([\w./-]+\.(?:py|js|ts|jsx|tsx|java|cpp|c|rb|go|rs|php|swift|kt|cs))\b")
            .expect("pattern")
    })
}

fn call_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\w+)\s*\(").expect("pattern"))
}

fn import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)(?:^\s*import\s+([\w.]+)|^\s*from\s+([\w.]+)\s+import|require\(['"]([^'"]+)['"]\))"#)
            .expect("pattern")
    })
}

const ERROR_KEYWORDS: [&str; 3] = ["cannot", "undefined", "null"];

/// Enhance a raw query with error and code captures before tokenization.
pub fn prepare_query(raw: &str) -> String {
    let mut parts = vec![raw.to_string()];

    for captures in error_capture_regex().captures_iter(raw) {
        parts.push(captures[1].trim().to_string());
    }
    for keyword in ERROR_KEYWORDS {
        if raw.to_lowercase().contains(keyword) {
            parts.push(keyword.to_string());
        }
    }
    for captures in stack_entry_regex().captures_iter(raw) {
        parts.push(captures[1].to_string());
    }
    for captures in file_name_regex().captures_iter(raw) {
        parts.push(captures[1].to_string());
    }
    for captures in call_regex().captures_iter(raw) {
        parts.push(captures[1].to_string());
    }
    for captures in import_regex().captures_iter(raw) {
        for group in [1, 2, 3] {
            if let Some(m) = captures.get(group) {
                parts.push(m.as_str().to_string());
            }
        }
    }

    parts.join(" ")
}

// ─── Hybrid Index ───────────────────────────────────────────────────────────

/// The fused lexical + vector index over document chunks.
pub struct HybridIndex {
    documents: HashMap<String, Document>,
    vector: VectorIndex,
    bm25: Bm25Index,
    config: FusionConfig,
}

impl HybridIndex {
    pub fn new() -> Self {
        Self::with_config(FusionConfig::default())
    }

    pub fn with_config(config: FusionConfig) -> Self {
        Self {
            documents: HashMap::new(),
            vector: VectorIndex::new(),
            bm25: Bm25Index::new(),
            config,
        }
    }

    pub fn add_document(&mut self, document: Document) {
        self.vector.insert(document.id.clone(), &document.content);
        self.bm25.insert(document.id.clone(), &document.content);
        self.documents.insert(document.id.clone(), document);
    }

    pub fn index_size(&self) -> usize {
        self.documents.len()
    }

    pub fn embed(&self, text: &str) -> SparseVector {
        self.vector.embed(text)
    }

    pub fn bm25_search(&self, query: &str, k: usize) -> Vec<ScoredId> {
        self.bm25.search(query, k)
    }

    pub fn vector_search(&self, query: &str, k: usize) -> Vec<ScoredId> {
        self.vector.search(query, k)
    }

    /// Fused search: both modalities with an expanded top-k, weighted score
    /// fusion, output clamped to `min(k, |vector|, |bm25|)`.
    pub fn search(&self, query: &str, k: usize) -> Vec<FusedResult> {
        if k == 0 || self.documents.is_empty() {
            return Vec::new();
        }

        let expanded = (3 * k).min(self.vector.len().max(self.bm25.len()));
        let prepared = prepare_query(query);

        let vector_hits = self.vector.search(&prepared, expanded);
        let bm25_hits = self.bm25.search(&prepared, expanded);

        let clamp = k.min(self.vector.len()).min(self.bm25.len());
        fuse_rankings(&vector_hits, &bm25_hits, &self.config)
            .into_iter()
            .take(clamp)
            .map(|fused| {
                let metadata = self
                    .documents
                    .get(&fused.id)
                    .map(|d| d.metadata.clone())
                    .unwrap_or_default();
                FusedResult {
                    score: fused.combined_score,
                    combined_score: fused.combined_score,
                    bm25_score: fused.bm25_score,
                    vector_score: fused.vector_score,
                    metadata,
                    id: fused.id,
                }
            })
            .collect()
    }

    /// Promote the result most likely to contain the failure.
    ///
    /// Boosts: ×2.0 when the result's file name appears in the error log,
    /// ×(1 + 0.1·m) for m distinct significant error tokens found in the
    /// chunk content.
    pub fn root_cause(&self, results: &[FusedResult], error_log: &str) -> Option<FusedResult> {
        let tokens = significant_tokens(error_log, &self.config.stoplist);

        results
            .iter()
            .map(|result| {
                let mut score = result.combined_score;
                if !result.metadata.file_name.is_empty()
                    && error_log.contains(&result.metadata.file_name)
                {
                    score *= 2.0;
                }
                let content = self
                    .documents
                    .get(&result.id)
                    .map(|d| d.content.to_lowercase())
                    .unwrap_or_default();
                let matches = tokens.iter().filter(|t| content.contains(t.as_str())).count();
                score *= 1.0 + 0.1 * matches as f32;
                (result, score)
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(result, score)| {
                let mut promoted = result.clone();
                promoted.score = score;
                promoted
            })
    }
}

impl Default for HybridIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Distinct lowercase tokens longer than 3 chars, minus the stoplist.
fn significant_tokens(text: &str, stoplist: &HashSet<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut tokens = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric() && c != '_') {
        let lower = word.to_lowercase();
        if lower.len() > 3 && !stoplist.contains(&lower) && seen.insert(lower.clone()) {
            tokens.push(lower);
        }
    }
    tokens
}

// ─── Grouping ───────────────────────────────────────────────────────────────

/// Bundle results by file path; groups sorted by their best chunk.
pub fn group_by_file(results: &[FusedResult]) -> Vec<FileGroup> {
    let mut groups: Vec<FileGroup> = Vec::new();
    for result in results {
        match groups
            .iter_mut()
            .find(|g| g.file_path == result.metadata.file_path)
        {
            Some(group) => {
                group.max_score = group.max_score.max(result.combined_score);
                group.total_score += result.combined_score;
                group.chunks.push(result.clone());
            }
            None => groups.push(FileGroup {
                file_path: result.metadata.file_path.clone(),
                file_name: result.metadata.file_name.clone(),
                chunks: vec![result.clone()],
                max_score: result.combined_score,
                total_score: result.combined_score,
            }),
        }
    }
    groups.sort_by(|a, b| {
        b.max_score
            .partial_cmp(&a.max_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    groups
}

// ─── Chunking ───────────────────────────────────────────────────────────────

/// Split file content into line-window chunks ready for indexing.
pub fn chunk_file(file_path: &str, content: &str, window_lines: usize) -> Vec<Document> {
    let window = window_lines.max(1);
    let file_name = std::path::Path::new(file_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file_path.to_string());

    let lines: Vec<&str> = content.lines().collect();
    lines
        .chunks(window)
        .enumerate()
        .map(|(i, chunk)| {
            let start_line = i * window + 1;
            let end_line = start_line + chunk.len() - 1;
            Document {
                id: format!("{file_path}:{start_line}"),
                content: chunk.join("\n"),
                metadata: DocMetadata {
                    file_path: file_path.to_string(),
                    file_name: file_name.clone(),
                    start_line,
                    end_line,
                },
            }
        })
        .collect()
}
