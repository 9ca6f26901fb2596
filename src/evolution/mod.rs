//! Error evolution engine — parses command output into structured error
//! records, compares them across steps, and drives the transitions between
//! the current blocking error, the solved-issue archive, and the progression
//! ledger.

use std::collections::HashSet;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

// ─── Error Records ──────────────────────────────────────────────────────────

/// Recognized error taxonomies, in parse priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ModuleNotFound,
    Import,
    Key,
    FileNotFound,
    Syntax,
    Attribute,
    Value,
    Type,
    CommandNotFound,
    Generic,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::ModuleNotFound => write!(f, "ModuleNotFoundError"),
            ErrorKind::Import => write!(f, "ImportError"),
            ErrorKind::Key => write!(f, "KeyError"),
            ErrorKind::FileNotFound => write!(f, "FileNotFoundError"),
            ErrorKind::Syntax => write!(f, "SyntaxError"),
            ErrorKind::Attribute => write!(f, "AttributeError"),
            ErrorKind::Value => write!(f, "ValueError"),
            ErrorKind::Type => write!(f, "TypeError"),
            ErrorKind::CommandNotFound => write!(f, "CommandNotFound"),
            ErrorKind::Generic => write!(f, "Error"),
        }
    }
}

/// The single live error the session is focused on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockingError {
    pub kind: ErrorKind,
    pub message: String,
    pub file_refs: Vec<String>,
    pub line_refs: Vec<u32>,
    pub raw_output: String,
    pub first_seen_step: usize,
    pub last_seen_step: usize,
    pub status: String,
}

impl BlockingError {
    pub fn digest(&self) -> ErrorDigest {
        ErrorDigest {
            kind: self.kind,
            message: self.message.clone(),
            file_refs: self.file_refs.clone(),
        }
    }
}

/// Compact identity of an error, used in the progression ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDigest {
    pub kind: ErrorKind,
    pub message: String,
    pub file_refs: Vec<String>,
}

/// A previously blocking error that has since disappeared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolvedIssue {
    pub error: BlockingError,
    pub resolution_step: usize,
    pub resolved_at: DateTime<Utc>,
}

/// One observation in the chronological error ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressionEntry {
    pub step: usize,
    pub error_detected: Option<ErrorDigest>,
    pub previous_error: Option<ErrorDigest>,
    pub timestamp: DateTime<Utc>,
}

// ─── Parsing ────────────────────────────────────────────────────────────────

struct ParsePattern {
    kind: ErrorKind,
    regex: Regex,
}

fn parse_table() -> &'static Vec<ParsePattern> {
    static TABLE: OnceLock<Vec<ParsePattern>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let table = [
            (
                ErrorKind::ModuleNotFound,
                r"ModuleNotFoundError: No module named '([^']+)'",
            ),
            (ErrorKind::Import, r"ImportError: (.+)"),
            (ErrorKind::Key, r#"KeyError: ['"]?([^'"\n]+)['"]?"#),
            (
                ErrorKind::FileNotFound,
                r"(?:FileNotFoundError|No such file or directory)[:]? ?(.*)",
            ),
            (ErrorKind::Syntax, r"SyntaxError: (.+)"),
            (ErrorKind::Attribute, r"AttributeError: (.+)"),
            (ErrorKind::Value, r"ValueError: (.+)"),
            (ErrorKind::Type, r"TypeError: (.+)"),
            (
                ErrorKind::CommandNotFound,
                r"(?:([\w./-]+): command not found|'([^']+)' is not recognized)",
            ),
            (ErrorKind::Generic, r"(?m)^\s*\w*Error: (.+)$"),
            (ErrorKind::Generic, r"(?m)^\s*\w*Exception: (.+)$"),
        ];
        table
            .into_iter()
            .map(|(kind, pattern)| ParsePattern {
                kind,
                regex: Regex::new(pattern).expect("parse table pattern"),
            })
            .collect()
    })
}

fn file_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"File "([^"]+)""#).expect("file ref pattern"))
}

fn line_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"line (\d+)").expect("line ref pattern"))
}

fn dedup_preserving_order<T: Clone + Eq + std::hash::Hash>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|i| seen.insert(i.clone())).collect()
}

/// Parse combined command output into a structured error record.
/// The first matching pattern in the priority table wins.
pub fn parse_error(output: &str, step: usize) -> Option<BlockingError> {
    if output.trim().is_empty() {
        return None;
    }

    for pattern in parse_table() {
        if let Some(captures) = pattern.regex.captures(output) {
            // CommandNotFound has two alternates; take whichever group matched.
            let message = captures
                .iter()
                .skip(1)
                .flatten()
                .next()
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();

            let file_refs = dedup_preserving_order(
                file_ref_regex()
                    .captures_iter(output)
                    .map(|c| c[1].to_string())
                    .collect(),
            );
            let line_refs = dedup_preserving_order(
                line_ref_regex()
                    .captures_iter(output)
                    .filter_map(|c| c[1].parse::<u32>().ok())
                    .collect(),
            );

            return Some(BlockingError {
                kind: pattern.kind,
                message,
                file_refs,
                line_refs,
                raw_output: output.to_string(),
                first_seen_step: step,
                last_seen_step: step,
                status: "active".into(),
            });
        }
    }
    None
}

// ─── Comparison ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorComparison {
    /// Same kind, same message, same file set.
    SameError,
    /// Same file set, different kind.
    Progression,
    /// Anything else.
    NewError,
}

fn same_file_set(a: &[String], b: &[String]) -> bool {
    let a: HashSet<&String> = a.iter().collect();
    let b: HashSet<&String> = b.iter().collect();
    a == b
}

pub fn compare_errors(previous: &BlockingError, current: &BlockingError) -> ErrorComparison {
    let files_match = same_file_set(&previous.file_refs, &current.file_refs);
    if previous.kind == current.kind && previous.message == current.message && files_match {
        ErrorComparison::SameError
    } else if files_match && previous.kind != current.kind {
        ErrorComparison::Progression
    } else {
        ErrorComparison::NewError
    }
}

// ─── State Transition ───────────────────────────────────────────────────────

/// Outcome of feeding one command output through the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorTransition {
    /// No error before, none now.
    StillClear,
    /// A previous blocking error disappeared.
    Resolved,
    /// First error of the session (or first after a clear stretch).
    Installed,
    /// The previous error persists.
    Unchanged,
    /// The previous error was replaced by a different one.
    Replaced,
}

/// Apply one observation to `(current, solved, progression)` state.
///
/// Always appends exactly one progression entry. Callers own the containers;
/// this keeps the engine free of any knowledge of the wider context type.
pub fn apply_observation(
    current: &mut Option<BlockingError>,
    solved: &mut Vec<SolvedIssue>,
    progression: &mut Vec<ProgressionEntry>,
    output: &str,
    step: usize,
) -> ErrorTransition {
    let parsed = parse_error(output, step);
    let previous_digest = current.as_ref().map(|e| e.digest());

    let transition = match (current.take(), parsed) {
        (None, None) => ErrorTransition::StillClear,
        (Some(prev), None) => {
            solved.push(SolvedIssue {
                error: prev,
                resolution_step: step,
                resolved_at: Utc::now(),
            });
            ErrorTransition::Resolved
        }
        (None, Some(new_error)) => {
            *current = Some(new_error);
            ErrorTransition::Installed
        }
        (Some(mut prev), Some(new_error)) => match compare_errors(&prev, &new_error) {
            ErrorComparison::SameError => {
                prev.last_seen_step = step;
                *current = Some(prev);
                ErrorTransition::Unchanged
            }
            ErrorComparison::Progression | ErrorComparison::NewError => {
                solved.push(SolvedIssue {
                    error: prev,
                    resolution_step: step.saturating_sub(1),
                    resolved_at: Utc::now(),
                });
                *current = Some(new_error);
                ErrorTransition::Replaced
            }
        },
    };

    progression.push(ProgressionEntry {
        step,
        error_detected: current.as_ref().map(|e| e.digest()),
        previous_error: previous_digest,
        timestamp: Utc::now(),
    });

    transition
}
