//! Agent context — the single authoritative working memory of a session.
//!
//! Mutation happens only through the named transitions on [`AgentContext`];
//! each one preserves the bounded-memory invariants (recent-action window,
//! progression ledger, error/solved bookkeeping). The optimizer in
//! [`optimizer`] works on deep copies and never touches the authoritative
//! value.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::evolution::{self, BlockingError, ErrorTransition, ProgressionEntry, SolvedIssue};
use crate::types::{CommandCapture, SessionConstraints, Step, ToolDescriptor};

pub mod file_state;
pub mod optimizer;

pub use file_state::FileState;

/// Recent-action window size.
pub const RECENT_ACTIONS_CAP: usize = 10;
/// A prior action with the same signature within this many steps is a duplicate.
pub const DEDUP_WINDOW: usize = 3;

// ─── Knowledge Base ─────────────────────────────────────────────────────────

/// One file observed during a project scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the session working directory.
    pub path: String,
    pub name: String,
    pub extension: String,
    pub size_bytes: u64,
    pub depth: usize,
    pub is_hidden: bool,
    pub is_code_file: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureMetadata {
    pub total_files: usize,
    pub relevant_files: usize,
    pub code_files: usize,
    pub relevant_extensions: Vec<String>,
    pub project_root: String,
}

/// Cached project structure scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStructure {
    pub tree_structure: String,
    pub flat_files: Vec<FileEntry>,
    pub metadata: StructureMetadata,
    pub max_depth: usize,
    pub included_hidden: bool,
    pub cached_at: DateTime<Utc>,
}

/// One match from a content search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub path: String,
    pub line_number: usize,
    pub line_content: String,
}

/// Sampled file identity used to validate a cached search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampledFile {
    pub path: String,
    pub mtime_secs: i64,
    pub size: u64,
}

/// Cached search result with the evidence needed for invalidation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSearch {
    pub results: Vec<SearchMatch>,
    pub files_searched: usize,
    pub searched_files_metadata: Vec<SampledFile>,
    pub timestamp: DateTime<Utc>,
}

/// Identity and freshness of a file the session has touched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    pub mtime_secs: i64,
    pub size: u64,
    pub last_checked: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read_step: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    InitialAnalysis,
    Traceback,
    Observation,
    Consolidated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisNote {
    pub kind: NoteKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl AnalysisNote {
    pub fn new(kind: NoteKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Everything the session has learned about the project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    /// Relative path → file content (raw; the optimizer truncates copies).
    pub files_read: HashMap<String, String>,
    pub file_structure: Option<FileStructure>,
    /// Keyed by `pattern:sorted_extensions:max_results`.
    pub search_results: HashMap<String, CachedSearch>,
    pub file_metadata: HashMap<String, FileMeta>,
    pub error_analysis_notes: Vec<AnalysisNote>,
}

// ─── Recent Actions ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentAction {
    pub signature: String,
    pub step_no: usize,
    pub tool: String,
    pub parameters: serde_json::Value,
    pub result: serde_json::Value,
}

// ─── Agent Context ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    pub initial_user_request: String,
    pub initial_command_run: CommandCapture,
    pub current_working_directory: PathBuf,
    pub session_history: Vec<Step>,
    pub recent_actions: VecDeque<RecentAction>,
    pub solved_issues: Vec<SolvedIssue>,
    pub current_blocking_error: Option<BlockingError>,
    pub error_progression: Vec<ProgressionEntry>,
    pub knowledge_base: KnowledgeBase,
    pub file_state: FileState,
    pub available_tools: Vec<ToolDescriptor>,
    pub constraints: SessionConstraints,
}

impl AgentContext {
    pub fn new(
        user_request: impl Into<String>,
        command: CommandCapture,
        cwd: impl Into<PathBuf>,
        available_tools: Vec<ToolDescriptor>,
        constraints: SessionConstraints,
    ) -> Self {
        let cwd = cwd.into();
        Self {
            initial_user_request: user_request.into(),
            initial_command_run: command,
            current_working_directory: cwd.clone(),
            session_history: Vec::new(),
            recent_actions: VecDeque::new(),
            solved_issues: Vec::new(),
            current_blocking_error: None,
            error_progression: Vec::new(),
            knowledge_base: KnowledgeBase::default(),
            file_state: FileState::new(cwd),
            available_tools,
            constraints,
        }
    }

    // ─── Transitions ────────────────────────────────────────────────────

    /// Append a completed step. Exactly one recent action is recorded with it.
    pub fn append_step(&mut self, step: Step, signature: String) {
        let action = RecentAction {
            signature,
            step_no: step.step_no,
            tool: step.action_taken.tool.clone(),
            parameters: step.action_taken.parameters.clone(),
            result: step.result.clone(),
        };
        self.session_history.push(step);
        self.record_recent_action(action);
    }

    /// Push into the bounded recent-action window.
    pub fn record_recent_action(&mut self, action: RecentAction) {
        self.recent_actions.push_back(action);
        while self.recent_actions.len() > RECENT_ACTIONS_CAP {
            self.recent_actions.pop_front();
        }
    }

    /// Install a new blocking error as the session focus.
    pub fn install_current_error(&mut self, error: BlockingError) {
        self.current_blocking_error = Some(error);
    }

    /// Move the current blocking error into the solved archive.
    pub fn archive_solved(&mut self, resolution_step: usize) {
        if let Some(error) = self.current_blocking_error.take() {
            self.solved_issues.push(SolvedIssue {
                error,
                resolution_step,
                resolved_at: Utc::now(),
            });
        }
    }

    /// Feed one command output through the error evolution engine.
    pub fn update_error_state(&mut self, output: &str, step: usize) -> ErrorTransition {
        evolution::apply_observation(
            &mut self.current_blocking_error,
            &mut self.solved_issues,
            &mut self.error_progression,
            output,
            step,
        )
    }

    /// Cache a file read, keyed by cwd-relative path.
    pub fn cache_file_read(
        &mut self,
        relative_path: impl Into<String>,
        content: impl Into<String>,
        meta: FileMeta,
    ) {
        let path = relative_path.into();
        self.knowledge_base
            .files_read
            .insert(path.clone(), content.into());
        self.knowledge_base.file_metadata.insert(path, meta);
    }

    pub fn record_note(&mut self, note: AnalysisNote) {
        self.knowledge_base.error_analysis_notes.push(note);
    }

    pub fn cache_search(&mut self, key: impl Into<String>, cached: CachedSearch) {
        self.knowledge_base.search_results.insert(key.into(), cached);
    }

    pub fn cache_structure(&mut self, structure: FileStructure) {
        self.knowledge_base.file_structure = Some(structure);
    }

    /// Drop all but the newest `keep` progression entries.
    pub fn evict_old_progression(&mut self, keep: usize) {
        let len = self.error_progression.len();
        if len > keep {
            self.error_progression.drain(..len - keep);
        }
    }

    // ─── Queries ────────────────────────────────────────────────────────

    /// Find a prior action with this signature close enough to count as a
    /// duplicate of an action about to run at `current_step`.
    pub fn recent_duplicate(&self, signature: &str, current_step: usize) -> Option<&RecentAction> {
        self.recent_actions
            .iter()
            .rev()
            .find(|a| a.signature == signature && current_step - a.step_no < DEDUP_WINDOW)
    }

    pub fn step_count(&self) -> usize {
        self.session_history.len()
    }

    /// True when the newest `n` steps all recorded an error result.
    pub fn last_steps_all_failed(&self, n: usize) -> bool {
        self.session_history.len() >= n
            && self
                .session_history
                .iter()
                .rev()
                .take(n)
                .all(|s| s.is_failure())
    }

    /// Check of the bounded-memory and error-bookkeeping invariants.
    pub fn invariants_hold(&self) -> bool {
        if self.recent_actions.len() > RECENT_ACTIONS_CAP {
            return false;
        }
        let last_detected = self
            .error_progression
            .iter()
            .rev()
            .find_map(|p| p.error_detected.as_ref());
        match (&self.current_blocking_error, last_detected) {
            (Some(current), Some(digest)) => current.digest() == *digest,
            // An error installed without a ledger entry only exists during seeding.
            (Some(_), None) => self.error_progression.is_empty(),
            (None, _) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActionTaken;
    use serde_json::json;

    fn test_context() -> AgentContext {
        AgentContext::new(
            "fix my build",
            CommandCapture::new("python app.py", "", "boom", 1),
            "/tmp/project",
            Vec::new(),
            SessionConstraints::default(),
        )
    }

    fn make_step(step_no: usize, tool: &str, status: &str) -> Step {
        Step {
            step_no,
            thought: format!("step {step_no}"),
            action_taken: ActionTaken {
                tool: tool.into(),
                parameters: json!({}),
            },
            result: json!({"status": status}),
        }
    }

    #[test]
    fn append_step_records_one_recent_action() {
        let mut ctx = test_context();
        ctx.append_step(
            make_step(1, "list_directory_contents", "success"),
            "sig1".into(),
        );
        assert_eq!(ctx.session_history.len(), 1);
        assert_eq!(ctx.recent_actions.len(), 1);
        assert_eq!(ctx.recent_actions[0].signature, "sig1");
        assert_eq!(ctx.recent_actions[0].step_no, 1);
    }

    #[test]
    fn recent_actions_window_is_bounded() {
        let mut ctx = test_context();
        for i in 1..=15 {
            ctx.append_step(
                make_step(i, "read_file_content", "success"),
                format!("sig{i}"),
            );
        }
        assert_eq!(ctx.recent_actions.len(), RECENT_ACTIONS_CAP);
        // Oldest entries evicted first.
        assert_eq!(ctx.recent_actions[0].step_no, 6);
        assert!(ctx.invariants_hold());
    }

    #[test]
    fn recent_duplicate_within_window() {
        let mut ctx = test_context();
        ctx.append_step(
            make_step(4, "list_directory_contents", "success"),
            "same".into(),
        );
        // Steps 5 and 6 are within the window; step 7 is not.
        assert!(ctx.recent_duplicate("same", 5).is_some());
        assert!(ctx.recent_duplicate("same", 6).is_some());
        assert!(ctx.recent_duplicate("same", 7).is_none());
        assert!(ctx.recent_duplicate("other", 5).is_none());
    }

    #[test]
    fn update_error_state_roundtrip() {
        let mut ctx = test_context();
        let traceback =
            "File \"app.py\", line 3\nModuleNotFoundError: No module named 'requests'";

        ctx.update_error_state(traceback, 1);
        assert!(ctx.current_blocking_error.is_some());
        assert!(ctx.invariants_hold());

        ctx.update_error_state("clean run", 2);
        assert!(ctx.current_blocking_error.is_none());
        assert_eq!(ctx.solved_issues.len(), 1);
        assert_eq!(ctx.solved_issues[0].resolution_step, 2);
        assert!(ctx.invariants_hold());
    }

    #[test]
    fn evict_old_progression_keeps_newest() {
        let mut ctx = test_context();
        for i in 1..=14 {
            ctx.update_error_state(&format!("KeyError: 'k{i}'"), i);
        }
        ctx.evict_old_progression(10);
        assert_eq!(ctx.error_progression.len(), 10);
        assert_eq!(ctx.error_progression.last().unwrap().step, 14);
        assert_eq!(ctx.error_progression[0].step, 5);
    }

    #[test]
    fn last_steps_all_failed() {
        let mut ctx = test_context();
        ctx.append_step(make_step(1, "a", "success"), "s1".into());
        ctx.append_step(make_step(2, "b", "error"), "s2".into());
        ctx.append_step(make_step(3, "c", "error"), "s3".into());
        assert!(!ctx.last_steps_all_failed(3));

        ctx.append_step(make_step(4, "d", "error"), "s4".into());
        assert!(ctx.last_steps_all_failed(3));
    }

    #[test]
    fn cache_file_read_stores_meta() {
        let mut ctx = test_context();
        let meta = FileMeta {
            mtime_secs: 100,
            size: 42,
            last_checked: Utc::now(),
            last_read_step: Some(2),
        };
        ctx.cache_file_read("src/app.py", "print('hi')", meta);
        assert_eq!(ctx.knowledge_base.files_read["src/app.py"], "print('hi')");
        assert_eq!(
            ctx.knowledge_base.file_metadata["src/app.py"].last_read_step,
            Some(2)
        );
    }

    #[test]
    fn context_serializes_roundtrip() {
        let mut ctx = test_context();
        ctx.append_step(make_step(1, "get_file_structure", "success"), "sig".into());
        ctx.record_note(AnalysisNote::new(NoteKind::InitialAnalysis, "module missing"));

        let json = serde_json::to_string(&ctx).unwrap();
        let restored: AgentContext = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, ctx);
    }
}
