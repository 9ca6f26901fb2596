//! Context optimizer — shrinks a deep copy of the context to fit the
//! planner's working window before each prompt.
//!
//! The authoritative context is never mutated here. Two strategies apply
//! depending on whether a blocking error exists: focus mode narrows to the
//! error neighborhood, drift mode summarizes old history. Both are followed
//! by content truncation, note consolidation, and the progression cap.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::types::{ActionTaken, Step};

use super::{AgentContext, AnalysisNote, NoteKind};

/// All thresholds the optimizer applies. Serde defaults mirror the runtime
/// defaults so a config file can override any one of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Working-window target for the serialized context, in tokens.
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    /// Focus mode keeps steps newer than `history_len - focus_window`.
    #[serde(default = "default_focus_window")]
    pub focus_window: usize,
    /// Focus mode never retains fewer than this many steps.
    #[serde(default = "default_min_retained_steps")]
    pub min_retained_steps: usize,
    /// Focus mode caps recent actions at this size.
    #[serde(default = "default_focus_recent_cap")]
    pub focus_recent_cap: usize,
    /// Drift mode summarizes once history exceeds this.
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: usize,
    /// Drift mode keeps this many full steps.
    #[serde(default = "default_drift_keep")]
    pub drift_keep: usize,
    /// File contents longer than this are truncated…
    #[serde(default = "default_truncate_over")]
    pub truncate_over: usize,
    /// …to this many leading and trailing characters.
    #[serde(default = "default_truncate_keep")]
    pub truncate_keep: usize,
    /// Consolidate notes once there are more than this many.
    #[serde(default = "default_notes_limit")]
    pub notes_limit: usize,
    #[serde(default = "default_notes_max_chars")]
    pub notes_max_chars: usize,
    #[serde(default = "default_progression_cap")]
    pub progression_cap: usize,
}

fn default_token_budget() -> usize {
    8_000
}
fn default_focus_window() -> usize {
    5
}
fn default_min_retained_steps() -> usize {
    3
}
fn default_focus_recent_cap() -> usize {
    5
}
fn default_drift_threshold() -> usize {
    5
}
fn default_drift_keep() -> usize {
    3
}
fn default_truncate_over() -> usize {
    2_000
}
fn default_truncate_keep() -> usize {
    1_000
}
fn default_notes_limit() -> usize {
    3
}
fn default_notes_max_chars() -> usize {
    1_500
}
fn default_progression_cap() -> usize {
    10
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            focus_window: default_focus_window(),
            min_retained_steps: default_min_retained_steps(),
            focus_recent_cap: default_focus_recent_cap(),
            drift_threshold: default_drift_threshold(),
            drift_keep: default_drift_keep(),
            truncate_over: default_truncate_over(),
            truncate_keep: default_truncate_keep(),
            notes_limit: default_notes_limit(),
            notes_max_chars: default_notes_max_chars(),
            progression_cap: default_progression_cap(),
        }
    }
}

/// Tools whose steps survive focus-mode pruning regardless of age.
const ALWAYS_KEPT_TOOLS: [&str; 2] = ["propose_code_patch", "propose_fix_by_command"];

/// Produce the pruned copy used to build the prompt.
pub fn optimize(context: &AgentContext, config: &OptimizerConfig) -> AgentContext {
    let mut optimized = context.clone();

    if optimized.current_blocking_error.is_some() {
        apply_focus_mode(&mut optimized, config);
    } else {
        apply_drift_mode(&mut optimized, config);
    }

    truncate_file_contents(&mut optimized, config);
    consolidate_notes(&mut optimized, config);
    optimized.evict_old_progression(config.progression_cap);

    optimized
}

fn apply_focus_mode(context: &mut AgentContext, config: &OptimizerConfig) {
    let total = context.session_history.len();
    let cutoff = total.saturating_sub(config.focus_window);

    let kept: Vec<Step> = context
        .session_history
        .iter()
        .filter(|s| s.step_no > cutoff || ALWAYS_KEPT_TOOLS.contains(&s.action_taken.tool.as_str()))
        .cloned()
        .collect();

    context.session_history = if kept.len() >= config.min_retained_steps {
        kept
    } else {
        let skip = total.saturating_sub(config.min_retained_steps);
        context.session_history.iter().skip(skip).cloned().collect()
    };

    // Only files implicated by the current error stay in the prompt.
    if let Some(error) = &context.current_blocking_error {
        let refs = error.file_refs.clone();
        context
            .knowledge_base
            .files_read
            .retain(|path, _| refs.iter().any(|r| path.contains(r.as_str()) || r.contains(path.as_str())));
    }

    while context.recent_actions.len() > config.focus_recent_cap {
        context.recent_actions.pop_front();
    }
}

fn apply_drift_mode(context: &mut AgentContext, config: &OptimizerConfig) {
    let total = context.session_history.len();
    if total <= config.drift_threshold {
        return;
    }

    let summarized = &context.session_history[..total - config.drift_keep];
    let summary: Vec<String> = summarized
        .iter()
        .map(|s| {
            format!(
                "{} ({})",
                s.action_taken.tool,
                s.result_status().unwrap_or("unknown")
            )
        })
        .collect();

    let summary_step = Step {
        step_no: summarized.first().map(|s| s.step_no).unwrap_or(0),
        thought: format!("Summary of {} earlier steps", summarized.len()),
        action_taken: ActionTaken {
            tool: "session_summary".into(),
            parameters: json!({}),
        },
        result: json!({"status": "success", "actions": summary}),
    };

    let mut history = vec![summary_step];
    history.extend(context.session_history[total - config.drift_keep..].iter().cloned());
    context.session_history = history;
}

fn truncate_file_contents(context: &mut AgentContext, config: &OptimizerConfig) {
    for content in context.knowledge_base.files_read.values_mut() {
        let char_count = content.chars().count();
        if char_count <= config.truncate_over {
            continue;
        }
        let head: String = content.chars().take(config.truncate_keep).collect();
        let tail: String = {
            let skip = char_count - config.truncate_keep;
            content.chars().skip(skip).collect()
        };
        let omitted = char_count - 2 * config.truncate_keep;
        *content = format!("{head}\n… [truncated {omitted} chars] …\n{tail}");
    }
}

fn consolidate_notes(context: &mut AgentContext, config: &OptimizerConfig) {
    let notes = &mut context.knowledge_base.error_analysis_notes;
    if notes.len() <= config.notes_limit {
        return;
    }
    let mut combined = notes
        .iter()
        .map(|n| n.content.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    if combined.chars().count() > config.notes_max_chars {
        combined = combined.chars().take(config.notes_max_chars).collect();
    }
    *notes = vec![AnalysisNote::new(NoteKind::Consolidated, combined)];
}
