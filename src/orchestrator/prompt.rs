//! Prompt assembly — a deterministic function of the optimized context.
//!
//! Section order is fixed: system preamble, status summary, the optimized
//! context as JSON, then step-specific imperatives. File contents only ever
//! appear truncated, because the optimizer runs first.

use crate::context::AgentContext;

pub const SYSTEM_PREAMBLE: &str = "\
You are a debugging assistant operating inside a terminal session. A command \
failed and your job is to diagnose and fix it step by step.

Respond with exactly one JSON object and nothing else:
{\"thought\": \"<your reasoning>\", \"tool_to_use\": \"<tool name>\", \"tool_parameters\": {<parameters>}}

Rules:
- You may only use the tools listed in available_tools. There are no others.
- Never guess file paths. Use the discovered files, mappings, and structure \
you are given; list or search first when unsure.
- Destructive actions are impossible: code patches and fix commands always \
require explicit user confirmation before anything changes.
- current_blocking_error is your single focus. Work on it until it is \
resolved or replaced, then finish_debugging.";

/// Human-oriented highlights placed above the JSON dump.
pub fn status_summary(context: &AgentContext) -> String {
    let mut lines = Vec::new();

    if !context.solved_issues.is_empty() {
        let solved: Vec<String> = context
            .solved_issues
            .iter()
            .map(|s| {
                format!(
                    "{}: {} (resolved at step {})",
                    s.error.kind, s.error.message, s.resolution_step
                )
            })
            .collect();
        lines.push(format!("Solved so far: {}", solved.join("; ")));
    }

    match &context.current_blocking_error {
        Some(error) => {
            let files = if error.file_refs.is_empty() {
                "unknown file".to_string()
            } else {
                error.file_refs.join(", ")
            };
            lines.push(format!(
                "Current blocking error: {} \"{}\" in {files}",
                error.kind, error.message
            ));
        }
        None => lines.push("No blocking error currently detected.".to_string()),
    }

    if !context.file_state.discovered_files.is_empty() {
        let shown: Vec<&str> = context
            .file_state
            .discovered_files
            .iter()
            .take(20)
            .map(|s| s.as_str())
            .collect();
        let suffix = if context.file_state.discovered_files.len() > shown.len() {
            format!(" (+{} more)", context.file_state.discovered_files.len() - shown.len())
        } else {
            String::new()
        };
        lines.push(format!("Available files: {}{suffix}", shown.join(", ")));
    }

    if let Some(primary) = &context.file_state.primary_error_file {
        lines.push(format!("Primary error file: {primary}"));
    }

    if !context.file_state.file_mappings.is_empty() {
        let mut mappings: Vec<String> = context
            .file_state
            .file_mappings
            .iter()
            .map(|(short, actual)| format!("{short} -> {actual}"))
            .collect();
        mappings.sort();
        lines.push(format!("File mappings: {}", mappings.join(", ")));
    }

    if let Some(structure) = &context.knowledge_base.file_structure {
        lines.push(format!(
            "Project: {} files total, {} relevant, {} code files, extensions: {}",
            structure.metadata.total_files,
            structure.metadata.relevant_files,
            structure.metadata.code_files,
            structure.metadata.relevant_extensions.join(", ")
        ));
    }

    lines.join("\n")
}

/// Build the full prompt for one step from the already-optimized context.
pub fn assemble_prompt(optimized: &AgentContext, step_no: usize) -> String {
    let context_json = serde_json::to_string_pretty(optimized)
        .unwrap_or_else(|_| "{\"error\": \"context serialization failed\"}".to_string());

    let mut sections = vec![
        SYSTEM_PREAMBLE.to_string(),
        format!("=== STATUS (step {step_no}) ===\n{}", status_summary(optimized)),
        format!("=== CONTEXT ===\n{context_json}"),
    ];

    let mut imperatives = vec![format!(
        "Step {step_no} of {}. Choose the single most useful next action.",
        optimized.constraints.max_session_steps
    )];
    if step_no == 1 {
        imperatives.push(
            "This is the first step: start from the initial command's output already analyzed \
in the context; do not re-run the failing command blindly."
                .to_string(),
        );
    }
    sections.push(format!("=== INSTRUCTIONS ===\n{}", imperatives.join("\n")));

    sections.join("\n\n")
}
