//! Code patch tool: structured line changes rendered as a unified diff,
//! applied only after the user confirms.

use chrono::Utc;
use serde_json::json;

use crate::context::{AgentContext, FileMeta};
use crate::error::TriageResult;
use crate::interact::UserInterface;

use super::{CodePatchParams, PatchChange, PatchOp, ToolOutcome};

/// Apply structured changes to file content. Changes are applied bottom-up so
/// earlier line numbers stay valid.
pub fn apply_changes(content: &str, changes: &[PatchChange]) -> Result<String, String> {
    let had_trailing_newline = content.ends_with('\n');
    let mut lines: Vec<String> = content.lines().map(|l| l.to_string()).collect();

    let mut ordered: Vec<&PatchChange> = changes.iter().collect();
    ordered.sort_by(|a, b| b.line_number.cmp(&a.line_number));

    for change in ordered {
        let n = change.line_number;
        match change.action {
            PatchOp::Replace => {
                if n == 0 || n > lines.len() {
                    return Err(format!("replace: line {n} out of range ({} lines)", lines.len()));
                }
                if let Some(expected) = &change.old_content {
                    if lines[n - 1].trim_end() != expected.trim_end() {
                        return Err(format!(
                            "replace: line {n} mismatch, expected {:?}, found {:?}",
                            expected,
                            lines[n - 1]
                        ));
                    }
                }
                let new_line = change
                    .new_content
                    .clone()
                    .ok_or_else(|| format!("replace: line {n} missing new_content"))?;
                lines[n - 1] = new_line;
            }
            PatchOp::Delete => {
                if n == 0 || n > lines.len() {
                    return Err(format!("delete: line {n} out of range ({} lines)", lines.len()));
                }
                if let Some(expected) = &change.old_content {
                    if lines[n - 1].trim_end() != expected.trim_end() {
                        return Err(format!(
                            "delete: line {n} mismatch, expected {:?}, found {:?}",
                            expected,
                            lines[n - 1]
                        ));
                    }
                }
                lines.remove(n - 1);
            }
            PatchOp::Insert => {
                if n == 0 || n > lines.len() + 1 {
                    return Err(format!("insert: line {n} out of range ({} lines)", lines.len()));
                }
                let new_line = change
                    .new_content
                    .clone()
                    .ok_or_else(|| format!("insert: line {n} missing new_content"))?;
                lines.insert(n - 1, new_line);
            }
        }
    }

    let mut rebuilt = lines.join("\n");
    if had_trailing_newline && !rebuilt.is_empty() {
        rebuilt.push('\n');
    }
    Ok(rebuilt)
}

/// Render structured changes as a unified diff against the original content.
pub fn render_unified_diff(path: &str, original: &str, changes: &[PatchChange]) -> String {
    let original_lines: Vec<&str> = original.lines().collect();
    let mut out = vec![format!("--- a/{path}"), format!("+++ b/{path}")];

    let mut ordered: Vec<&PatchChange> = changes.iter().collect();
    ordered.sort_by_key(|c| c.line_number);

    for change in ordered {
        let n = change.line_number;
        let existing = original_lines.get(n - 1).copied().unwrap_or("");
        match change.action {
            PatchOp::Replace => {
                out.push(format!("@@ -{n},1 +{n},1 @@"));
                out.push(format!("-{}", change.old_content.as_deref().unwrap_or(existing)));
                out.push(format!("+{}", change.new_content.as_deref().unwrap_or("")));
            }
            PatchOp::Delete => {
                out.push(format!("@@ -{n},1 +{n},0 @@"));
                out.push(format!("-{}", change.old_content.as_deref().unwrap_or(existing)));
            }
            PatchOp::Insert => {
                out.push(format!("@@ -{n},0 +{n},1 @@"));
                out.push(format!("+{}", change.new_content.as_deref().unwrap_or("")));
            }
        }
    }
    out.join("\n")
}

pub async fn propose_code_patch(
    ui: &dyn UserInterface,
    context: &mut AgentContext,
    params: &CodePatchParams,
    step_no: usize,
) -> TriageResult<ToolOutcome> {
    if params.patch_content.is_empty() {
        return Ok(ToolOutcome::error("patch_content must not be empty"));
    }

    let resolved = context.file_state.resolve(&params.file_path);
    let relative = context.file_state.relativize(&resolved);
    let absolute = context.current_working_directory.join(&relative);

    if !absolute.is_file() {
        return Ok(ToolOutcome::error(format!("File not found: {relative}")));
    }
    let original = match std::fs::read_to_string(&absolute) {
        Ok(content) => content,
        Err(e) => return Ok(ToolOutcome::error(format!("Cannot read {relative}: {e}"))),
    };

    let patched = match apply_changes(&original, &params.patch_content) {
        Ok(patched) => patched,
        Err(reason) => return Ok(ToolOutcome::error(format!("Patch invalid: {reason}"))),
    };

    let diff = render_unified_diff(&relative, &original, &params.patch_content);
    ui.display_block(
        &format!("Proposed patch: {}", params.patch_description),
        &diff,
    );

    let confirmed = ui.ask_yes_no("Apply this patch?").await?;
    if !confirmed {
        return Ok(ToolOutcome::success(json!({
            "file_path": relative,
            "user_confirmation": false,
            "patch_applied": false,
        })));
    }

    if let Err(e) = std::fs::write(&absolute, &patched) {
        return Ok(ToolOutcome::error(format!("Cannot write {relative}: {e}")));
    }

    // Keep the read cache coherent with what is now on disk.
    let (mtime_secs, size) = absolute
        .metadata()
        .map(|m| {
            let mtime = m
                .modified()
                .ok()
                .map(|t| chrono::DateTime::<Utc>::from(t).timestamp())
                .unwrap_or(0);
            (mtime, m.len())
        })
        .unwrap_or((0, patched.len() as u64));
    context.cache_file_read(
        relative.clone(),
        patched,
        FileMeta {
            mtime_secs,
            size,
            last_checked: Utc::now(),
            last_read_step: Some(step_no),
        },
    );

    Ok(ToolOutcome::success(json!({
        "file_path": relative,
        "user_confirmation": true,
        "patch_applied": true,
        "changes": params.patch_content.len(),
    })))
}
