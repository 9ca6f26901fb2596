//! Planner capability — the abstract "chat" interface plus the response
//! parsing and validation that turn raw model output into a typed tool
//! invocation.
//!
//! The transport is out of scope: implementations receive the assembled
//! prompt string and return whatever text the model produced. Extraction
//! tolerates prose and code fences around the JSON object.

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

use crate::error::{TriageError, TriageResult};
use crate::tool::ToolInvocation;
use crate::types::PlannedAction;

#[async_trait]
pub trait Planner: Send + Sync {
    /// Produce the next-action text for an assembled prompt.
    async fn plan(&self, prompt: &str) -> TriageResult<String>;
}

// ─── JSON Extraction ────────────────────────────────────────────────────────

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fence pattern")
    })
}

/// Pull the first JSON object out of model output, tolerating surrounding
/// prose and markdown fences.
pub fn extract_json(raw: &str) -> TriageResult<serde_json::Value> {
    let trimmed = raw.trim();

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if value.is_object() {
            return Ok(value);
        }
    }

    if let Some(captures) = fence_regex().captures(trimmed) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&captures[1]) {
            if value.is_object() {
                return Ok(value);
            }
        }
    }

    // Last resort: first balanced top-level object, string-aware.
    if let Some(candidate) = first_balanced_object(trimmed) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate) {
            if value.is_object() {
                return Ok(value);
            }
        }
    }

    Err(TriageError::Planner(format!(
        "No JSON object found in planner output: {}",
        truncate_for_error(trimmed)
    )))
}

fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn truncate_for_error(text: &str) -> String {
    const LIMIT: usize = 200;
    if text.chars().count() > LIMIT {
        let head: String = text.chars().take(LIMIT).collect();
        format!("{head}…")
    } else {
        text.to_string()
    }
}

// ─── Validation ─────────────────────────────────────────────────────────────

/// Placeholder paths the planner is never allowed to read.
const READ_PLACEHOLDERS: [&str; 4] = ["path/to/data", "path/to/file", "file.csv", "data.csv"];
/// Placeholder paths the planner is never allowed to list.
const LIST_PLACEHOLDERS: [&str; 2] = ["path/to/data", "path/to/file"];

/// Validate a raw planner JSON object into a typed action + invocation.
pub fn validate_response(value: serde_json::Value) -> TriageResult<(PlannedAction, ToolInvocation)> {
    let thought = value
        .get("thought")
        .and_then(|v| v.as_str())
        .ok_or_else(|| TriageError::Validation("missing field 'thought'".into()))?
        .to_string();
    let tool_to_use = value
        .get("tool_to_use")
        .and_then(|v| v.as_str())
        .ok_or_else(|| TriageError::Validation("missing field 'tool_to_use'".into()))?
        .to_string();
    let tool_parameters = value
        .get("tool_parameters")
        .cloned()
        .ok_or_else(|| TriageError::Validation("missing field 'tool_parameters'".into()))?;
    if !tool_parameters.is_object() {
        return Err(TriageError::Validation(
            "'tool_parameters' must be an object".into(),
        ));
    }

    reject_placeholders(&tool_to_use, &tool_parameters)?;

    let invocation = ToolInvocation::parse(&tool_to_use, tool_parameters.clone())?;
    let action = PlannedAction {
        thought,
        tool_to_use,
        tool_parameters,
    };
    Ok((action, invocation))
}

fn reject_placeholders(tool: &str, parameters: &serde_json::Value) -> TriageResult<()> {
    match tool {
        "read_file_content" => {
            if let Some(path) = parameters.get("file_path").and_then(|v| v.as_str()) {
                if READ_PLACEHOLDERS.iter().any(|p| path.contains(p)) {
                    return Err(TriageError::Validation(format!(
                        "placeholder path rejected: {path}"
                    )));
                }
            }
        }
        "list_directory_contents" => {
            if let Some(path) = parameters.get("directory_path").and_then(|v| v.as_str()) {
                if LIST_PLACEHOLDERS.iter().any(|p| path.contains(p)) {
                    return Err(TriageError::Validation(format!(
                        "placeholder path rejected: {path}"
                    )));
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Convenience: raw planner text → validated action.
pub fn parse_planner_output(raw: &str) -> TriageResult<(PlannedAction, ToolInvocation)> {
    validate_response(extract_json(raw)?)
}

// ─── MockPlanner ────────────────────────────────────────────────────────────

/// Test planner with scripted responses, drained in order.
pub struct MockPlanner {
    responses: std::sync::Mutex<Vec<String>>,
    prompts: std::sync::Mutex<Vec<String>>,
}

impl MockPlanner {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
            prompts: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Prompts this mock has received, in order.
    pub fn prompts_seen(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Planner for MockPlanner {
    async fn plan(&self, prompt: &str) -> TriageResult<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(TriageError::Planner("no more scripted responses".into()));
        }
        Ok(responses.remove(0))
    }
}
