//! Tool layer — the closed catalog of capabilities the planner may invoke.
//!
//! Tools are a compile-time tagged enum, not string dispatch: parsing a
//! planner response produces a [`ToolInvocation`] with typed, validated
//! parameters, and [`ToolExecutor::execute`] is the single entry point. Only
//! the two propose tools mutate anything, each behind an explicit user yes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::context::AgentContext;
use crate::error::{TriageError, TriageResult};
use crate::interact::UserInterface;
use crate::runner::CommandRunner;
use crate::types::{FinalStatus, ToolDescriptor, ToolStatus};

pub mod fs;
pub mod patch;
pub mod shell;

// ─── Parameter Structs ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListDirectoryParams {
    #[serde(default)]
    pub directory_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadFileParams {
    pub file_path: String,
    #[serde(default)]
    pub start_line: Option<usize>,
    #[serde(default)]
    pub end_line: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticCommandParams {
    pub command_string: String,
}

fn default_max_results() -> usize {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    pub search_pattern: String,
    #[serde(default)]
    pub file_extensions: Vec<String>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_structure_depth() -> usize {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStructureParams {
    #[serde(default = "default_structure_depth")]
    pub max_depth: usize,
    #[serde(default)]
    pub include_hidden: bool,
}

impl Default for FileStructureParams {
    fn default() -> Self {
        Self {
            max_depth: default_structure_depth(),
            include_hidden: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOp {
    Replace,
    Delete,
    Insert,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchChange {
    pub line_number: usize,
    pub action: PatchOp,
    #[serde(default)]
    pub old_content: Option<String>,
    #[serde(default)]
    pub new_content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodePatchParams {
    pub file_path: String,
    pub patch_content: Vec<PatchChange>,
    pub patch_description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixCommandParams {
    pub command_to_propose: String,
    pub command_description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationParams {
    pub question_for_user: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishParams {
    pub conclusion_message_for_user: String,
    pub final_status: FinalStatus,
}

// ─── Invocation ─────────────────────────────────────────────────────────────

/// One validated tool call. The catalog is this enum; there is no other way
/// to reach a tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    ListDirectoryContents(ListDirectoryParams),
    ReadFileContent(ReadFileParams),
    RunDiagnosticCommand(DiagnosticCommandParams),
    SearchFileContent(SearchParams),
    GetFileStructure(FileStructureParams),
    ProposeCodePatch(CodePatchParams),
    ProposeFixByCommand(FixCommandParams),
    AskUserForClarification(ClarificationParams),
    FinishDebugging(FinishParams),
}

impl ToolInvocation {
    pub fn name(&self) -> &'static str {
        match self {
            ToolInvocation::ListDirectoryContents(_) => "list_directory_contents",
            ToolInvocation::ReadFileContent(_) => "read_file_content",
            ToolInvocation::RunDiagnosticCommand(_) => "run_diagnostic_command",
            ToolInvocation::SearchFileContent(_) => "search_file_content",
            ToolInvocation::GetFileStructure(_) => "get_file_structure",
            ToolInvocation::ProposeCodePatch(_) => "propose_code_patch",
            ToolInvocation::ProposeFixByCommand(_) => "propose_fix_by_command",
            ToolInvocation::AskUserForClarification(_) => "ask_user_for_clarification",
            ToolInvocation::FinishDebugging(_) => "finish_debugging",
        }
    }

    /// All catalog tool names, in presentation order.
    pub fn catalog_names() -> [&'static str; 9] {
        [
            "list_directory_contents",
            "read_file_content",
            "run_diagnostic_command",
            "search_file_content",
            "get_file_structure",
            "propose_code_patch",
            "propose_fix_by_command",
            "ask_user_for_clarification",
            "finish_debugging",
        ]
    }

    /// Decode a named tool call into a typed invocation.
    pub fn parse(name: &str, parameters: Value) -> TriageResult<Self> {
        fn decode<T: serde::de::DeserializeOwned>(
            tool: &str,
            parameters: Value,
        ) -> TriageResult<T> {
            serde_json::from_value(parameters)
                .map_err(|e| TriageError::Validation(format!("{tool}: invalid parameters: {e}")))
        }

        match name {
            "list_directory_contents" => {
                Ok(ToolInvocation::ListDirectoryContents(decode(name, parameters)?))
            }
            "read_file_content" => Ok(ToolInvocation::ReadFileContent(decode(name, parameters)?)),
            "run_diagnostic_command" => {
                Ok(ToolInvocation::RunDiagnosticCommand(decode(name, parameters)?))
            }
            "search_file_content" => Ok(ToolInvocation::SearchFileContent(decode(name, parameters)?)),
            "get_file_structure" => Ok(ToolInvocation::GetFileStructure(decode(name, parameters)?)),
            "propose_code_patch" => Ok(ToolInvocation::ProposeCodePatch(decode(name, parameters)?)),
            "propose_fix_by_command" => {
                Ok(ToolInvocation::ProposeFixByCommand(decode(name, parameters)?))
            }
            "ask_user_for_clarification" => {
                Ok(ToolInvocation::AskUserForClarification(decode(name, parameters)?))
            }
            "finish_debugging" => Ok(ToolInvocation::FinishDebugging(decode(name, parameters)?)),
            other => Err(TriageError::Validation(format!("Unknown tool: {other}"))),
        }
    }

    /// Catalog descriptors as presented to the planner.
    pub fn catalog() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor {
                name: "list_directory_contents".into(),
                description: "List files and directories at a path, with sizes and types. Defaults to the project root.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "directory_path": {"type": "string", "description": "Directory to list, relative to the project root"}
                    }
                }),
            },
            ToolDescriptor {
                name: "read_file_content".into(),
                description: "Read a file, optionally restricted to an inclusive line range.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "file_path": {"type": "string"},
                        "start_line": {"type": "integer"},
                        "end_line": {"type": "integer"}
                    },
                    "required": ["file_path"]
                }),
            },
            ToolDescriptor {
                name: "run_diagnostic_command".into(),
                description: "Run a read-only shell command for diagnosis. Destructive commands are rejected.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "command_string": {"type": "string"}
                    },
                    "required": ["command_string"]
                }),
            },
            ToolDescriptor {
                name: "search_file_content".into(),
                description: "Case-insensitive substring search over project files with the given extensions.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "search_pattern": {"type": "string"},
                        "file_extensions": {"type": "array", "items": {"type": "string"}},
                        "max_results": {"type": "integer", "default": 10}
                    },
                    "required": ["search_pattern", "file_extensions"]
                }),
            },
            ToolDescriptor {
                name: "get_file_structure".into(),
                description: "Render the project tree with per-file sizes.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "max_depth": {"type": "integer", "default": 3},
                        "include_hidden": {"type": "boolean", "default": false}
                    }
                }),
            },
            ToolDescriptor {
                name: "propose_code_patch".into(),
                description: "Propose line-level changes to a file as a unified diff. Applied only after the user confirms.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "file_path": {"type": "string"},
                        "patch_content": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "line_number": {"type": "integer"},
                                    "action": {"type": "string", "enum": ["replace", "delete", "insert"]},
                                    "old_content": {"type": "string"},
                                    "new_content": {"type": "string"}
                                },
                                "required": ["line_number", "action"]
                            }
                        },
                        "patch_description": {"type": "string"}
                    },
                    "required": ["file_path", "patch_content", "patch_description"]
                }),
            },
            ToolDescriptor {
                name: "propose_fix_by_command".into(),
                description: "Propose a shell command that fixes the error. Run only after the user confirms.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "command_to_propose": {"type": "string"},
                        "command_description": {"type": "string"}
                    },
                    "required": ["command_to_propose", "command_description"]
                }),
            },
            ToolDescriptor {
                name: "ask_user_for_clarification".into(),
                description: "Ask the user a question and wait for their reply.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "question_for_user": {"type": "string"}
                    },
                    "required": ["question_for_user"]
                }),
            },
            ToolDescriptor {
                name: "finish_debugging".into(),
                description: "End the session with a conclusion and final status.".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "conclusion_message_for_user": {"type": "string"},
                        "final_status": {
                            "type": "string",
                            "enum": ["resolved", "guidance_provided", "cannot_resolve", "aborted_by_user_request"]
                        }
                    },
                    "required": ["conclusion_message_for_user", "final_status"]
                }),
            },
        ]
    }
}

// ─── Outcome ────────────────────────────────────────────────────────────────

/// Result of one tool execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub status: ToolStatus,
    pub payload: Value,
}

impl ToolOutcome {
    pub fn success(payload: Value) -> Self {
        Self {
            status: ToolStatus::Success,
            payload,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            payload: json!({"message": message.into()}),
        }
    }

    pub fn finished(payload: Value) -> Self {
        Self {
            status: ToolStatus::Finished,
            payload,
        }
    }

    pub fn skipped(duplicate_step: usize, prior_result: Value) -> Self {
        Self {
            status: ToolStatus::Skipped,
            payload: json!({"duplicate_step": duplicate_step, "prior_result": prior_result}),
        }
    }

    /// Flatten into the step-result object: `status` merged with the payload.
    pub fn to_json(&self) -> Value {
        let mut object = match &self.payload {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("payload".into(), other.clone());
                map
            }
        };
        object.insert("status".into(), json!(self.status.to_string()));
        Value::Object(object)
    }
}

// ─── Executor ───────────────────────────────────────────────────────────────

/// Tunables for tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(default = "default_diagnostic_timeout")]
    pub diagnostic_timeout_secs: u64,
    #[serde(default = "default_fix_timeout")]
    pub fix_timeout_secs: u64,
    #[serde(default = "default_search_ttl")]
    pub search_cache_ttl_secs: i64,
    #[serde(default = "default_search_sample")]
    pub search_cache_sample: usize,
    #[serde(default = "default_read_cache_window")]
    pub read_cache_window: usize,
}

fn default_diagnostic_timeout() -> u64 {
    8
}
fn default_fix_timeout() -> u64 {
    60
}
fn default_search_ttl() -> i64 {
    300
}
fn default_search_sample() -> usize {
    5
}
fn default_read_cache_window() -> usize {
    3
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            diagnostic_timeout_secs: default_diagnostic_timeout(),
            fix_timeout_secs: default_fix_timeout(),
            search_cache_ttl_secs: default_search_ttl(),
            search_cache_sample: default_search_sample(),
            read_cache_window: default_read_cache_window(),
        }
    }
}

/// The single dispatch point for validated invocations.
pub struct ToolExecutor {
    runner: Arc<dyn CommandRunner>,
    ui: Arc<dyn UserInterface>,
    config: ToolConfig,
}

impl ToolExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>, ui: Arc<dyn UserInterface>) -> Self {
        Self {
            runner,
            ui,
            config: ToolConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ToolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    /// Execute one invocation against the context. Tool-level failures come
    /// back as `status = error` outcomes, not as `Err`; `Err` is reserved for
    /// interruption and capability breakdowns the loop must see.
    pub async fn execute(
        &self,
        invocation: &ToolInvocation,
        context: &mut AgentContext,
        step_no: usize,
    ) -> TriageResult<ToolOutcome> {
        match invocation {
            ToolInvocation::ListDirectoryContents(params) => {
                Ok(fs::list_directory_contents(context, params))
            }
            ToolInvocation::ReadFileContent(params) => Ok(fs::read_file_content(
                context,
                params,
                step_no,
                self.config.read_cache_window,
            )),
            ToolInvocation::RunDiagnosticCommand(params) => {
                if !context.constraints.allow_command_execution {
                    return Ok(ToolOutcome::error(
                        "Command execution is disabled for this session",
                    ));
                }
                shell::run_diagnostic_command(
                    self.runner.as_ref(),
                    context,
                    params,
                    self.config.diagnostic_timeout_secs,
                )
                .await
            }
            ToolInvocation::SearchFileContent(params) => {
                Ok(fs::search_file_content(context, params, &self.config))
            }
            ToolInvocation::GetFileStructure(params) => {
                Ok(fs::get_file_structure(context, params))
            }
            ToolInvocation::ProposeCodePatch(params) => {
                if !context.constraints.allow_file_modifications {
                    return Ok(ToolOutcome::error(
                        "File modifications are disabled for this session",
                    ));
                }
                patch::propose_code_patch(self.ui.as_ref(), context, params, step_no).await
            }
            ToolInvocation::ProposeFixByCommand(params) => {
                if !context.constraints.allow_command_execution {
                    return Ok(ToolOutcome::error(
                        "Command execution is disabled for this session",
                    ));
                }
                shell::propose_fix_by_command(
                    self.runner.as_ref(),
                    self.ui.as_ref(),
                    context,
                    params,
                    self.config.fix_timeout_secs,
                )
                .await
            }
            ToolInvocation::AskUserForClarification(params) => {
                let reply = self.ui.ask_input(&params.question_for_user).await?;
                Ok(ToolOutcome::success(json!({
                    "question": params.question_for_user,
                    "user_reply": reply,
                })))
            }
            ToolInvocation::FinishDebugging(params) => Ok(ToolOutcome::finished(json!({
                "conclusion": params.conclusion_message_for_user,
                "final_status": params.final_status,
            }))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interact::MockUser;
    use crate::runner::MockRunner;
    use crate::types::{CommandCapture, SessionConstraints};

    fn test_context() -> AgentContext {
        AgentContext::new(
            "debug",
            CommandCapture::new("python app.py", "", "err", 1),
            "/tmp/none",
            ToolInvocation::catalog(),
            SessionConstraints::default(),
        )
    }

    #[test]
    fn parse_known_tool() {
        let inv = ToolInvocation::parse(
            "read_file_content",
            json!({"file_path": "app.py", "start_line": 1, "end_line": 10}),
        )
        .unwrap();
        match inv {
            ToolInvocation::ReadFileContent(p) => {
                assert_eq!(p.file_path, "app.py");
                assert_eq!(p.start_line, Some(1));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn parse_unknown_tool_rejected() {
        let result = ToolInvocation::parse("initial_error_analyzer", json!({}));
        assert!(matches!(result, Err(TriageError::Validation(_))));
    }

    #[test]
    fn parse_missing_required_field_rejected() {
        let result = ToolInvocation::parse("read_file_content", json!({}));
        assert!(matches!(result, Err(TriageError::Validation(_))));
    }

    #[test]
    fn parse_applies_defaults() {
        let inv = ToolInvocation::parse(
            "search_file_content",
            json!({"search_pattern": "TODO", "file_extensions": ["py"]}),
        )
        .unwrap();
        match inv {
            ToolInvocation::SearchFileContent(p) => assert_eq!(p.max_results, 10),
            other => panic!("wrong variant: {other:?}"),
        }

        let inv = ToolInvocation::parse("get_file_structure", json!({})).unwrap();
        match inv {
            ToolInvocation::GetFileStructure(p) => {
                assert_eq!(p.max_depth, 3);
                assert!(!p.include_hidden);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn catalog_covers_all_names() {
        let catalog = ToolInvocation::catalog();
        let names: Vec<&str> = catalog.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ToolInvocation::catalog_names());
        for descriptor in &catalog {
            assert!(descriptor.input_schema.get("type").is_some());
        }
    }

    #[test]
    fn outcome_json_merges_status() {
        let outcome = ToolOutcome::success(json!({"entries": []}));
        let merged = outcome.to_json();
        assert_eq!(merged["status"], "success");
        assert!(merged["entries"].is_array());

        let skipped = ToolOutcome::skipped(3, json!({"status": "success"}));
        let merged = skipped.to_json();
        assert_eq!(merged["status"], "skipped");
        assert_eq!(merged["duplicate_step"], 3);
    }

    #[tokio::test]
    async fn finish_debugging_returns_finished() {
        let executor = ToolExecutor::new(
            Arc::new(MockRunner::always_ok("")),
            Arc::new(MockUser::new()),
        );
        let mut ctx = test_context();
        let inv = ToolInvocation::parse(
            "finish_debugging",
            json!({
                "conclusion_message_for_user": "All fixed",
                "final_status": "resolved"
            }),
        )
        .unwrap();
        let outcome = executor.execute(&inv, &mut ctx, 1).await.unwrap();
        assert_eq!(outcome.status, ToolStatus::Finished);
        assert_eq!(outcome.payload["final_status"], "resolved");
    }

    #[tokio::test]
    async fn clarification_returns_reply() {
        let executor = ToolExecutor::new(
            Arc::new(MockRunner::always_ok("")),
            Arc::new(MockUser::new().with_replies(vec!["use python3".into()])),
        );
        let mut ctx = test_context();
        let inv = ToolInvocation::parse(
            "ask_user_for_clarification",
            json!({"question_for_user": "Which interpreter?"}),
        )
        .unwrap();
        let outcome = executor.execute(&inv, &mut ctx, 1).await.unwrap();
        assert_eq!(outcome.status, ToolStatus::Success);
        assert_eq!(outcome.payload["user_reply"], "use python3");
    }

    #[tokio::test]
    async fn disabled_command_execution_blocks_diagnostics() {
        let executor = ToolExecutor::new(
            Arc::new(MockRunner::always_ok("out")),
            Arc::new(MockUser::new()),
        );
        let mut ctx = test_context();
        ctx.constraints.allow_command_execution = false;

        let inv = ToolInvocation::parse(
            "run_diagnostic_command",
            json!({"command_string": "ls -la"}),
        )
        .unwrap();
        let outcome = executor.execute(&inv, &mut ctx, 1).await.unwrap();
        assert_eq!(outcome.status, ToolStatus::Error);
    }
}
