//! Agent orchestrator — the bounded diagnose-and-fix loop.
//!
//! Each iteration: termination check, context optimization, prompt assembly,
//! planner call, response validation, deduplication gate, dispatch, context
//! update, pacing. One outstanding tool invocation at a time; a step's
//! context update is committed before the next planner call is issued.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::context::optimizer::{self, OptimizerConfig};
use crate::context::AgentContext;
use crate::error::{TriageError, TriageResult};
use crate::interact::UserInterface;
use crate::planner::{self, Planner};
use crate::runner::CommandRunner;
use crate::seed;
use crate::session::{SessionLog, SessionStore};
use crate::tool::{ToolConfig, ToolExecutor, ToolInvocation, ToolOutcome};
use crate::tracelog::{LogEntry, LogLevel, TraceLogger};
use crate::types::{
    ActionTaken, CommandCapture, SessionConstraints, SessionOutcome, Step, ToolStatus,
};

pub mod prompt;

// ─── Configuration ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub constraints: SessionConstraints,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub tools: ToolConfig,
    /// Delay between iterations so the session stays observable in a terminal.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    #[serde(default = "default_failure_limit")]
    pub consecutive_failure_limit: usize,
}

fn default_pacing_ms() -> u64 {
    500
}

fn default_failure_limit() -> usize {
    3
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            constraints: SessionConstraints::default(),
            optimizer: OptimizerConfig::default(),
            tools: ToolConfig::default(),
            pacing_ms: default_pacing_ms(),
            consecutive_failure_limit: default_failure_limit(),
        }
    }
}

/// What a completed session hands back to the caller.
#[derive(Debug)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    pub termination_reason: Option<String>,
    pub steps_taken: usize,
    pub context: AgentContext,
}

// ─── Action Signatures ──────────────────────────────────────────────────────

/// Parameter keys that hold paths and get normalized before signing.
const PATH_PARAM_KEYS: [&str; 2] = ["file_path", "directory_path"];

/// Stable signature over `(tool, normalized parameters)` for deduplication.
/// Path parameters are normalized against the session working directory, so
/// absolute and relative spellings of the same file collide.
pub fn action_signature(tool: &str, parameters: &serde_json::Value, cwd: &Path) -> String {
    let mut normalized: BTreeMap<String, serde_json::Value> = BTreeMap::new();
    if let Some(object) = parameters.as_object() {
        for (key, value) in object {
            let value = if PATH_PARAM_KEYS.contains(&key.as_str()) {
                match value.as_str() {
                    Some(path) => json!(normalize_path(path, cwd)),
                    None => value.clone(),
                }
            } else {
                value.clone()
            };
            normalized.insert(key.clone(), value);
        }
    }

    let canonical = serde_json::to_string(&normalized).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(tool.as_bytes());
    hasher.update(b":");
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("{tool}:{hex}")
}

fn normalize_path(path: &str, cwd: &Path) -> String {
    let stripped = Path::new(path)
        .strip_prefix(cwd)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| path.to_string());
    stripped.trim_start_matches("./").to_string()
}

// ─── Orchestrator ───────────────────────────────────────────────────────────

pub struct Orchestrator {
    planner: Arc<dyn Planner>,
    ui: Arc<dyn UserInterface>,
    executor: ToolExecutor,
    logger: Arc<TraceLogger>,
    store: Option<SessionStore>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        planner: Arc<dyn Planner>,
        runner: Arc<dyn CommandRunner>,
        ui: Arc<dyn UserInterface>,
    ) -> Self {
        let config = OrchestratorConfig::default();
        let executor = ToolExecutor::new(runner, ui.clone()).with_config(config.tools.clone());
        Self {
            planner,
            ui,
            executor,
            logger: Arc::new(TraceLogger::new()),
            store: None,
            config,
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.executor = self.executor.with_config(config.tools.clone());
        self.config = config;
        self
    }

    pub fn with_logger(mut self, logger: Arc<TraceLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Run a full debugging session for a captured failing command.
    pub async fn run(
        &self,
        user_request: &str,
        capture: CommandCapture,
        cwd: impl Into<std::path::PathBuf>,
    ) -> TriageResult<SessionReport> {
        let mut context = AgentContext::new(
            user_request,
            capture,
            cwd,
            ToolInvocation::catalog(),
            self.config.constraints.clone(),
        );
        seed::seed_knowledge_base(&mut context)?;
        self.log(LogLevel::Info, "orchestrator", "session started", None);

        let max_steps = self.config.constraints.max_session_steps;
        let failure_limit = self.config.consecutive_failure_limit;

        let mut outcome = SessionOutcome::StepsExhausted;
        let mut reason: Option<String> = None;

        loop {
            // Termination checks come first so recovery steps count too.
            if context.step_count() >= max_steps {
                reason = Some(format!("step cap of {max_steps} reached"));
                outcome = SessionOutcome::StepsExhausted;
                break;
            }
            if context.last_steps_all_failed(failure_limit) {
                reason = Some(format!("{failure_limit} consecutive tool failures"));
                outcome = SessionOutcome::CannotResolve;
                break;
            }

            let step_no = context.step_count() + 1;
            let optimized = optimizer::optimize(&context, &self.config.optimizer);
            let prompt_text = prompt::assemble_prompt(&optimized, step_no);

            let planned = match self.planner.plan(&prompt_text).await {
                Ok(raw) => planner::parse_planner_output(&raw),
                Err(e) => Err(e),
            };

            let (action, invocation) = match planned {
                Ok(pair) => pair,
                Err(e) => {
                    self.log(
                        LogLevel::Warn,
                        "planner",
                        &format!("invalid planner response: {e}"),
                        Some(step_no),
                    );
                    match self.recover(&mut context, step_no, &e).await {
                        Ok(()) => {
                            self.pace().await;
                            continue;
                        }
                        Err(recovery_err) => {
                            reason = Some(format!("recovery failed: {recovery_err}"));
                            outcome = SessionOutcome::CannotResolve;
                            break;
                        }
                    }
                }
            };

            let signature = action_signature(
                invocation.name(),
                &action.tool_parameters,
                &context.current_working_directory,
            );

            // Deduplication gate: identical signature in the window is not
            // dispatched again.
            if let Some(duplicate) = context.recent_duplicate(&signature, step_no) {
                let duplicate_step = duplicate.step_no;
                let prior = duplicate.result.clone();
                self.log(
                    LogLevel::Debug,
                    "orchestrator",
                    &format!("skipping duplicate of step {duplicate_step}"),
                    Some(step_no),
                );
                let skipped = ToolOutcome::skipped(duplicate_step, prior);
                self.record_step(&mut context, step_no, &action.thought, &invocation, &skipped, signature);
                self.pace().await;
                continue;
            }

            self.log(
                LogLevel::Info,
                &format!("tool:{}", invocation.name()),
                "dispatching",
                Some(step_no),
            );

            let executed = self.executor.execute(&invocation, &mut context, step_no).await;
            let tool_outcome = match executed {
                Ok(executed_outcome) => executed_outcome,
                Err(TriageError::Interrupted) | Err(TriageError::UserAbort(_)) => {
                    let partial = ToolOutcome::error("interrupted by user");
                    self.record_step(&mut context, step_no, &action.thought, &invocation, &partial, signature);
                    reason = Some("user interrupt".into());
                    outcome = SessionOutcome::AbortedByUser;
                    break;
                }
                // Anything a tool throws is recorded and the loop continues.
                Err(e) => ToolOutcome::error(e.to_string()),
            };

            self.record_step(&mut context, step_no, &action.thought, &invocation, &tool_outcome, signature);

            // Feed executed-command streams through the evolution engine.
            if let Some(combined) = combined_streams(&tool_outcome) {
                let transition = context.update_error_state(&combined, step_no);
                self.log(
                    LogLevel::Debug,
                    "evolution",
                    &format!("transition: {transition:?}"),
                    Some(step_no),
                );
            }

            if tool_outcome.status == ToolStatus::Finished {
                if let ToolInvocation::FinishDebugging(params) = &invocation {
                    outcome = params.final_status.into();
                    self.ui.display_block(
                        "Debugging session complete",
                        &params.conclusion_message_for_user,
                    );
                }
                break;
            }

            self.pace().await;
        }

        let report = SessionReport {
            outcome,
            termination_reason: reason.clone(),
            steps_taken: context.step_count(),
            context,
        };

        self.log(
            LogLevel::Info,
            "orchestrator",
            &format!(
                "session ended: {} ({})",
                report.outcome,
                reason.unwrap_or_else(|| "planner concluded".into())
            ),
            None,
        );
        self.ui.display_block(
            "Final status",
            &format!("{} after {} steps", report.outcome, report.steps_taken),
        );

        if let Some(store) = &self.store {
            let log = SessionLog::from_session(&report.context, report.outcome);
            if let Err(e) = store.save(&log).await {
                self.log(
                    LogLevel::Warn,
                    "session",
                    &format!("failed to persist session log: {e}"),
                    None,
                );
            }
        }

        Ok(report)
    }

    /// Single recovery attempt after an unusable planner response: ask the
    /// user how to proceed and record the exchange as a step.
    async fn recover(
        &self,
        context: &mut AgentContext,
        step_no: usize,
        cause: &TriageError,
    ) -> TriageResult<()> {
        let question =
            format!("I could not determine a valid next action ({cause}). How should I proceed?");
        let parameters = json!({ "question_for_user": question });
        let signature = action_signature(
            "ask_user_for_clarification",
            &parameters,
            &context.current_working_directory,
        );

        let reply = self.ui.ask_input(&question).await?;
        let step = Step {
            step_no,
            thought: "Recovering from an unusable planner response".into(),
            action_taken: ActionTaken {
                tool: "ask_user_for_clarification".into(),
                parameters,
            },
            result: json!({
                "status": "success",
                "question": question,
                "user_reply": reply,
                "recovery": true,
            }),
        };
        context.append_step(step, signature);
        Ok(())
    }

    fn record_step(
        &self,
        context: &mut AgentContext,
        step_no: usize,
        thought: &str,
        invocation: &ToolInvocation,
        outcome: &ToolOutcome,
        signature: String,
    ) {
        let step = Step {
            step_no,
            thought: thought.to_string(),
            action_taken: ActionTaken {
                tool: invocation.name().to_string(),
                parameters: invocation_parameters(invocation),
            },
            result: outcome.to_json(),
        };
        context.append_step(step, signature);
    }

    async fn pace(&self) {
        if self.config.pacing_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.config.pacing_ms)).await;
        }
    }

    fn log(&self, level: LogLevel, source: &str, message: &str, step: Option<usize>) {
        let mut entry = LogEntry::at(level, source, message);
        if let Some(step) = step {
            entry = entry.step(step);
        }
        self.logger.dispatch(&entry);
    }
}

/// Combined stderr-then-stdout text of a tool result that executed a command.
fn combined_streams(outcome: &ToolOutcome) -> Option<String> {
    let payload = &outcome.payload;
    let has_streams = payload.get("stdout").is_some() || payload.get("stderr").is_some();
    if !has_streams {
        return None;
    }
    let stdout = payload.get("stdout").and_then(|v| v.as_str()).unwrap_or("");
    let stderr = payload.get("stderr").and_then(|v| v.as_str()).unwrap_or("");
    Some(if stdout.is_empty() {
        stderr.to_string()
    } else if stderr.is_empty() {
        stdout.to_string()
    } else {
        format!("{stderr}\n{stdout}")
    })
}

fn invocation_parameters(invocation: &ToolInvocation) -> serde_json::Value {
    match invocation {
        ToolInvocation::ListDirectoryContents(p) => serde_json::to_value(p),
        ToolInvocation::ReadFileContent(p) => serde_json::to_value(p),
        ToolInvocation::RunDiagnosticCommand(p) => serde_json::to_value(p),
        ToolInvocation::SearchFileContent(p) => serde_json::to_value(p),
        ToolInvocation::GetFileStructure(p) => serde_json::to_value(p),
        ToolInvocation::ProposeCodePatch(p) => serde_json::to_value(p),
        ToolInvocation::ProposeFixByCommand(p) => serde_json::to_value(p),
        ToolInvocation::AskUserForClarification(p) => serde_json::to_value(p),
        ToolInvocation::FinishDebugging(p) => serde_json::to_value(p),
    }
    .unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interact::MockUser;
    use crate::planner::MockPlanner;
    use crate::runner::MockRunner;

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            pacing_ms: 0,
            ..Default::default()
        }
    }

    fn finish_response(status: &str) -> String {
        json!({
            "thought": "done",
            "tool_to_use": "finish_debugging",
            "tool_parameters": {
                "conclusion_message_for_user": "wrapped up",
                "final_status": status
            }
        })
        .to_string()
    }

    #[test]
    fn signature_stable_across_key_order() {
        let cwd = Path::new("/p");
        let a = action_signature(
            "read_file_content",
            &json!({"file_path": "a.py", "start_line": 1}),
            cwd,
        );
        let b = action_signature(
            "read_file_content",
            &json!({"start_line": 1, "file_path": "a.py"}),
            cwd,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn signature_normalizes_absolute_paths() {
        let cwd = Path::new("/home/user/project");
        let relative = action_signature("read_file_content", &json!({"file_path": "src/app.py"}), cwd);
        let absolute = action_signature(
            "read_file_content",
            &json!({"file_path": "/home/user/project/src/app.py"}),
            cwd,
        );
        let dotted = action_signature(
            "read_file_content",
            &json!({"file_path": "./src/app.py"}),
            cwd,
        );
        assert_eq!(relative, absolute);
        assert_eq!(relative, dotted);
    }

    #[test]
    fn signature_differs_by_tool_and_params() {
        let cwd = Path::new("/p");
        let read = action_signature("read_file_content", &json!({"file_path": "a.py"}), cwd);
        let other_file = action_signature("read_file_content", &json!({"file_path": "b.py"}), cwd);
        let list = action_signature("list_directory_contents", &json!({}), cwd);
        assert_ne!(read, other_file);
        assert_ne!(read, list);
    }

    #[tokio::test]
    async fn run_finishes_on_planner_conclusion() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), "print('ok')").unwrap();

        let planner = Arc::new(MockPlanner::new(vec![finish_response("guidance_provided")]));
        let orchestrator = Orchestrator::new(
            planner,
            Arc::new(MockRunner::always_ok("")),
            Arc::new(MockUser::new()),
        )
        .with_config(fast_config());

        let report = orchestrator
            .run(
                "explain this",
                CommandCapture::new("python app.py", "", "ValueError: boom", 1),
                dir.path(),
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, SessionOutcome::GuidanceProvided);
        assert_eq!(report.steps_taken, 1);
        assert!(report.context.invariants_hold());
    }

    #[tokio::test]
    async fn run_exhausts_step_cap() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), "x").unwrap();

        // The planner always asks for a structure that is served from cache;
        // dedup skips keep the loop spinning to the cap.
        let response = json!({
            "thought": "look around",
            "tool_to_use": "get_file_structure",
            "tool_parameters": {}
        })
        .to_string();
        let responses = vec![response; 30];

        let mut config = fast_config();
        config.constraints.max_session_steps = 5;

        let orchestrator = Orchestrator::new(
            Arc::new(MockPlanner::new(responses)),
            Arc::new(MockRunner::always_ok("")),
            Arc::new(MockUser::new()),
        )
        .with_config(config);

        let report = orchestrator
            .run(
                "debug",
                CommandCapture::new("python app.py", "", "ValueError: boom", 1),
                dir.path(),
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, SessionOutcome::StepsExhausted);
        assert_eq!(report.steps_taken, 5);
    }

    #[tokio::test]
    async fn planner_breakdown_without_user_is_cannot_resolve() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), "x").unwrap();

        // Planner emits garbage and the scripted user has no reply queued, so
        // the recovery itself fails.
        let orchestrator = Orchestrator::new(
            Arc::new(MockPlanner::new(vec!["no json here".into()])),
            Arc::new(MockRunner::always_ok("")),
            Arc::new(MockUser::new()),
        )
        .with_config(fast_config());

        let report = orchestrator
            .run(
                "debug",
                CommandCapture::new("python app.py", "", "ValueError: boom", 1),
                dir.path(),
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, SessionOutcome::CannotResolve);
        assert!(report.termination_reason.unwrap().contains("recovery failed"));
    }

    #[tokio::test]
    async fn recovery_records_clarification_step() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), "x").unwrap();

        let planner = Arc::new(MockPlanner::new(vec![
            "not valid json".into(),
            finish_response("cannot_resolve"),
        ]));
        let user = Arc::new(MockUser::new().with_replies(vec!["just give up".into()]));

        let orchestrator = Orchestrator::new(
            planner,
            Arc::new(MockRunner::always_ok("")),
            user,
        )
        .with_config(fast_config());

        let report = orchestrator
            .run(
                "debug",
                CommandCapture::new("python app.py", "", "ValueError: boom", 1),
                dir.path(),
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, SessionOutcome::CannotResolve);
        assert_eq!(report.steps_taken, 2);
        let recovery_step = &report.context.session_history[0];
        assert_eq!(recovery_step.action_taken.tool, "ask_user_for_clarification");
        assert_eq!(recovery_step.result["user_reply"], "just give up");
        assert_eq!(recovery_step.result["recovery"], true);
    }
}
