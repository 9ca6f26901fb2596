use serde::{Deserialize, Serialize};

// ─── Initial Command Capture ────────────────────────────────────────────────

/// The failing command captured once at session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandCapture {
    pub command_string: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandCapture {
    pub fn new(
        command_string: impl Into<String>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        exit_code: i32,
    ) -> Self {
        Self {
            command_string: command_string.into(),
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// Combined output stream, stderr first since that is where errors live.
    pub fn combined_output(&self) -> String {
        if self.stdout.is_empty() {
            self.stderr.clone()
        } else if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stderr, self.stdout)
        }
    }

    pub fn failed(&self) -> bool {
        self.exit_code != 0
    }
}

// ─── Planner Contract ───────────────────────────────────────────────────────

/// The single JSON object the planner must return each step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub thought: String,
    pub tool_to_use: String,
    pub tool_parameters: serde_json::Value,
}

// ─── Steps ──────────────────────────────────────────────────────────────────

/// One iteration of the orchestrator loop, as recorded in session history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub step_no: usize,
    pub thought: String,
    pub action_taken: ActionTaken,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTaken {
    pub tool: String,
    pub parameters: serde_json::Value,
}

impl Step {
    /// Status string recorded in this step's result, if any.
    pub fn result_status(&self) -> Option<&str> {
        self.result.get("status").and_then(|s| s.as_str())
    }

    pub fn is_failure(&self) -> bool {
        self.result_status() == Some("error")
    }
}

// ─── Tool Outcome Status ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Error,
    Finished,
    Skipped,
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolStatus::Success => write!(f, "success"),
            ToolStatus::Error => write!(f, "error"),
            ToolStatus::Finished => write!(f, "finished"),
            ToolStatus::Skipped => write!(f, "skipped"),
        }
    }
}

// ─── Session Outcome ────────────────────────────────────────────────────────

/// Terminal state of a debugging session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Resolved,
    GuidanceProvided,
    CannotResolve,
    AbortedByUser,
    StepsExhausted,
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionOutcome::Resolved => write!(f, "resolved"),
            SessionOutcome::GuidanceProvided => write!(f, "guidance_provided"),
            SessionOutcome::CannotResolve => write!(f, "cannot_resolve"),
            SessionOutcome::AbortedByUser => write!(f, "aborted_by_user"),
            SessionOutcome::StepsExhausted => write!(f, "steps_exhausted"),
        }
    }
}

/// Final status the planner passes to `finish_debugging`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    Resolved,
    GuidanceProvided,
    CannotResolve,
    AbortedByUserRequest,
}

impl From<FinalStatus> for SessionOutcome {
    fn from(status: FinalStatus) -> Self {
        match status {
            FinalStatus::Resolved => SessionOutcome::Resolved,
            FinalStatus::GuidanceProvided => SessionOutcome::GuidanceProvided,
            FinalStatus::CannotResolve => SessionOutcome::CannotResolve,
            FinalStatus::AbortedByUserRequest => SessionOutcome::AbortedByUser,
        }
    }
}

// ─── Tool Catalog Descriptors ───────────────────────────────────────────────

/// Descriptor for one catalog tool, as presented to the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

// ─── Session Constraints ────────────────────────────────────────────────────

/// Hard limits and permissions for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConstraints {
    #[serde(default = "default_max_session_steps")]
    pub max_session_steps: usize,
    #[serde(default = "default_true")]
    pub allow_file_modifications: bool,
    #[serde(default = "default_true")]
    pub allow_command_execution: bool,
}

fn default_max_session_steps() -> usize {
    20
}

fn default_true() -> bool {
    true
}

impl Default for SessionConstraints {
    fn default() -> Self {
        Self {
            max_session_steps: default_max_session_steps(),
            allow_file_modifications: true,
            allow_command_execution: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_capture_combined_output() {
        let capture = CommandCapture::new("python app.py", "starting", "Traceback", 1);
        let combined = capture.combined_output();
        assert!(combined.starts_with("Traceback"));
        assert!(combined.contains("starting"));
        assert!(capture.failed());
    }

    #[test]
    fn command_capture_combined_single_stream() {
        let capture = CommandCapture::new("ls", "file.txt\n", "", 0);
        assert_eq!(capture.combined_output(), "file.txt\n");
        assert!(!capture.failed());
    }

    #[test]
    fn planned_action_deserializes() {
        let raw = json!({
            "thought": "read the failing file",
            "tool_to_use": "read_file_content",
            "tool_parameters": {"file_path": "etl.py"}
        });
        let action: PlannedAction = serde_json::from_value(raw).unwrap();
        assert_eq!(action.tool_to_use, "read_file_content");
        assert_eq!(action.tool_parameters["file_path"], "etl.py");
    }

    #[test]
    fn step_result_status() {
        let step = Step {
            step_no: 1,
            thought: "list the project".into(),
            action_taken: ActionTaken {
                tool: "list_directory_contents".into(),
                parameters: json!({}),
            },
            result: json!({"status": "error", "message": "denied"}),
        };
        assert_eq!(step.result_status(), Some("error"));
        assert!(step.is_failure());
    }

    #[test]
    fn tool_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ToolStatus::Skipped).unwrap(),
            r#""skipped""#
        );
        assert_eq!(ToolStatus::Finished.to_string(), "finished");
    }

    #[test]
    fn final_status_maps_to_outcome() {
        assert_eq!(
            SessionOutcome::from(FinalStatus::Resolved),
            SessionOutcome::Resolved
        );
        assert_eq!(
            SessionOutcome::from(FinalStatus::AbortedByUserRequest),
            SessionOutcome::AbortedByUser
        );
    }

    #[test]
    fn constraints_defaults() {
        let constraints = SessionConstraints::default();
        assert_eq!(constraints.max_session_steps, 20);
        assert!(constraints.allow_file_modifications);
        assert!(constraints.allow_command_execution);
    }

    #[test]
    fn constraints_deserialize_with_defaults() {
        let constraints: SessionConstraints = serde_json::from_str("{}").unwrap();
        assert_eq!(constraints.max_session_steps, 20);
    }
}
