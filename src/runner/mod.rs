//! Command runner — platform-agnostic subprocess execution.
//!
//! A [`CommandRunner`] trait decouples process spawning from the OS so the
//! orchestrator and tools can be tested with canned outputs. Ship with
//! [`NativeRunner`] (behind the `native` feature) for real subprocesses and
//! [`MockRunner`] for tests.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TriageResult;

/// Output of one subprocess run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    #[serde(default)]
    pub timed_out: bool,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Combined stream, stderr first.
    pub fn combined(&self) -> String {
        if self.stdout.is_empty() {
            self.stderr.clone()
        } else if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stderr, self.stdout)
        }
    }
}

/// Subprocess capability. One outstanding run at a time per session.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a shell command with a timeout. On timeout the process is killed
    /// and whatever output was captured so far is returned with
    /// `timed_out = true`.
    async fn run(
        &self,
        command: &str,
        timeout_secs: u64,
        cwd: Option<&Path>,
    ) -> TriageResult<RunOutput>;
}

// ─── MockRunner ─────────────────────────────────────────────────────────────

/// Test runner with canned responses, drained in order.
pub struct MockRunner {
    responses: std::sync::Mutex<Vec<RunOutput>>,
    commands: std::sync::Mutex<Vec<String>>,
}

impl MockRunner {
    pub fn new(responses: Vec<RunOutput>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
            commands: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// A mock that always succeeds with the given stdout.
    pub fn always_ok(stdout: impl Into<String>) -> Self {
        let out = stdout.into();
        Self::new(vec![
            RunOutput {
                stdout: out,
                stderr: String::new(),
                exit_code: 0,
                timed_out: false,
            };
            64
        ])
    }

    /// Commands this mock has been asked to run, in order.
    pub fn commands_run(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(
        &self,
        command: &str,
        _timeout_secs: u64,
        _cwd: Option<&Path>,
    ) -> TriageResult<RunOutput> {
        self.commands.lock().unwrap().push(command.to_string());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(RunOutput {
                stdout: String::new(),
                stderr: "No more mock responses".into(),
                exit_code: 1,
                timed_out: false,
            })
        } else {
            Ok(responses.remove(0))
        }
    }
}

// ─── NativeRunner (behind `native` feature) ─────────────────────────────────

#[cfg(feature = "native")]
mod native;
#[cfg(feature = "native")]
pub use native::NativeRunner;
