//! User interaction capability.
//!
//! Confirmation prompts, free-text questions, and block display are behind a
//! trait so the orchestrator can run against a terminal, a test script, or an
//! embedding UI. [`MockUser`] drives the test suite.

use async_trait::async_trait;

use crate::error::{TriageError, TriageResult};

#[async_trait]
pub trait UserInterface: Send + Sync {
    /// Ask a yes/no question and block until answered.
    async fn ask_yes_no(&self, prompt: &str) -> TriageResult<bool>;

    /// Ask for free-text input and block until answered.
    async fn ask_input(&self, prompt: &str) -> TriageResult<String>;

    /// Display a titled block of content (diff, proposed command, banner).
    fn display_block(&self, title: &str, body: &str);
}

// ─── MockUser ───────────────────────────────────────────────────────────────

/// Scripted user for tests: queued yes/no answers and text replies, with a
/// record of everything displayed.
pub struct MockUser {
    confirmations: std::sync::Mutex<Vec<bool>>,
    replies: std::sync::Mutex<Vec<String>>,
    displayed: std::sync::Mutex<Vec<(String, String)>>,
}

impl MockUser {
    pub fn new() -> Self {
        Self {
            confirmations: std::sync::Mutex::new(Vec::new()),
            replies: std::sync::Mutex::new(Vec::new()),
            displayed: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_confirmations(self, answers: Vec<bool>) -> Self {
        *self.confirmations.lock().unwrap() = answers;
        self
    }

    pub fn with_replies(self, replies: Vec<String>) -> Self {
        *self.replies.lock().unwrap() = replies;
        self
    }

    /// Everything shown via `display_block`, in order.
    pub fn displayed_blocks(&self) -> Vec<(String, String)> {
        self.displayed.lock().unwrap().clone()
    }
}

impl Default for MockUser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserInterface for MockUser {
    async fn ask_yes_no(&self, _prompt: &str) -> TriageResult<bool> {
        let mut confirmations = self.confirmations.lock().unwrap();
        if confirmations.is_empty() {
            return Err(TriageError::UserAbort("no scripted confirmation".into()));
        }
        Ok(confirmations.remove(0))
    }

    async fn ask_input(&self, _prompt: &str) -> TriageResult<String> {
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            return Err(TriageError::UserAbort("no scripted reply".into()));
        }
        Ok(replies.remove(0))
    }

    fn display_block(&self, title: &str, body: &str) {
        self.displayed
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
    }
}

// ─── TerminalUser (behind `native` feature) ─────────────────────────────────

/// Prompts on stdin/stdout. Blocking reads run on the tokio blocking pool so
/// the loop's single thread is not stalled.
#[cfg(feature = "native")]
pub struct TerminalUser;

#[cfg(feature = "native")]
impl TerminalUser {
    pub fn new() -> Self {
        Self
    }

    fn read_line_blocking() -> std::io::Result<String> {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }
}

#[cfg(feature = "native")]
impl Default for TerminalUser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "native")]
#[async_trait]
impl UserInterface for TerminalUser {
    async fn ask_yes_no(&self, prompt: &str) -> TriageResult<bool> {
        println!("{prompt} [y/N]");
        let line = tokio::task::spawn_blocking(Self::read_line_blocking)
            .await
            .map_err(|e| TriageError::Session(format!("stdin task failed: {e}")))??;
        Ok(matches!(line.to_lowercase().as_str(), "y" | "yes"))
    }

    async fn ask_input(&self, prompt: &str) -> TriageResult<String> {
        println!("{prompt}");
        let line = tokio::task::spawn_blocking(Self::read_line_blocking)
            .await
            .map_err(|e| TriageError::Session(format!("stdin task failed: {e}")))??;
        Ok(line)
    }

    fn display_block(&self, title: &str, body: &str) {
        println!("── {title} ──");
        println!("{body}");
        println!("──{}──", "─".repeat(title.len() + 2));
    }
}
