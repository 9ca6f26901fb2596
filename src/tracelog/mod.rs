//! Trace log — structured event records for the debugging session.
//!
//! Every orchestrator step, tool dispatch, dedup skip, error transition, and
//! termination is emitted as a [`LogEntry`]. A [`TraceLogger`] routes entries
//! to its registered sinks, each with its own severity threshold, so a
//! terminal can show `Info+` while a memory sink captures everything for
//! post-session inspection.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a trace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// A structured trace entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// Source component (e.g. "orchestrator", "tool:read_file_content", "evolution").
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Step number at emission time, if inside the loop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn at(level: LogLevel, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            source: source.into(),
            session_id: None,
            step: None,
            message: message.into(),
            payload: None,
        }
    }

    pub fn step(mut self, step: usize) -> Self {
        self.step = Some(step);
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// One-line rendering: `[LEVEL] timestamp source#step: message`.
    pub fn render(&self) -> String {
        let mut line = format!(
            "[{:<5}] {} {}",
            self.level,
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.source
        );
        if let Some(step) = self.step {
            line.push_str(&format!("#{step}"));
        }
        line.push_str(": ");
        line.push_str(&self.message);
        line
    }
}

/// Destination for trace entries.
pub trait LogSink: Send + Sync {
    fn write(&self, entry: &LogEntry);

    fn flush(&self) {}
}

/// Routes entries to registered sinks, each gated by its own threshold.
pub struct TraceLogger {
    routes: Vec<(LogLevel, Arc<dyn LogSink>)>,
}

impl TraceLogger {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Register a sink that receives every entry.
    pub fn add_sink(&mut self, sink: Arc<dyn LogSink>) {
        self.add_filtered_sink(LogLevel::Trace, sink);
    }

    /// Register a sink that only receives entries at or above `threshold`.
    pub fn add_filtered_sink(&mut self, threshold: LogLevel, sink: Arc<dyn LogSink>) {
        self.routes.push((threshold, sink));
    }

    /// Deliver one entry to every sink whose threshold admits it.
    pub fn dispatch(&self, entry: &LogEntry) {
        for (threshold, sink) in &self.routes {
            if entry.level >= *threshold {
                sink.write(entry);
            }
        }
    }

    pub fn emit(&self, level: LogLevel, source: &str, message: &str) {
        self.dispatch(&LogEntry::at(level, source, message));
    }

    pub fn debug(&self, source: &str, message: &str) {
        self.emit(LogLevel::Debug, source, message);
    }

    pub fn info(&self, source: &str, message: &str) {
        self.emit(LogLevel::Info, source, message);
    }

    pub fn warn(&self, source: &str, message: &str) {
        self.emit(LogLevel::Warn, source, message);
    }

    pub fn error(&self, source: &str, message: &str) {
        self.emit(LogLevel::Error, source, message);
    }

    pub fn flush(&self) {
        for (_, sink) in &self.routes {
            sink.flush();
        }
    }

    pub fn sink_count(&self) -> usize {
        self.routes.len()
    }
}

impl Default for TraceLogger {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Built-in Sinks ────────────────────────────────────────────────────────

/// Writes rendered lines to stdout.
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn write(&self, entry: &LogEntry) {
        println!("{}", entry.render());
    }
}

/// Captures entries in memory, for tests and post-session inspection.
#[derive(Default)]
pub struct MemorySink {
    captured: RwLock<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.captured.read().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.captured.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut captured) = self.captured.write() {
            captured.clear();
        }
    }
}

impl LogSink for MemorySink {
    fn write(&self, entry: &LogEntry) {
        if let Ok(mut captured) = self.captured.write() {
            captured.push(entry.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entry_construction() {
        let entry = LogEntry::at(LogLevel::Info, "orchestrator", "session start");
        assert_eq!(entry.level, LogLevel::Info);
        assert_eq!(entry.source, "orchestrator");
        assert!(entry.step.is_none());
    }

    #[test]
    fn entry_builders() {
        let entry = LogEntry::at(LogLevel::Debug, "tool:search_file_content", "cache hit")
            .step(4)
            .payload(json!({"key": "TODO:py:10"}));
        assert_eq!(entry.step, Some(4));
        assert_eq!(entry.payload.unwrap()["key"], "TODO:py:10");
    }

    #[test]
    fn render_layout() {
        let entry = LogEntry::at(LogLevel::Error, "evolution", "new blocking error").step(2);
        let line = entry.render();
        assert!(line.starts_with("[ERROR]"));
        assert!(line.contains("evolution#2: new blocking error"));

        let plain = LogEntry::at(LogLevel::Info, "orchestrator", "done").render();
        assert!(plain.contains("orchestrator: done"));
        assert!(!plain.contains('#'));
    }

    #[test]
    fn level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn filtered_sink_gates_by_threshold() {
        let everything = Arc::new(MemorySink::new());
        let warnings_only = Arc::new(MemorySink::new());
        let mut logger = TraceLogger::new();
        logger.add_sink(everything.clone());
        logger.add_filtered_sink(LogLevel::Warn, warnings_only.clone());

        logger.info("orchestrator", "routine");
        logger.error("orchestrator", "broken");

        assert_eq!(everything.len(), 2);
        assert_eq!(warnings_only.len(), 1);
        assert_eq!(warnings_only.entries()[0].message, "broken");
    }

    #[test]
    fn dispatch_reaches_all_admitting_sinks() {
        let a = Arc::new(MemorySink::new());
        let b = Arc::new(MemorySink::new());
        let mut logger = TraceLogger::new();
        logger.add_sink(a.clone());
        logger.add_sink(b.clone());
        assert_eq!(logger.sink_count(), 2);

        logger.debug("tool:list_directory_contents", "dispatch");
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn memory_sink_clear() {
        let sink = MemorySink::new();
        sink.write(&LogEntry::at(LogLevel::Info, "x", "y"));
        assert!(!sink.is_empty());
        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn entry_serializes() {
        let entry = LogEntry::at(LogLevel::Warn, "planner", "retry").session("s1");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains(r#""level":"warn""#));
        assert!(json.contains(r#""session_id":"s1""#));
    }
}
