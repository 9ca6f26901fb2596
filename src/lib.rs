//! # triage-core
//!
//! Async agentic debugging runtime for Rust — the engine behind a terminal
//! assistant that diagnoses and fixes failing shell commands through a
//! bounded tool loop, structured working memory, and hybrid code retrieval.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use triage_core::orchestrator::Orchestrator;
//! use triage_core::planner::MockPlanner;
//! use triage_core::runner::NativeRunner;
//! use triage_core::interact::TerminalUser;
//! use triage_core::types::CommandCapture;
//!
//! # async fn demo() -> triage_core::TriageResult<()> {
//! let planner = Arc::new(MockPlanner::new(vec![/* scripted responses */]));
//! let orchestrator = Orchestrator::new(
//!     planner,
//!     Arc::new(NativeRunner::new()),
//!     Arc::new(TerminalUser::new()),
//! );
//!
//! let capture = CommandCapture::new(
//!     "python app.py",
//!     "",
//!     "ModuleNotFoundError: No module named 'requests'",
//!     1,
//! );
//! let report = orchestrator.run("fix my script", capture, ".").await?;
//! println!("{}", report.outcome);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`types`] | Shared types: `CommandCapture`, `PlannedAction`, `Step`, outcomes, constraints |
//! | [`context`] | `AgentContext` working memory with named transitions, plus the pure context optimizer |
//! | [`evolution`] | Error parsing, comparison, and the blocking-error state machine |
//! | [`tool`] | Closed tool catalog as a tagged enum with one dispatch point |
//! | [`orchestrator`] | The bounded plan → validate → dedup → dispatch → update loop |
//! | [`planner`] | Abstract planning capability, JSON extraction, response validation |
//! | [`retrieval`] | Hybrid BM25 + vector search with score fusion and root-cause scoring |
//! | [`seed`] | Knowledge-base seeding: project scan, relevance filter, file state |
//! | [`runner`] | Subprocess capability with native and mock implementations |
//! | [`interact`] | User prompts and block display, terminal and mock implementations |
//! | [`session`] | Persisted session logs with an index |
//! | [`tracelog`] | Structured trace logging with pluggable sinks |
//! | [`error`] | Error types with thiserror: Validation, Tool, Planner, LimitReached, etc. |
//!
//! ## Working Memory: The Core Discipline
//!
//! The [`context`] module treats the session's working memory as a value with
//! invariants, not a scratchpad:
//!
//! - **Bounded windows** — the recent-action window never exceeds 10 entries
//!   and drives the deduplication gate; the error-progression ledger is
//!   capped during optimization
//! - **Single focus** — at most one blocking error is live at a time; the
//!   evolution engine archives, replaces, or resolves it and every
//!   observation lands in the progression ledger
//! - **Pure optimization** — prompt-building always works on a deep copy;
//!   truncation and summarization never touch the authoritative context
//! - **Eager seeding** — the project scan and initial error analysis happen
//!   before the first planner call, so step 1 already knows the tree, the
//!   relevant files, and the failing file

pub mod context;
pub mod error;
pub mod evolution;
pub mod interact;
pub mod orchestrator;
pub mod planner;
pub mod retrieval;
pub mod runner;
pub mod seed;
pub mod session;
pub mod tool;
pub mod tracelog;
pub mod types;

pub use error::{TriageError, TriageResult};
pub use types::*;
