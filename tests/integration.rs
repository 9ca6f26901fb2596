//! End-to-end session scenarios driven through mock planner, runner, and user.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use triage_core::context::RECENT_ACTIONS_CAP;
use triage_core::context::optimizer::{self, OptimizerConfig};
use triage_core::evolution::ErrorKind;
use triage_core::interact::MockUser;
use triage_core::orchestrator::{Orchestrator, OrchestratorConfig};
use triage_core::planner::MockPlanner;
use triage_core::retrieval::{fuse_rankings, FusionConfig, ScoredId};
use triage_core::runner::{MockRunner, RunOutput};
use triage_core::session::SessionStore;
use triage_core::tracelog::{MemorySink, TraceLogger};
use triage_core::types::{CommandCapture, SessionOutcome};

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        pacing_ms: 0,
        ..Default::default()
    }
}

fn planner_response(thought: &str, tool: &str, parameters: serde_json::Value) -> String {
    json!({
        "thought": thought,
        "tool_to_use": tool,
        "tool_parameters": parameters,
    })
    .to_string()
}

fn finish(status: &str) -> String {
    planner_response(
        "wrap up",
        "finish_debugging",
        json!({
            "conclusion_message_for_user": "Session conclusion",
            "final_status": status,
        }),
    )
}

// ─── Scenario: resolved missing module ──────────────────────────────────────

#[tokio::test]
async fn missing_module_resolved_by_confirmed_install() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("app.py"), "import requests\n").unwrap();

    let stderr = "Traceback (most recent call last):\n  File \"app.py\", line 1, in <module>\n    import requests\nModuleNotFoundError: No module named 'requests'";

    let planner = Arc::new(MockPlanner::new(vec![
        planner_response(
            "the module is missing, install it",
            "propose_fix_by_command",
            json!({
                "command_to_propose": "pip install requests",
                "command_description": "Install the missing requests package",
            }),
        ),
        finish("resolved"),
    ]));
    let runner = Arc::new(MockRunner::new(vec![RunOutput {
        stdout: "Successfully installed requests-2.32.0".into(),
        stderr: String::new(),
        exit_code: 0,
        timed_out: false,
    }]));
    let user = Arc::new(MockUser::new().with_confirmations(vec![true]));

    let orchestrator = Orchestrator::new(planner, runner.clone(), user).with_config(fast_config());
    let report = orchestrator
        .run(
            "my script crashes on startup",
            CommandCapture::new("python app.py", "", stderr, 1),
            dir.path(),
        )
        .await
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::Resolved);
    assert_eq!(runner.commands_run(), vec!["pip install requests".to_string()]);

    // The module error moved from current to solved when the install output
    // came back clean.
    let context = &report.context;
    assert!(context.current_blocking_error.is_none());
    assert_eq!(context.solved_issues.len(), 1);
    assert_eq!(context.solved_issues[0].error.kind, ErrorKind::ModuleNotFound);
    assert_eq!(context.solved_issues[0].error.message, "requests");
    assert_eq!(context.solved_issues[0].resolution_step, 1);
    assert!(context.invariants_hold());
}

// ─── Scenario: column typo patch ────────────────────────────────────────────

#[tokio::test]
async fn key_error_fixed_by_confirmed_patch() {
    let dir = TempDir::new().unwrap();
    let mut etl_lines: Vec<String> = (1..=45).map(|i| format!("# filler {i}")).collect();
    etl_lines[41] = "value = row[\"customer_id\"]".into();
    std::fs::write(dir.path().join("etl.py"), etl_lines.join("\n")).unwrap();
    std::fs::write(dir.path().join("data.csv"), "CustomerID,amount\n1,10\n").unwrap();

    let stderr = "Traceback (most recent call last):\n  File \"etl.py\", line 42, in <module>\nKeyError: 'customer_id'";

    let planner = Arc::new(MockPlanner::new(vec![
        planner_response(
            "inspect the failing line",
            "read_file_content",
            json!({"file_path": "etl.py", "start_line": 40, "end_line": 44}),
        ),
        planner_response(
            "the CSV column is CustomerID, patch the lookup",
            "propose_code_patch",
            json!({
                "file_path": "etl.py",
                "patch_content": [{
                    "line_number": 42,
                    "action": "replace",
                    "old_content": "value = row[\"customer_id\"]",
                    "new_content": "value = row[\"CustomerID\"]",
                }],
                "patch_description": "Use the actual CSV column name",
            }),
        ),
        finish("resolved"),
    ]));
    let user = Arc::new(MockUser::new().with_confirmations(vec![true]));

    let orchestrator = Orchestrator::new(
        planner,
        Arc::new(MockRunner::always_ok("")),
        user.clone(),
    )
    .with_config(fast_config());

    let report = orchestrator
        .run(
            "etl job crashes",
            CommandCapture::new("python etl.py", "", stderr, 1),
            dir.path(),
        )
        .await
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::Resolved);

    // Seeding discovered both files and mapped the traceback name.
    let context = &report.context;
    assert!(context.file_state.discovered_files.contains(&"etl.py".to_string()));
    assert!(context.file_state.discovered_files.contains(&"data.csv".to_string()));
    assert_eq!(context.file_state.primary_error_file.as_deref(), Some("etl.py"));

    // The patch landed on disk.
    let patched = std::fs::read_to_string(dir.path().join("etl.py")).unwrap();
    assert!(patched.contains("row[\"CustomerID\"]"));
    assert!(!patched.contains("row[\"customer_id\"]"));

    // The diff was shown before the confirmation.
    let blocks = user.displayed_blocks();
    assert!(blocks.iter().any(|(title, body)| {
        title.contains("Use the actual CSV column name") && body.contains("+value = row[\"CustomerID\"]")
    }));

    // Step results: read succeeded, patch applied.
    assert_eq!(report.steps_taken, 3);
    assert_eq!(context.session_history[0].result["status"], "success");
    assert_eq!(context.session_history[1].result["patch_applied"], true);
}

// ─── Scenario: deduplication skip ───────────────────────────────────────────

#[tokio::test]
async fn consecutive_identical_listings_are_skipped() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("app.py"), "x = 1\n").unwrap();

    let listing = planner_response("look around", "list_directory_contents", json!({}));
    let planner = Arc::new(MockPlanner::new(vec![
        listing.clone(),
        listing,
        finish("guidance_provided"),
    ]));

    let orchestrator = Orchestrator::new(
        planner,
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

    let history = &report.context.session_history;
    assert_eq!(history[0].result["status"], "success");
    assert_eq!(history[1].result["status"], "skipped");
    assert_eq!(history[1].result["duplicate_step"], 1);
    // The skipped step carries the prior result instead of a fresh listing.
    assert_eq!(history[1].result["prior_result"]["status"], "success");
}

// ─── Scenario: placeholder rejection ────────────────────────────────────────

#[tokio::test]
async fn placeholder_path_triggers_clarification_recovery() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("app.py"), "x = 1\n").unwrap();

    let planner = Arc::new(MockPlanner::new(vec![
        planner_response(
            "read the data",
            "read_file_content",
            json!({"file_path": "path/to/data"}),
        ),
        finish("cannot_resolve"),
    ]));
    let user = Arc::new(MockUser::new().with_replies(vec!["the real file is app.py".into()]));

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

    let recovery = &report.context.session_history[0];
    assert_eq!(recovery.action_taken.tool, "ask_user_for_clarification");
    assert_eq!(recovery.result["recovery"], true);
    assert_eq!(recovery.result["user_reply"], "the real file is app.py");
    assert_eq!(report.outcome, SessionOutcome::CannotResolve);
}

// ─── Scenario: hybrid retrieval weighting ───────────────────────────────────

#[test]
fn default_weights_rank_vector_heavy_doc_first() {
    let fused = fuse_rankings(
        &[
            ScoredId { id: "B".into(), score: 0.9 },
            ScoredId { id: "A".into(), score: 0.2 },
        ],
        &[
            ScoredId { id: "A".into(), score: 0.8 },
            ScoredId { id: "B".into(), score: 0.1 },
        ],
        &FusionConfig::default(),
    );

    assert_eq!(fused[0].id, "B");
    assert!((fused[0].combined_score - 0.66).abs() < 1e-6);
    assert_eq!(fused[1].id, "A");
    assert!((fused[1].combined_score - 0.38).abs() < 1e-6);
}

// ─── Scenario: termination on consecutive failures ──────────────────────────

#[tokio::test]
async fn three_consecutive_tool_failures_end_the_session() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("app.py"), "x = 1\n").unwrap();

    // Denied diagnostic commands fail without touching the runner; distinct
    // commands avoid the dedup gate.
    let planner = Arc::new(MockPlanner::new(vec![
        planner_response("try one", "run_diagnostic_command", json!({"command_string": "rm -rf build"})),
        planner_response("try two", "run_diagnostic_command", json!({"command_string": "sudo ls"})),
        planner_response("try three", "run_diagnostic_command", json!({"command_string": "mv a b"})),
        finish("resolved"),
    ]));

    let orchestrator = Orchestrator::new(
        planner,
        Arc::new(MockRunner::always_ok("never runs")),
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

    // The fourth (finishing) response is never reached.
    assert_eq!(report.steps_taken, 3);
    assert_eq!(report.outcome, SessionOutcome::CannotResolve);
    assert!(report
        .termination_reason
        .unwrap()
        .contains("consecutive tool failures"));
    assert!(report
        .context
        .session_history
        .iter()
        .all(|s| s.result["status"] == "error"));
}

// ─── Error progression across a session ─────────────────────────────────────

#[tokio::test]
async fn error_replacement_archives_previous_blocker() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("app.py"), "import json\n").unwrap();

    // The diagnostic surfaces a different error than the seeded one.
    let planner = Arc::new(MockPlanner::new(vec![
        planner_response(
            "re-run to check",
            "run_diagnostic_command",
            json!({"command_string": "python app.py --check"}),
        ),
        finish("guidance_provided"),
    ]));
    let runner = Arc::new(MockRunner::new(vec![RunOutput {
        stdout: String::new(),
        stderr: "File \"app.py\", line 9\nTypeError: unsupported operand".into(),
        exit_code: 1,
        timed_out: false,
    }]));

    let orchestrator = Orchestrator::new(planner, runner, Arc::new(MockUser::new()))
        .with_config(fast_config());

    let stderr = "File \"app.py\", line 3\nKeyError: 'name'";
    let report = orchestrator
        .run(
            "debug",
            CommandCapture::new("python app.py", "", stderr, 1),
            dir.path(),
        )
        .await
        .unwrap();

    let context = &report.context;
    let current = context.current_blocking_error.as_ref().unwrap();
    assert_eq!(current.kind, ErrorKind::Type);
    assert_eq!(context.solved_issues.len(), 1);
    assert_eq!(context.solved_issues[0].error.kind, ErrorKind::Key);
    assert!(context.invariants_hold());

    // Every observation landed in the ledger: seeding plus the diagnostic.
    assert_eq!(context.error_progression.len(), 2);
}

// ─── Bounded memory across a long session ───────────────────────────────────

#[tokio::test]
async fn long_session_respects_bounded_windows() {
    let dir = TempDir::new().unwrap();
    for i in 0..14 {
        std::fs::write(dir.path().join(format!("f{i}.py")), format!("v = {i}\n")).unwrap();
    }

    // Fourteen distinct reads, then exhaustion of the 20-step cap is avoided
    // by a finish.
    let mut responses: Vec<String> = (0..14)
        .map(|i| {
            planner_response(
                "read the next file",
                "read_file_content",
                json!({"file_path": format!("f{i}.py")}),
            )
        })
        .collect();
    responses.push(finish("guidance_provided"));

    let orchestrator = Orchestrator::new(
        Arc::new(MockPlanner::new(responses)),
        Arc::new(MockRunner::always_ok("")),
        Arc::new(MockUser::new()),
    )
    .with_config(fast_config());

    let report = orchestrator
        .run(
            "survey the project",
            CommandCapture::new("python f0.py", "", "ValueError: boom", 1),
            dir.path(),
        )
        .await
        .unwrap();

    let context = &report.context;
    assert_eq!(report.steps_taken, 15);
    assert!(context.recent_actions.len() <= RECENT_ACTIONS_CAP);
    assert!(context.invariants_hold());

    // Optimization keeps the progression ledger bounded on the prompt copy.
    let optimized = optimizer::optimize(context, &OptimizerConfig::default());
    assert!(optimized.error_progression.len() <= 10);
}

// ─── Session log persistence ────────────────────────────────────────────────

#[tokio::test]
async fn completed_session_is_persisted_with_trace() {
    let project = TempDir::new().unwrap();
    let history = TempDir::new().unwrap();
    std::fs::write(project.path().join("app.py"), "x = 1\n").unwrap();

    let sink = Arc::new(MemorySink::new());
    let mut logger = TraceLogger::new();
    logger.add_sink(sink.clone());

    let orchestrator = Orchestrator::new(
        Arc::new(MockPlanner::new(vec![finish("resolved")])),
        Arc::new(MockRunner::always_ok("")),
        Arc::new(MockUser::new()),
    )
    .with_config(fast_config())
    .with_logger(Arc::new(logger))
    .with_store(SessionStore::new(history.path()));

    let report = orchestrator
        .run(
            "quick check",
            CommandCapture::new("python app.py", "", "ValueError: boom", 1),
            project.path(),
        )
        .await
        .unwrap();
    assert_eq!(report.outcome, SessionOutcome::Resolved);

    // One session in the store, marked resolved.
    let store = SessionStore::new(history.path());
    let sessions = store.list().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].outcome, SessionOutcome::Resolved);
    assert_eq!(sessions[0].command, "python app.py");

    let loaded = store.load(&sessions[0].id).await.unwrap().unwrap();
    assert_eq!(loaded.session_type, "agentic");
    assert_eq!(loaded.user_context, "quick check");
    assert_eq!(loaded.steps_taken, 1);

    // The trace saw the session start and end.
    let messages: Vec<String> = sink.entries().iter().map(|e| e.message.clone()).collect();
    assert!(messages.iter().any(|m| m.contains("session started")));
    assert!(messages.iter().any(|m| m.contains("session ended")));
}

// ─── Refused confirmations are not errors ───────────────────────────────────

#[tokio::test]
async fn refused_fix_continues_the_loop() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("app.py"), "x = 1\n").unwrap();

    let planner = Arc::new(MockPlanner::new(vec![
        planner_response(
            "try installing",
            "propose_fix_by_command",
            json!({
                "command_to_propose": "pip install requests",
                "command_description": "Install dependency",
            }),
        ),
        finish("guidance_provided"),
    ]));
    let runner = Arc::new(MockRunner::always_ok("never"));
    let user = Arc::new(MockUser::new().with_confirmations(vec![false]));

    let orchestrator = Orchestrator::new(planner, runner.clone(), user).with_config(fast_config());
    let report = orchestrator
        .run(
            "debug",
            CommandCapture::new("python app.py", "", "ModuleNotFoundError: No module named 'requests'", 1),
            dir.path(),
        )
        .await
        .unwrap();

    // Refusal recorded as a successful step with user_confirmation=false; the
    // session still reached its conclusion.
    let first = &report.context.session_history[0];
    assert_eq!(first.result["status"], "success");
    assert_eq!(first.result["user_confirmation"], false);
    assert!(runner.commands_run().is_empty());
    assert_eq!(report.outcome, SessionOutcome::GuidanceProvided);

    // Nothing executed, so the blocking error is still live.
    assert!(report.context.current_blocking_error.is_some());
}
