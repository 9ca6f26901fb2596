//! Shell tools: read-only diagnostics and user-confirmed fix commands.

use serde_json::json;

use crate::context::AgentContext;
use crate::error::TriageResult;
use crate::interact::UserInterface;
use crate::runner::CommandRunner;

use super::{DiagnosticCommandParams, FixCommandParams, ToolOutcome};

/// Substring denylist for diagnostic commands. Deliberately coarse: any
/// command containing one of these anywhere is rejected, so `scp` is blocked
/// because it contains `cp`.
pub const DIAGNOSTIC_DENYLIST: [&str; 10] =
    ["rm", "del", "format", "mkfs", "dd", "mv", "cp", ">", ">>", "sudo"];

/// The denylist entry a command trips on, if any.
pub fn denied_substring(command: &str) -> Option<&'static str> {
    DIAGNOSTIC_DENYLIST
        .iter()
        .find(|token| command.contains(*token))
        .copied()
}

pub async fn run_diagnostic_command(
    runner: &dyn CommandRunner,
    context: &AgentContext,
    params: &DiagnosticCommandParams,
    timeout_secs: u64,
) -> TriageResult<ToolOutcome> {
    if params.command_string.trim().is_empty() {
        return Ok(ToolOutcome::error("command_string must not be empty"));
    }
    if let Some(token) = denied_substring(&params.command_string) {
        return Ok(ToolOutcome::error(format!(
            "Command rejected: contains '{token}'"
        )));
    }

    let output = runner
        .run(
            &params.command_string,
            timeout_secs,
            Some(context.current_working_directory.as_path()),
        )
        .await?;

    Ok(ToolOutcome::success(json!({
        "command": params.command_string,
        "stdout": output.stdout,
        "stderr": output.stderr,
        "exit_code": output.exit_code,
        "timed_out": output.timed_out,
    })))
}

pub async fn propose_fix_by_command(
    runner: &dyn CommandRunner,
    ui: &dyn UserInterface,
    context: &AgentContext,
    params: &FixCommandParams,
    timeout_secs: u64,
) -> TriageResult<ToolOutcome> {
    ui.display_block(
        "Proposed fix command",
        &format!(
            "{}\n\n{}",
            params.command_to_propose, params.command_description
        ),
    );

    let confirmed = ui.ask_yes_no("Run this command?").await?;
    if !confirmed {
        return Ok(ToolOutcome::success(json!({
            "command": params.command_to_propose,
            "user_confirmation": false,
            "executed": false,
        })));
    }

    let output = runner
        .run(
            &params.command_to_propose,
            timeout_secs,
            Some(context.current_working_directory.as_path()),
        )
        .await?;

    Ok(ToolOutcome::success(json!({
        "command": params.command_to_propose,
        "user_confirmation": true,
        "executed": true,
        "stdout": output.stdout,
        "stderr": output.stderr,
        "exit_code": output.exit_code,
        "timed_out": output.timed_out,
    })))
}
