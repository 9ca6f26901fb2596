//! Native OS runner using `tokio::process`.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use crate::error::TriageResult;

use super::{CommandRunner, RunOutput};

/// Runs commands as real subprocesses via `sh -c`, killing on timeout while
/// keeping whatever output was already captured.
pub struct NativeRunner;

impl NativeRunner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NativeRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for NativeRunner {
    async fn run(
        &self,
        command: &str,
        timeout_secs: u64,
        cwd: Option<&Path>,
    ) -> TriageResult<RunOutput> {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;

        // Drain both pipes concurrently so a chatty process can't deadlock on
        // a full pipe buffer before the timeout fires.
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let wait = tokio::time::timeout(
            std::time::Duration::from_secs(timeout_secs),
            child.wait(),
        )
        .await;

        let (exit_code, timed_out) = match wait {
            Ok(status) => {
                let status = status?;
                #[cfg(unix)]
                let code = {
                    use std::os::unix::process::ExitStatusExt;
                    status
                        .code()
                        .unwrap_or_else(|| status.signal().map(|s| 128 + s).unwrap_or(1))
                };
                #[cfg(not(unix))]
                let code = status.code().unwrap_or(1);
                (code, false)
            }
            Err(_) => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                (124, true)
            }
        };

        let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).to_string();
        let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).to_string();

        Ok(RunOutput {
            stdout,
            stderr,
            exit_code,
            timed_out,
        })
    }
}
