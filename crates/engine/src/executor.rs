//! Delegated-tool execution.
//!
//! [`run_tool`] spawns an external computation (backtest/optimize script),
//! streams its stdout for `progress=<n>` reports, captures stderr for
//! diagnostics, and honors cooperative cancellation by killing the child.
//! The job runner drives the returned future and consumes progress reports
//! from the channel concurrently.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use gridpilot_core::error::CoreError;
use gridpilot_core::progress::{parse_progress_line, PROGRESS_SPAWNED};

/// Maximum stderr bytes captured for diagnostics.
const MAX_STDERR_BYTES: usize = 64 * 1024;

/// One external tool invocation.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

/// How a tool run ended.
#[derive(Debug)]
pub enum ToolRun {
    Finished {
        exit_code: i32,
        /// The last stdout line that parsed as a JSON object, if any.
        /// Tools report their result this way; its absence is a failure.
        result: Option<serde_json::Value>,
        /// Captured stderr (capped), for failure messages.
        stderr: String,
    },
    /// The cancellation token fired; the child was killed.
    Cancelled,
}

/// Run a tool to completion (or cancellation).
///
/// Progress reports parsed from stdout are pushed into `progress` already
/// mapped into the job's overall range; [`PROGRESS_SPAWNED`] is pushed as
/// soon as the child is confirmed up. Spawn failures are synchronous
/// [`CoreError::Spawn`]s; anything after that is reported through the
/// returned [`ToolRun`].
pub async fn run_tool(
    inv: ToolInvocation,
    cancel: CancellationToken,
    progress: mpsc::UnboundedSender<u8>,
) -> Result<ToolRun, CoreError> {
    let mut cmd = Command::new(&inv.program);
    cmd.args(&inv.args)
        .current_dir(&inv.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| CoreError::Spawn {
        program: inv.program.display().to_string(),
        source,
    })?;

    let _ = progress.send(PROGRESS_SPAWNED);

    // Stderr drains in its own task so a chatty tool cannot deadlock
    // against an un-read pipe.
    let stderr_handle = child.stderr.take();
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stderr) = stderr_handle {
            let _ = (&mut stderr)
                .take(MAX_STDERR_BYTES as u64)
                .read_to_end(&mut buf)
                .await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    });

    let stdout = child.stdout.take();
    let mut lines = stdout.map(|s| BufReader::new(s).lines());
    let mut result: Option<serde_json::Value> = None;

    // Consume stdout until EOF, watching for cancellation between lines.
    if let Some(lines) = lines.as_mut() {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = child.kill().await;
                    stderr_task.abort();
                    return Ok(ToolRun::Cancelled);
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(mapped) = parse_progress_line(&line) {
                            let _ = progress.send(mapped);
                        } else if let Ok(value) =
                            serde_json::from_str::<serde_json::Value>(line.trim())
                        {
                            if value.is_object() {
                                result = Some(value);
                            }
                        }
                    }
                    Ok(None) | Err(_) => break,
                },
            }
        }
    }

    // Stdout is closed; the process is finishing. A cancellation arriving
    // now still wins over reaping.
    let status = tokio::select! {
        () = cancel.cancelled() => {
            let _ = child.kill().await;
            stderr_task.abort();
            return Ok(ToolRun::Cancelled);
        }
        status = child.wait() => status,
    };

    let exit_code = match status {
        Ok(st) => st.code().unwrap_or(-1),
        Err(_) => -1,
    };
    let stderr = stderr_task.await.unwrap_or_default();

    Ok(ToolRun::Finished {
        exit_code,
        result,
        stderr,
    })
}
