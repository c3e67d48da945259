//! Subprocess execution for control surface binaries.
//!
//! Every automation call goes through [`run_command`] or [`run_with_stdin`],
//! which capture stdout/stderr, trim them, and log them at debug level.

use std::path::Path;
use std::process::{Output, Stdio};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use vmforge_shared::errors::{ForgeError, ForgeResult};

/// Captured result of one process invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Trimmed standard output.
    pub stdout: String,
    /// Trimmed standard error.
    pub stderr: String,
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub success: bool,
}

impl CommandOutput {
    fn from_output(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            code: output.status.code(),
            success: output.status.success(),
        }
    }

    /// Trimmed stdout on success, otherwise a [`ForgeError::Command`] built
    /// from trimmed stderr.
    pub fn into_result(self, program: &str) -> ForgeResult<String> {
        if self.success {
            Ok(self.stdout)
        } else {
            Err(ForgeError::command(program, self.stderr))
        }
    }
}

/// Run `program args...` to completion with stdin closed.
pub async fn run_command(program: &Path, args: &[String]) -> ForgeResult<CommandOutput> {
    tracing::debug!(program = %program.display(), ?args, "Executing command");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| spawn_error(program, e))?;

    let output = CommandOutput::from_output(output);
    log_output(program, &output);
    Ok(output)
}

/// Run `program args...`, writing `input` to its stdin and closing it.
///
/// The write runs as a future joined with the wait for process exit, so a
/// process that exits without draining stdin cannot deadlock the caller. A
/// failed write is logged; the caller only sees the process result.
pub async fn run_with_stdin(
    program: &Path,
    args: &[String],
    input: &[u8],
) -> ForgeResult<CommandOutput> {
    tracing::debug!(
        program = %program.display(),
        ?args,
        input_bytes = input.len(),
        "Executing command with stdin"
    );

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    let stdin = child.stdin.take();
    let feed = async move {
        if let Some(mut stdin) = stdin {
            stdin.write_all(input).await?;
            stdin.shutdown().await?;
        }
        Ok::<(), std::io::Error>(())
    };

    let (fed, output) = tokio::join!(feed, child.wait_with_output());

    if let Err(e) = fed {
        tracing::warn!(
            program = %program.display(),
            error = %e,
            "Failed to write stdin of child process"
        );
    }

    let output = CommandOutput::from_output(output?);
    log_output(program, &output);
    Ok(output)
}

fn spawn_error(program: &Path, e: std::io::Error) -> ForgeError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ForgeError::ControlSurfaceUnavailable(format!("{} not found", program.display()))
    } else {
        ForgeError::Io(e)
    }
}

fn log_output(program: &Path, output: &CommandOutput) {
    tracing::debug!(
        program = %program.display(),
        code = ?output.code,
        stdout = %output.stdout,
        stderr = %output.stderr,
        "Command finished"
    );
}
