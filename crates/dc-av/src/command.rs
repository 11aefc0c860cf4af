//! Builder for running external tools with cancellation and timeout support.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use dc_core::{Error, Result};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    /// Raw standard output (thumbnails come back as JPEG bytes here).
    pub stdout: Vec<u8>,
    /// Standard error (lossy UTF-8).
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// The child is killed if the returned future is dropped, so a cancelled or
/// timed-out command never outlives its caller.
///
/// ```no_run
/// use dc_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> dc_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("magick"))
///     .arg("in.heic")
///     .arg("out.jpg")
///     .execute()
///     .await?;
/// assert!(output.status.success());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
    cancellation: Option<CancellationToken>,
}

impl ToolCommand {
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: None,
            cancellation: None,
        }
    }

    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Kill the process if it runs longer than `d`.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = Some(d);
        self
    }

    /// Kill the process when `token` is cancelled.
    pub fn cancellation(&mut self, token: CancellationToken) -> &mut Self {
        self.cancellation = Some(token);
        self
    }

    /// Short name used in errors and logs.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - [`Error::Cancelled`] if the cancellation token fired first.
    /// - [`Error::Tool`] on spawn failure, timeout, or a non-zero exit (the
    ///   message carries stderr).
    pub async fn execute(&self) -> Result<ToolOutput> {
        let program_name = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        crate::process::no_console_window(&mut cmd);

        tracing::debug!(tool = %program_name, args = ?self.args, "running tool");

        let child = cmd
            .spawn()
            .map_err(|e| Error::tool(&program_name, format!("failed to spawn: {e}")))?;

        let wait = child.wait_with_output();
        let cancelled = async {
            match &self.cancellation {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let deadline = async {
            match self.timeout {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };

        // Dropping `wait` kills the child (kill_on_drop).
        let output = tokio::select! {
            res = wait => res.map_err(|e| Error::tool(&program_name, format!("I/O error waiting for process: {e}")))?,
            _ = cancelled => {
                tracing::debug!(tool = %program_name, "tool cancelled");
                return Err(Error::Cancelled);
            }
            _ = deadline => {
                return Err(Error::tool(&program_name, format!("timed out after {:?}", self.timeout.unwrap_or_default())));
            }
        };

        let tool_output = ToolOutput {
            status: output.status,
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if !tool_output.status.success() {
            return Err(Error::tool(
                program_name,
                format!(
                    "exited with status {}: {}",
                    tool_output.status,
                    tool_output.stderr.trim()
                ),
            ));
        }

        Ok(tool_output)
    }
}
