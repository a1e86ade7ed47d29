//! Timeout-bounded subprocess execution.
//!
//! [`SubprocessRunner`] is the production [`ToolRunner`]: it spawns the
//! external toolchain, captures combined stdout/stderr, enforces a hard
//! wall-clock timeout, and kills the whole process group on timeout or
//! cancellation so long-running JVM/Python children cannot be orphaned.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Maximum stdout or stderr size captured per stream (10 MiB).
///
/// Output exceeding this limit is truncated to prevent memory exhaustion
/// from extremely verbose toolchains.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Captured output from a tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Complete stdout captured from the process.
    pub stdout: String,
    /// Complete stderr captured from the process.
    pub stderr: String,
    /// Process exit code (`-1` if killed by signal).
    pub exit_code: i32,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl ToolOutput {
    /// Whether the process exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Combined stdout followed by stderr, for diagnostic parsing.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            return self.stdout.clone();
        }
        if self.stdout.is_empty() {
            return self.stderr.clone();
        }
        format!("{}\n{}", self.stdout.trim_end_matches('\n'), self.stderr)
    }
}

/// Errors that can occur while running an external tool.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The tool binary could not be spawned.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool exceeded its configured timeout and was killed.
    #[error("command timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The enclosing ingestion run was cancelled.
    #[error("command cancelled")]
    Cancelled,

    /// An I/O error occurred while communicating with the process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs an external tool with a hard timeout and returns its output.
///
/// This is the seam between the parsers and the operating system; tests
/// substitute scripted fakes.
#[async_trait::async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run `program` with `args`, waiting at most `timeout`.
    ///
    /// A non-zero exit code is not an error at this layer: the caller gets
    /// the full [`ToolOutput`] and decides, because several toolchains
    /// report domain diagnostics through a non-zero exit.
    async fn run(
        &self,
        cancel: &CancellationToken,
        cwd: Option<&Path>,
        timeout: Duration,
        program: &str,
        args: &[String],
    ) -> Result<ToolOutput, ExecError>;
}

/// Production [`ToolRunner`] backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubprocessRunner;

#[async_trait::async_trait]
impl ToolRunner for SubprocessRunner {
    async fn run(
        &self,
        cancel: &CancellationToken,
        cwd: Option<&Path>,
        timeout: Duration,
        program: &str,
        args: &[String],
    ) -> Result<ToolOutput, ExecError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        // Put the child in its own process group so a timeout kill reaps
        // grandchildren too (JVM and Python tools fork helpers).
        #[cfg(unix)]
        cmd.process_group(0);

        let start = Instant::now();

        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            program: program.to_string(),
            source,
        })?;

        // Take stdout/stderr handles and read them in spawned tasks so we
        // can still call `child.wait()` (which borrows `&mut child`).
        let stdout_handle = child.stdout.take();
        let stderr_handle = child.stderr.take();

        let stdout_task = tokio::spawn(async move { read_stream(stdout_handle).await });
        let stderr_task = tokio::spawn(async move { read_stream(stderr_handle).await });

        let wait_result = tokio::select! {
            _ = cancel.cancelled() => {
                kill_process_group(&child);
                return Err(ExecError::Cancelled);
            }
            res = tokio::time::timeout(timeout, child.wait()) => res,
        };

        match wait_result {
            Ok(Ok(status)) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                let stdout_bytes = stdout_task.await.unwrap_or_default();
                let stderr_bytes = stderr_task.await.unwrap_or_default();
                Ok(ToolOutput {
                    stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
                    exit_code: status.code().unwrap_or(-1),
                    duration_ms,
                })
            }
            Ok(Err(e)) => Err(ExecError::Io(e)),
            Err(_elapsed) => {
                // Timeout expired. Kill the whole group, not just the
                // direct child (`kill_on_drop` covers the child as a
                // fallback when group kill is unavailable).
                kill_process_group(&child);
                Err(ExecError::Timeout {
                    elapsed_ms: start.elapsed().as_millis() as u64,
                })
            }
        }
    }
}

/// Send SIGKILL to the child's process group.
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    if let Some(pid) = child.id() {
        // The child was started with `process_group(0)`, so its pgid equals
        // its pid; a negative pid targets the whole group.
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {
    // Non-Unix platforms rely on `kill_on_drop`.
}

/// Read an entire output stream into a byte buffer, capped at
/// [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}

/// Build an args vector from string literals (test and call-site helper).
pub fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Convenience: path as a `String` argument.
pub fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
