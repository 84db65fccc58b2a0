use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

const MAX_CAPTURED_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub deadline: Duration,
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug)]
pub enum ProcessError {
    Spawn(std::io::Error),
    TimedOut { after: Duration },
    Io(std::io::Error),
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessError::Spawn(err) => write!(f, "failed to spawn process: {}", err),
            ProcessError::TimedOut { after } => {
                write!(f, "process exceeded deadline of {}ms", after.as_millis())
            }
            ProcessError::Io(err) => write!(f, "process i/o error: {}", err),
        }
    }
}

impl std::error::Error for ProcessError {}

/// Runs an external program to completion under a deadline, capturing its
/// streams. Substitutable with a fake in tests.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, ProcessError>;
}

/// Spawns the real subprocess. Stdout and stderr are streamed line-by-line
/// as they arrive (stderr re-logged at warn level) instead of buffered
/// unbounded; the captured copy handed back to the caller is capped at
/// `MAX_CAPTURED_BYTES` per stream. On deadline expiry the child is killed
/// and awaited briefly so no zombie is left behind.
pub struct SystemRunner;

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, ProcessError> {
        let mut child = Command::new(&request.program)
            .args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(ProcessError::Spawn)?;

        let child_stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProcessError::Io(std::io::Error::other("failed to open stdout")))?;
        let child_stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProcessError::Io(std::io::Error::other("failed to open stderr")))?;

        let stdout_task = tokio::spawn(capture_lines(child_stdout, false));
        let stderr_task = tokio::spawn(capture_lines(child_stderr, true));

        let status = match tokio::time::timeout(request.deadline, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(err)) => return Err(ProcessError::Io(err)),
            Err(_) => {
                let _ = child.start_kill();
                let _ = tokio::time::timeout(Duration::from_millis(250), child.wait()).await;
                return Err(ProcessError::TimedOut {
                    after: request.deadline,
                });
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(ProcessOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

async fn capture_lines<R>(reader: R, warn_lines: bool) -> String
where
    R: AsyncRead + Unpin + Send,
{
    let mut lines = BufReader::new(reader).lines();
    let mut captured = String::new();
    let mut truncated = false;

    // Keep draining past the capture cap so the child never blocks on a
    // full pipe.
    while let Ok(Some(line)) = lines.next_line().await {
        if warn_lines {
            tracing::warn!(line = %line, "analyzer.stderr");
        } else {
            tracing::debug!(line = %line, "analyzer.stdout");
        }

        if truncated {
            continue;
        }
        if captured.len() + line.len() < MAX_CAPTURED_BYTES {
            captured.push_str(&line);
            captured.push('\n');
        } else {
            truncated = true;
            captured.push_str("[captured output truncated]\n");
        }
    }

    captured
}
