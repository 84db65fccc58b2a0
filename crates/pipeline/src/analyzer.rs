use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::artifacts::{ArtifactEntry, ArtifactStore};
use crate::error::PipelineError;
use crate::process::{ProcessError, ProcessOutput, ProcessRequest, ProcessRunner};

const DETAIL_MAX_CHARS: usize = 2000;

/// Coordinates one analysis invocation: pre-spawn checks, the subprocess
/// call `analyzer <input> <output>`, output verification, and staged-input
/// cleanup.
pub struct Analyzer {
    program: PathBuf,
    script: PathBuf,
    artifacts: ArtifactStore,
    runner: Arc<dyn ProcessRunner>,
    deadline: Duration,
}

impl Analyzer {
    pub fn new(
        program: impl Into<PathBuf>,
        script: impl Into<PathBuf>,
        artifacts: ArtifactStore,
        runner: Arc<dyn ProcessRunner>,
        deadline: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            script: script.into(),
            artifacts,
            runner,
            deadline,
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Runs the analyzer over a staged input. On success the input file is
    /// deleted (best-effort) and the new artifact entry is returned; on any
    /// failure the input is retained for diagnosis.
    pub async fn analyze(&self, input: &Path) -> Result<ArtifactEntry, PipelineError> {
        if !tokio::fs::try_exists(input).await.unwrap_or(false) {
            return Err(PipelineError::Configuration(format!(
                "staged input {} does not exist",
                input.display()
            )));
        }
        if !tokio::fs::try_exists(&self.script).await.unwrap_or(false) {
            return Err(PipelineError::Configuration(format!(
                "analyzer script {} does not exist",
                self.script.display()
            )));
        }

        let allocated = self.artifacts.allocate().await?;
        let started = Instant::now();

        let request = ProcessRequest {
            program: self.program.clone(),
            args: vec![
                self.script.clone().into_os_string(),
                input.as_os_str().to_os_string(),
                allocated.path.clone().into_os_string(),
            ],
            deadline: self.deadline,
        };

        let output = self.runner.run(request).await.map_err(|err| match err {
            ProcessError::Spawn(err) => {
                PipelineError::Configuration(format!("failed to spawn analyzer: {}", err))
            }
            ProcessError::TimedOut { after } => PipelineError::Timeout { elapsed: after },
            ProcessError::Io(err) => PipelineError::Processing {
                message: "analyzer i/o failure".to_string(),
                detail: Some(err.to_string()),
            },
        })?;

        if output.exit_code != 0 {
            return Err(PipelineError::Processing {
                message: format!("analyzer exited with status {}", output.exit_code),
                detail: Some(diagnostic_tail(&output)),
            });
        }

        // Exit-code success does not guarantee output success.
        if !tokio::fs::try_exists(&allocated.path).await.unwrap_or(false) {
            return Err(PipelineError::Processing {
                message: "analyzer exited successfully but produced no output file".to_string(),
                detail: Some(diagnostic_tail(&output)),
            });
        }

        if let Err(err) = tokio::fs::remove_file(input).await {
            tracing::warn!(
                input = %input.display(),
                error = %err,
                "failed to delete staged input after successful analysis"
            );
        }

        tracing::info!(
            artifact = %allocated.entry.file_name,
            latency_ms = started.elapsed().as_millis() as u64,
            "analysis completed"
        );

        Ok(allocated.entry)
    }
}

fn diagnostic_tail(output: &ProcessOutput) -> String {
    let text = if output.stderr.trim().is_empty() {
        output.stdout.trim()
    } else {
        output.stderr.trim()
    };
    text.chars().take(DETAIL_MAX_CHARS).collect()
}
