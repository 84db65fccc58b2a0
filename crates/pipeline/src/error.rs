use std::time::Duration;

#[derive(Debug)]
pub enum PipelineError {
    /// Malformed or missing input, detected before any filesystem side effect.
    Validation(String),
    /// Missing analyzer script or staged input. Operator-fixable; reported
    /// before a subprocess is spawned.
    Configuration(String),
    /// The analyzer ran and failed: non-zero exit, or exit 0 with no output
    /// file. Carries a bounded diagnostic captured from the process streams.
    Processing {
        message: String,
        detail: Option<String>,
    },
    /// The per-invocation deadline expired and the subprocess was terminated.
    Timeout { elapsed: Duration },
    Io(std::io::Error),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Validation(reason) => write!(f, "{}", reason),
            PipelineError::Configuration(reason) => write!(f, "{}", reason),
            PipelineError::Processing { message, .. } => write!(f, "{}", message),
            PipelineError::Timeout { elapsed } => {
                write!(f, "analysis timed out after {}ms", elapsed.as_millis())
            }
            PipelineError::Io(err) => write!(f, "pipeline i/o error: {}", err),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<std::io::Error> for PipelineError {
    fn from(value: std::io::Error) -> Self {
        PipelineError::Io(value)
    }
}
