pub mod analyzer;
pub mod artifacts;
pub mod error;
pub mod process;
pub mod staging;

pub use analyzer::Analyzer;
pub use artifacts::{ArtifactEntry, ArtifactStore, parse_artifact_name};
pub use error::PipelineError;
pub use process::{ProcessError, ProcessOutput, ProcessRequest, ProcessRunner, SystemRunner};
pub use staging::{StagedUpload, StagingArea};

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub(crate) fn epoch_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}
