use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::epoch_ms_now;
use crate::error::PipelineError;

pub const ARTIFACT_PREFIX: &str = "processed_";
pub const ARTIFACT_EXT: &str = ".jpg";

// Disambiguates artifacts allocated within the same millisecond; timestamps
// alone cannot guarantee uniqueness under concurrent bursts.
static ARTIFACT_SEQ: AtomicU64 = AtomicU64::new(0);

/// An artifact as discovered by the listing: name plus the sort key parsed
/// out of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactEntry {
    pub file_name: String,
    pub timestamp_ms: u64,
    pub seq: u64,
}

pub struct AllocatedArtifact {
    pub path: PathBuf,
    pub entry: ArtifactEntry,
}

/// Durable directory of processed outputs. Discovery is a full directory
/// scan on every call; there is no index.
#[derive(Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a client-supplied artifact name to a path under the store
    /// root. Names that do not match the artifact convention are rejected,
    /// so this cannot escape the directory.
    pub fn path_of(&self, file_name: &str) -> Option<PathBuf> {
        parse_artifact_name(file_name)?;
        Some(self.root.join(file_name))
    }

    /// Reserves a unique output path for a fresh invocation. The name is
    /// derived from a fresh timestamp plus a process-wide counter, so
    /// concurrent writers never collide.
    pub async fn allocate(&self) -> Result<AllocatedArtifact, PipelineError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let timestamp_ms = epoch_ms_now();
        let seq = ARTIFACT_SEQ.fetch_add(1, Ordering::Relaxed);
        let file_name = format!("{}{}_{}{}", ARTIFACT_PREFIX, timestamp_ms, seq, ARTIFACT_EXT);
        let path = self.root.join(&file_name);

        Ok(AllocatedArtifact {
            path,
            entry: ArtifactEntry {
                file_name,
                timestamp_ms,
                seq,
            },
        })
    }

    /// Enumerates the store, keeping only files that match the artifact
    /// naming convention, newest first. The order is derived from the
    /// parsed names, never from filesystem enumeration order.
    pub async fn list(&self) -> Result<Vec<ArtifactEntry>, PipelineError> {
        let mut entries = Vec::new();

        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(err) => return Err(err.into()),
        };

        while let Some(dirent) = dir.next_entry().await? {
            let name = dirent.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(entry) = parse_artifact_name(name) {
                entries.push(entry);
            }
        }

        entries.sort_by(|a, b| (b.timestamp_ms, b.seq).cmp(&(a.timestamp_ms, a.seq)));
        Ok(entries)
    }
}

pub fn parse_artifact_name(name: &str) -> Option<ArtifactEntry> {
    let rest = name.strip_prefix(ARTIFACT_PREFIX)?;
    let rest = rest.strip_suffix(ARTIFACT_EXT)?;
    let (timestamp, seq) = rest.split_once('_')?;

    if timestamp.is_empty() || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if seq.is_empty() || !seq.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    Some(ArtifactEntry {
        file_name: name.to_string(),
        timestamp_ms: timestamp.parse().ok()?,
        seq: seq.parse().ok()?,
    })
}
