use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::epoch_ms_now;
use crate::error::PipelineError;

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// An upload written to ephemeral storage, owned by the receiver until the
/// analyzer consumes it.
#[derive(Debug, Clone)]
pub struct StagedUpload {
    pub path: PathBuf,
    pub original_filename: String,
    pub created_at_epoch_ms: u64,
}

/// Ephemeral staging directory for inbound uploads. Keys are derived from
/// the current timestamp plus a process-wide counter and keep the original
/// extension.
#[derive(Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn stage(
        &self,
        original_filename: &str,
        payload: &[u8],
    ) -> Result<StagedUpload, PipelineError> {
        if payload.is_empty() {
            return Err(PipelineError::Validation(
                "uploaded image is empty".to_string(),
            ));
        }

        tokio::fs::create_dir_all(&self.root).await?;

        let created_at_epoch_ms = epoch_ms_now();
        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        let extension = sanitize_extension(original_filename);
        let file_name = format!("upload_{}_{}.{}", created_at_epoch_ms, seq, extension);
        let path = self.root.join(file_name);

        tokio::fs::write(&path, payload).await?;

        Ok(StagedUpload {
            path,
            original_filename: original_filename.to_string(),
            created_at_epoch_ms,
        })
    }
}

fn sanitize_extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 8 && ext.bytes().all(|b| b.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| "bin".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased_and_validated() {
        assert_eq!(sanitize_extension("scan.PNG"), "png");
        assert_eq!(sanitize_extension("scan.jpeg"), "jpeg");
        assert_eq!(sanitize_extension("no-extension"), "bin");
        assert_eq!(sanitize_extension("trailing."), "bin");
        assert_eq!(sanitize_extension("weird.p/ng"), "bin");
        assert_eq!(sanitize_extension("long.abcdefghi"), "bin");
    }

    #[tokio::test]
    async fn stage_rejects_empty_payload() {
        let staging = StagingArea::new(temp_root());
        let err = staging.stage("scan.png", &[]).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn stage_writes_payload_under_unique_keys() {
        let staging = StagingArea::new(temp_root());

        let first = staging
            .stage("scan.png", b"first")
            .await
            .expect("staging should succeed");
        let second = staging
            .stage("scan.png", b"second")
            .await
            .expect("staging should succeed");

        assert_ne!(first.path, second.path);
        assert!(first.created_at_epoch_ms > 0);
        assert_eq!(first.original_filename, "scan.png");
        assert_eq!(tokio::fs::read(&first.path).await.unwrap(), b"first");
        assert_eq!(tokio::fs::read(&second.path).await.unwrap(), b"second");
        assert!(
            first
                .path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("upload_") && n.ends_with(".png"))
        );
    }

    fn temp_root() -> PathBuf {
        use std::sync::atomic::AtomicUsize;
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let suffix = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("scanbay_staging_{}_{}", std::process::id(), suffix))
    }
}
