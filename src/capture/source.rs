//! Image acquisition sources

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    #[error("Capture cancelled")]
    Cancelled,

    #[error("Timed out waiting for a screenshot")]
    TimedOut,

    #[error("Screen capture not supported: {0}")]
    Unsupported(String),

    #[error("Screen capture failed: {0}")]
    Failed(String),
}

/// Something that can produce raw image bytes on request.
///
/// `acquire` should return `Cancelled` promptly once `cancel` fires; the
/// session also races it against the token, so a source that never looks
/// at the token is still abandoned on cancellation.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Short name used in log messages
    fn name(&self) -> &str;

    /// Reset any external staging state (clipboard, drop file) before a
    /// new acquisition starts
    async fn clear_staging(&self) -> Result<(), AcquisitionError> {
        Ok(())
    }

    async fn acquire(&self, cancel: CancellationToken) -> Result<Vec<u8>, AcquisitionError>;

    /// Whether the external staging area is empty.
    ///
    /// `None` for sources with their own cancel primitive. Polling sources
    /// report `Some`, which lets the session treat "focus came back and
    /// nothing was staged" as an abandoned capture.
    fn staging_empty(&self) -> Option<bool> {
        None
    }
}

/// Reads an existing image file, used for imports
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ImageSource for FileSource {
    fn name(&self) -> &str {
        "file"
    }

    async fn acquire(&self, cancel: CancellationToken) -> Result<Vec<u8>, AcquisitionError> {
        if cancel.is_cancelled() {
            return Err(AcquisitionError::Cancelled);
        }
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| AcquisitionError::Failed(format!("{}: {}", self.path.display(), e)))?;
        if bytes.is_empty() {
            return Err(AcquisitionError::Failed(format!("{} is empty", self.path.display())));
        }
        Ok(bytes)
    }
}

/// Stand-in for platforms without a configured capture tool
pub struct UnsupportedSource {
    reason: String,
}

impl UnsupportedSource {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ImageSource for UnsupportedSource {
    fn name(&self) -> &str {
        "unsupported"
    }

    async fn acquire(&self, _cancel: CancellationToken) -> Result<Vec<u8>, AcquisitionError> {
        Err(AcquisitionError::Unsupported(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_source_reads_bytes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("shot.png");
        std::fs::write(&path, b"png-bytes").unwrap();

        let source = FileSource::new(path);
        let bytes = source.acquire(CancellationToken::new()).await.unwrap();
        assert_eq!(bytes, b"png-bytes");
        assert_eq!(source.staging_empty(), None);
    }

    #[tokio::test]
    async fn test_file_source_missing_file_fails() {
        let temp = TempDir::new().unwrap();
        let source = FileSource::new(temp.path().join("missing.png"));
        assert!(matches!(
            source.acquire(CancellationToken::new()).await,
            Err(AcquisitionError::Failed(_))
        ));
    }

    #[tokio::test]
    async fn test_file_source_honours_cancelled_token() {
        let token = CancellationToken::new();
        token.cancel();
        let source = FileSource::new(PathBuf::from("/does/not/matter.png"));
        assert_eq!(source.acquire(token).await, Err(AcquisitionError::Cancelled));
    }
}
