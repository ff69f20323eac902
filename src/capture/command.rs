//! Acquisition through an external screenshot command
//!
//! The command is expected to write the image to the path substituted for
//! `{output}` in its arguments. Killing the child is the cancel primitive.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::source::{AcquisitionError, ImageSource};

/// Placeholder replaced with the temporary output path
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

pub struct CommandSource {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    scratch_dir: PathBuf,
}

impl CommandSource {
    pub fn new(program: String, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program,
            args,
            timeout,
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Write temporary output files somewhere other than the system temp dir
    pub fn with_scratch_dir(mut self, dir: PathBuf) -> Self {
        self.scratch_dir = dir;
        self
    }

    fn build_args(&self, output: &Path) -> Vec<String> {
        let output = output.to_string_lossy();
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace(OUTPUT_PLACEHOLDER, &output))
            .collect();
        if !self.args.iter().any(|arg| arg.contains(OUTPUT_PLACEHOLDER)) {
            args.push(output.into_owned());
        }
        args
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::debug!("Failed to remove capture scratch file {:?}: {}", path, e);
        }
    }
}

#[async_trait]
impl ImageSource for CommandSource {
    fn name(&self) -> &str {
        &self.program
    }

    async fn acquire(&self, cancel: CancellationToken) -> Result<Vec<u8>, AcquisitionError> {
        let output = self.scratch_dir.join(format!("snapdeck-{}.png", Uuid::new_v4()));

        let mut child = Command::new(&self.program)
            .args(self.build_args(&output))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    AcquisitionError::Unsupported(format!("'{}' is not installed", self.program))
                }
                _ => AcquisitionError::Failed(format!("failed to start '{}': {}", self.program, e)),
            })?;

        log::debug!("Started capture command '{}'", self.program);

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                discard(&output).await;
                return Err(AcquisitionError::Cancelled);
            }
            _ = tokio::time::sleep(self.timeout) => {
                let _ = child.kill().await;
                discard(&output).await;
                return Err(AcquisitionError::TimedOut);
            }
            status = child.wait() => status
                .map_err(|e| AcquisitionError::Failed(format!("'{}' failed: {}", self.program, e)))?,
        };

        let bytes = match tokio::fs::read(&output).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                discard(&output).await;
                return Err(AcquisitionError::Failed(format!("could not read screenshot: {}", e)));
            }
        };
        discard(&output).await;

        if !bytes.is_empty() {
            return Ok(bytes);
        }
        if status.success() {
            // Interactive tools exit cleanly without output when the user
            // dismisses the selection
            log::debug!("Capture command '{}' produced no image", self.program);
            Err(AcquisitionError::Cancelled)
        } else {
            Err(AcquisitionError::Failed(format!("'{}' exited with {}", self.program, status)))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(script: &str, temp: &TempDir, timeout: Duration) -> CommandSource {
        CommandSource::new(
            "sh".to_string(),
            vec!["-c".to_string(), script.to_string(), "sh".to_string(), OUTPUT_PLACEHOLDER.to_string()],
            timeout,
        )
        .with_scratch_dir(temp.path().to_path_buf())
    }

    #[test]
    fn test_output_appended_when_no_placeholder() {
        let source = CommandSource::new("shot".to_string(), vec!["-i".to_string()], Duration::from_secs(1));
        assert_eq!(source.build_args(Path::new("/tmp/x.png")), vec!["-i", "/tmp/x.png"]);

        let source = CommandSource::new(
            "shot".to_string(),
            vec!["--file={output}".to_string()],
            Duration::from_secs(1),
        );
        assert_eq!(source.build_args(Path::new("/tmp/x.png")), vec!["--file=/tmp/x.png"]);
    }

    #[tokio::test]
    async fn test_reads_written_image_and_cleans_up() {
        let temp = TempDir::new().unwrap();
        let source = sh("printf img > \"$1\"", &temp, Duration::from_secs(10));

        let bytes = source.acquire(CancellationToken::new()).await.unwrap();
        assert_eq!(bytes, b"img");
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_no_output_is_cancellation() {
        let temp = TempDir::new().unwrap();
        let source = sh("exit 0", &temp, Duration::from_secs(10));
        assert_eq!(
            source.acquire(CancellationToken::new()).await,
            Err(AcquisitionError::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_failing_command_reports_failure() {
        let temp = TempDir::new().unwrap();
        let source = sh("exit 3", &temp, Duration::from_secs(10));
        assert!(matches!(
            source.acquire(CancellationToken::new()).await,
            Err(AcquisitionError::Failed(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_program_is_unsupported() {
        let source = CommandSource::new(
            "snapdeck-no-such-capture-tool".to_string(),
            Vec::new(),
            Duration::from_secs(1),
        );
        assert!(matches!(
            source.acquire(CancellationToken::new()).await,
            Err(AcquisitionError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_kills_child() {
        let temp = TempDir::new().unwrap();
        let source = sh("sleep 30", &temp, Duration::from_secs(60));
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        assert_eq!(source.acquire(token).await, Err(AcquisitionError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_slow_command_times_out() {
        let temp = TempDir::new().unwrap();
        let source = sh("sleep 30", &temp, Duration::from_millis(100));
        assert_eq!(
            source.acquire(CancellationToken::new()).await,
            Err(AcquisitionError::TimedOut)
        );
    }
}
