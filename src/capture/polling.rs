//! Acquisition by triggering an external tool and polling for its result
//!
//! Some capture tools have no way to be cancelled or to report completion:
//! they are launched detached and eventually drop an image somewhere (the
//! clipboard, a known file). `PollingSource` fires the trigger and then
//! checks the staging area a bounded number of times.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::source::{AcquisitionError, ImageSource};

/// Launches the external capture action
pub trait Trigger: Send + Sync {
    fn fire(&self) -> Result<(), AcquisitionError>;
}

/// Where the external action leaves its image
pub trait Staging: Send + Sync {
    /// Take the staged image, if one is present
    fn take(&self) -> Result<Option<Vec<u8>>, AcquisitionError>;

    fn clear(&self) -> Result<(), AcquisitionError>;

    fn is_empty(&self) -> bool;
}

/// Polling budget: `attempts × interval` is the total wait
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            attempts: 60,
            interval: Duration::from_millis(500),
        }
    }
}

pub struct PollingSource<T, S> {
    trigger: T,
    staging: S,
    settings: PollSettings,
}

impl<T: Trigger, S: Staging> PollingSource<T, S> {
    pub fn new(trigger: T, staging: S, settings: PollSettings) -> Self {
        Self {
            trigger,
            staging,
            settings,
        }
    }
}

#[async_trait]
impl<T: Trigger, S: Staging> ImageSource for PollingSource<T, S> {
    fn name(&self) -> &str {
        "poll"
    }

    async fn clear_staging(&self) -> Result<(), AcquisitionError> {
        self.staging.clear()
    }

    async fn acquire(&self, cancel: CancellationToken) -> Result<Vec<u8>, AcquisitionError> {
        if cancel.is_cancelled() {
            return Err(AcquisitionError::Cancelled);
        }
        self.trigger.fire()?;

        for attempt in 1..=self.settings.attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::debug!("Polling capture cancelled after {} attempts", attempt - 1);
                    return Err(AcquisitionError::Cancelled);
                }
                _ = tokio::time::sleep(self.settings.interval) => {}
            }

            if let Some(bytes) = self.staging.take()? {
                log::debug!("Staged image found after {} attempts", attempt);
                return Ok(bytes);
            }
        }

        Err(AcquisitionError::TimedOut)
    }

    fn staging_empty(&self) -> Option<bool> {
        Some(self.staging.is_empty())
    }
}

/// A drop file the external tool writes its screenshot to
pub struct FileStaging {
    path: PathBuf,
}

impl FileStaging {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Staging for FileStaging {
    fn take(&self) -> Result<Option<Vec<u8>>, AcquisitionError> {
        match std::fs::read(&self.path) {
            // A zero-length file is a write still in progress
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    log::warn!("Failed to clear staging file {:?}: {}", self.path, e);
                }
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AcquisitionError::Failed(format!(
                "could not read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn clear(&self) -> Result<(), AcquisitionError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AcquisitionError::Failed(format!(
                "could not clear {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn is_empty(&self) -> bool {
        std::fs::metadata(&self.path)
            .map(|meta| meta.len() == 0)
            .unwrap_or(true)
    }
}

/// Launches a detached process and forgets about it
pub struct CommandTrigger {
    program: String,
    args: Vec<String>,
}

impl CommandTrigger {
    pub fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }
}

impl Trigger for CommandTrigger {
    fn fire(&self) -> Result<(), AcquisitionError> {
        std::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_| ())
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    AcquisitionError::Unsupported(format!("'{}' is not installed", self.program))
                }
                _ => AcquisitionError::Failed(format!("failed to start '{}': {}", self.program, e)),
            })
    }
}
