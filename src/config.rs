//! Application configuration
//!
//! Read from `<config_dir>/snapdeck/config.toml`. Every field has a
//! default, so a missing file or a partial file is fine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::command::OUTPUT_PLACEHOLDER;
use crate::capture::{
    CommandSource, CommandTrigger, FileStaging, ImageSource, PollSettings, PollingSource,
    SessionSettings, UnsupportedSource,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Data directory not found")]
    DataDirNotFound,
}

pub type Result<T> = std::result::Result<T, ConfigError>;

const APP_DIR: &str = "snapdeck";

/// How screenshots are acquired
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMethod {
    /// Run a command that writes the image to `{output}` and exits
    #[default]
    Command,
    /// Launch a command detached, then poll the staging file
    Poll,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    pub method: CaptureMethod,
    /// Program and arguments; the platform tool is used when unset
    pub command: Option<Vec<String>>,
    pub command_timeout_secs: u64,
    pub undo_window_ms: u64,
    pub cancel_grace_ms: u64,
    pub poll_attempts: u32,
    pub poll_interval_ms: u64,
    /// Drop file for the poll method (default: `<data_dir>/staging.png`)
    pub staging_file: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            method: CaptureMethod::Command,
            command: None,
            command_timeout_secs: 120,
            undo_window_ms: 5000,
            cancel_grace_ms: 250,
            poll_attempts: 60,
            poll_interval_ms: 500,
            staging_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Where the database and images live (default: platform data dir)
    pub data_dir: Option<PathBuf>,
    pub capture: CaptureConfig,
}

/// Interactive region capture for the current platform
fn platform_capture_command() -> Option<Vec<String>> {
    let argv: &[&str] = if cfg!(target_os = "macos") {
        &["screencapture", "-i", "-x", "{output}"]
    } else if cfg!(target_os = "linux") {
        &["gnome-screenshot", "-a", "-f", "{output}"]
    } else {
        return None;
    };
    Some(argv.iter().map(|s| s.to_string()).collect())
}

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_DIR).join("config.toml"))
    }

    /// Load from `path`, or from the default location when `None`.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            log::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: AppConfig = toml::from_str(&content)?;
        log::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_local_dir()
                .map(|p| p.join(APP_DIR))
                .ok_or(ConfigError::DataDirNotFound),
        }
    }

    pub fn db_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("snapdeck.db"))
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            undo_window: Duration::from_millis(self.capture.undo_window_ms),
            cancel_grace: Duration::from_millis(self.capture.cancel_grace_ms),
        }
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            attempts: self.capture.poll_attempts,
            interval: Duration::from_millis(self.capture.poll_interval_ms),
        }
    }

    /// Build the configured acquisition source
    pub fn image_source(&self) -> Result<Arc<dyn ImageSource>> {
        let argv = self
            .capture
            .command
            .clone()
            .filter(|argv| !argv.is_empty())
            .or_else(platform_capture_command);

        let Some((program, args)) = argv.map(|mut argv| {
            let program = argv.remove(0);
            (program, argv)
        }) else {
            return Ok(Arc::new(UnsupportedSource::new(
                "no capture command configured for this platform",
            )));
        };

        let source: Arc<dyn ImageSource> = match self.capture.method {
            CaptureMethod::Command => Arc::new(CommandSource::new(
                program,
                args,
                Duration::from_secs(self.capture.command_timeout_secs),
            )),
            CaptureMethod::Poll => {
                let staging = match &self.capture.staging_file {
                    Some(path) => path.clone(),
                    None => self.data_dir()?.join("staging.png"),
                };
                let staging_arg = staging.to_string_lossy();
                let args = args
                    .iter()
                    .map(|arg| arg.replace(OUTPUT_PLACEHOLDER, &staging_arg))
                    .collect();
                Arc::new(PollingSource::new(
                    CommandTrigger::new(program, args),
                    FileStaging::new(staging),
                    self.poll_settings(),
                ))
            }
        };
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = AppConfig::load(Some(&temp.path().join("config.toml"))).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.session_settings().undo_window, Duration::from_millis(5000));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "/tmp/snapdeck-test"

[capture]
method = "poll"
command = ["snippingtool", "/clip"]
poll_attempts = 10
"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/snapdeck-test"));
        assert_eq!(config.capture.method, CaptureMethod::Poll);
        assert_eq!(config.capture.poll_attempts, 10);
        assert_eq!(config.capture.poll_interval_ms, 500);
        assert_eq!(config.capture.undo_window_ms, 5000);
        assert_eq!(config.poll_settings().attempts, 10);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "capture = 3").unwrap();
        assert!(matches!(AppConfig::load(Some(&path)), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_image_source_follows_method() {
        let mut config = AppConfig::default();
        config.data_dir = Some(PathBuf::from("/tmp/snapdeck-test"));
        config.capture.command = Some(vec!["shot".to_string(), "{output}".to_string()]);
        assert_eq!(config.image_source().unwrap().name(), "shot");

        config.capture.method = CaptureMethod::Poll;
        let source = config.image_source().unwrap();
        assert_eq!(source.name(), "poll");
        assert!(source.staging_empty().is_some());
    }
}
