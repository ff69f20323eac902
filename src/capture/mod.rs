//! Screenshot capture
//!
//! Provides:
//! - The capture session (single in-flight acquisition, undo window)
//! - Acquisition sources: external command, trigger + polling, file import
//! - On-disk storage for captured image bytes

pub mod command;
pub mod images;
pub mod polling;
pub mod session;
pub mod source;

pub use command::CommandSource;
pub use images::{FileImageStore, ImageStore, ImageStoreError};
pub use polling::{CommandTrigger, FileStaging, PollSettings, PollingSource, Staging, Trigger};
pub use session::{CaptureError, CaptureEvent, CaptureSession, SessionSettings, UndoToken};
pub use source::{AcquisitionError, FileSource, ImageSource, UnsupportedSource};
