//! Reproducer error types.

use std::path::{Path, PathBuf};

use gdbtape_core::framer::FrameReadError;
use gdbtape_core::{FramingError, LogError};
use thiserror::Error;

/// Errors from capture, replay, and reproducer directory operations.
#[derive(Debug, Error)]
pub enum ReproError {
    /// The live byte stream is not valid RSP framing.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// A session log exists but cannot be deserialized.
    #[error("corrupt session log {path}: {reason}")]
    CorruptLog {
        /// The log file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// The manifest lists a session log that is not on disk, as left by a
    /// capture that never finished.
    #[error("session log listed in manifest is missing: {0}")]
    LogMissing(PathBuf),

    /// The live interaction needs more recorded responses than exist.
    #[error("reproducer ran out of recorded responses after {consumed} packets")]
    ReplayExhausted {
        /// Number of recorded packets consumed before running out.
        consumed: usize,
    },

    /// A response was requested before any request was sent.
    #[error("replay received a read before any request was sent")]
    ReceiveBeforeRequest,

    /// Capture target directory already has contents.
    #[error("reproducer directory is not empty: {0}")]
    DirectoryExists(PathBuf),

    /// Replay source directory does not exist.
    #[error("reproducer directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    /// Replay source directory has no manifest.
    #[error("reproducer manifest missing: {0}")]
    ManifestMissing(PathBuf),

    /// The manifest exists but cannot be read.
    #[error("corrupt reproducer manifest {path}: {reason}")]
    CorruptManifest {
        /// The manifest file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// The manifest does not list the requested subsystem.
    #[error("no reproducer registered for subsystem: {0}")]
    ProviderMissing(String),

    /// A subsystem name cannot be used as a file stem.
    #[error("invalid subsystem name: {0:?}")]
    InvalidProviderName(String),

    /// The session transport was already handed out.
    #[error("session transport already installed")]
    AlreadyInstalled,

    /// The operation needs a session in a different mode.
    #[error("reproducer session is in {actual} mode, {expected} required")]
    WrongMode {
        /// Mode the operation needs.
        expected: &'static str,
        /// Mode the session is in.
        actual: &'static str,
    },

    /// The live transport failed.
    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),

    /// The peer closed the connection between frames.
    #[error("connection closed by peer")]
    Disconnected,

    /// Filesystem error while managing the reproducer directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReproError {
    /// Whether this is the replay running out of recorded data, as opposed
    /// to a transport or target failure.
    pub fn is_replay_exhausted(&self) -> bool {
        matches!(self, ReproError::ReplayExhausted { .. })
    }

    /// Attach the log path to a session log failure.
    pub fn from_log(path: &Path, err: LogError) -> Self {
        match err {
            LogError::Corrupt { line, reason } => ReproError::CorruptLog {
                path: path.to_path_buf(),
                reason: format!("line {line}: {reason}"),
            },
            LogError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ReproError::LogMissing(path.to_path_buf())
            }
            LogError::Io(e) => ReproError::Io(e),
        }
    }
}

impl From<FrameReadError> for ReproError {
    fn from(err: FrameReadError) -> Self {
        match err {
            FrameReadError::Framing(e) => ReproError::Framing(e),
            FrameReadError::Io(e) => ReproError::Transport(e),
        }
    }
}
