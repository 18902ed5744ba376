//! Framing and session log error types.

use thiserror::Error;

/// Errors raised while delimiting frames in a raw RSP byte stream.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// A frame started with a byte that is not `$`, `%`, `+`, `-` or `0x03`.
    #[error("unexpected byte 0x{byte:02x} at frame start")]
    UnexpectedByte {
        /// The offending byte.
        byte: u8,
    },

    /// A `$` or `%` appeared unescaped inside a packet body.
    #[error("unescaped frame start 0x{byte:02x} inside packet body at offset {offset}")]
    UnescapedFrameStart {
        /// The offending byte.
        byte: u8,
        /// Offset from the start of the frame.
        offset: usize,
    },

    /// The two characters after `#` are not hexadecimal digits.
    #[error("invalid checksum digits {digits:?}")]
    InvalidChecksum {
        /// The raw checksum characters, lossily decoded.
        digits: String,
    },

    /// The payload ends with a `}` escape that has no following byte.
    #[error("payload ends with a dangling escape")]
    DanglingEscape,

    /// The stream closed in the middle of a frame.
    #[error("stream closed inside a frame after {buffered} bytes")]
    Truncated {
        /// Bytes of the partial frame that were buffered.
        buffered: usize,
    },
}

/// Errors from writing or reading a session log file.
#[derive(Debug, Error)]
pub enum LogError {
    /// The log file exists but cannot be deserialized.
    #[error("corrupt session log at line {line}: {reason}")]
    Corrupt {
        /// 1-based line number where the problem was detected.
        line: usize,
        /// Human-readable description of the problem.
        reason: String,
    },

    /// An I/O error occurred while reading or writing the log.
    #[error("session log I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LogError {
    pub(crate) fn corrupt(line: usize, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            line,
            reason: reason.into(),
        }
    }
}
