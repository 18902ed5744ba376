//! gdbtape-core — packet model, wire framing, and session persistence.
//!
//! This crate knows how GDB remote serial protocol frames are delimited
//! and how a recorded exchange is written to and read back from disk. It
//! never looks inside a payload.

pub mod error;
pub mod framer;
pub mod history;
pub mod logging;
pub mod packet;
pub mod session_log;

// Re-export key types for convenience.
pub use error::{FramingError, LogError};
pub use framer::{Frame, FrameDecoder, FrameKind, FrameReadError, FrameReader};
pub use history::PacketHistory;
pub use packet::{Direction, Packet};
pub use session_log::SessionLog;
