//! gdbtape-repro — capture and replay of a GDB remote protocol exchange.
//!
//! The debugger talks to a [`PacketTransport`]. Which implementation it
//! gets is decided once, when a [`ReproSession`] installs its transport:
//! the live connection, a [`CaptureInterceptor`] that records every frame
//! crossing the live connection, or a [`ReplayEngine`] that answers from a
//! previously recorded session without opening any connection.

pub mod capture;
pub mod directory;
pub mod error;
pub mod lifecycle;
pub mod replay;
pub mod transport;

// Re-export key types for convenience.
pub use capture::{CaptureInterceptor, Recorder};
pub use directory::{begin_capture, begin_replay, Manifest, ReproducerReader, ReproducerWriter};
pub use error::ReproError;
pub use lifecycle::{ReproMode, ReproSession, SessionTransport, GDB_REMOTE_PROVIDER};
pub use replay::{ReplayEngine, ReplayState};
pub use transport::{FrameWriter, PacketReceiver, PacketSender, PacketTransport, StreamTransport};
