//! Recording of a live exchange.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use gdbtape_core::{Direction, FrameReader, LogError, SessionLog};
use parking_lot::Mutex;
use tracing::trace;

use crate::error::ReproError;
use crate::transport::{FrameWriter, PacketReceiver, PacketSender, StreamTransport};

/// Shared handle to the session log being recorded.
///
/// Every interceptor of one session appends through the same recorder, so
/// the log keeps a single total order even when the two directions are
/// driven from different threads. The lock is only held to append; no
/// transport I/O happens under it.
#[derive(Debug, Clone)]
pub struct Recorder {
    state: Arc<Mutex<Recording>>,
}

#[derive(Debug)]
struct Recording {
    log: SessionLog,
    /// Indices of sends whose write failed after they were appended.
    withdrawn: BTreeSet<usize>,
}

impl Recording {
    fn kept(&self) -> SessionLog {
        if self.withdrawn.is_empty() {
            return self.log.clone();
        }
        let mut log = SessionLog::with_created_at(self.log.subsystem(), self.log.created_at_ms());
        for (index, packet) in self.log.packets().iter().enumerate() {
            if !self.withdrawn.contains(&index) {
                log.append(packet.direction(), packet.bytes());
            }
        }
        log
    }
}

impl Recorder {
    /// Start recording into `log`.
    pub fn new(log: SessionLog) -> Self {
        Self {
            state: Arc::new(Mutex::new(Recording {
                log,
                withdrawn: BTreeSet::new(),
            })),
        }
    }

    /// Append a packet that has already crossed the transport.
    pub fn record(&self, direction: Direction, bytes: &[u8]) -> usize {
        self.state.lock().log.append(direction, bytes)
    }

    /// Append the packet, then run `io` with the log unlocked.
    ///
    /// Appending first orders the packet before any response the peer
    /// sends to it. If `io` fails the entry is withdrawn and never reaches
    /// a snapshot or the log file.
    pub fn record_with<F>(&self, direction: Direction, bytes: &[u8], io: F) -> Result<usize, ReproError>
    where
        F: FnOnce() -> Result<(), ReproError>,
    {
        let index = self.record(direction, bytes);
        if let Err(e) = io() {
            self.withdraw(index);
            return Err(e);
        }
        Ok(index)
    }

    /// Drop the packet appended at `index` from everything persisted later.
    ///
    /// For callers that record a send themselves before writing it and
    /// then see the write fail.
    pub fn withdraw(&self, index: usize) {
        let mut state = self.state.lock();
        if index < state.log.len() && state.withdrawn.insert(index) {
            trace!(index, "withdrew packet that failed to send");
        }
    }

    /// Number of packets recorded so far.
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.log.len() - state.withdrawn.len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of the log as it stands now.
    pub fn snapshot(&self) -> SessionLog {
        self.state.lock().kept()
    }

    /// Persist the log as it stands now. Safe to call repeatedly.
    pub fn finalize_to(&self, path: &Path) -> Result<(), LogError> {
        let log = self.snapshot();
        log.finalize_to(path)
    }
}

/// Wraps a live transport and records every packet that crosses it.
///
/// The wrapped transport sees exactly the calls and bytes it would see
/// unwrapped. Failed operations never reach a snapshot or the log file.
#[derive(Debug)]
pub struct CaptureInterceptor<T> {
    inner: T,
    recorder: Recorder,
}

impl<T> CaptureInterceptor<T> {
    pub fn new(inner: T, recorder: Recorder) -> Self {
        Self { inner, recorder }
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<R, W> CaptureInterceptor<StreamTransport<R, W>>
where
    R: std::io::Read,
    W: std::io::Write,
{
    /// Split into a recording reader and a recording writer that share this
    /// interceptor's log.
    pub fn into_split(
        self,
    ) -> (
        CaptureInterceptor<FrameReader<R>>,
        CaptureInterceptor<FrameWriter<W>>,
    ) {
        let (reader, writer) = self.inner.into_split();
        (
            CaptureInterceptor::new(reader, self.recorder.clone()),
            CaptureInterceptor::new(writer, self.recorder),
        )
    }
}

impl<T: PacketSender> PacketSender for CaptureInterceptor<T> {
    fn send_packet(&mut self, frame: &[u8]) -> Result<(), ReproError> {
        let inner = &mut self.inner;
        let index = self
            .recorder
            .record_with(Direction::Sent, frame, || inner.send_packet(frame))?;
        trace!(index, len = frame.len(), "captured sent packet");
        Ok(())
    }
}

impl<T: PacketReceiver> PacketReceiver for CaptureInterceptor<T> {
    fn receive_packet(&mut self) -> Result<Vec<u8>, ReproError> {
        let frame = self.inner.receive_packet()?;
        let index = self.recorder.record(Direction::Received, &frame);
        trace!(index, len = frame.len(), "captured received packet");
        Ok(frame)
    }
}
