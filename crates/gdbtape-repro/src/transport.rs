//! The packet transport capability and its live, stream-backed implementation.
//!
//! A transport moves whole RSP frames: [`PacketSender::send_packet`] writes
//! one frame exactly as given, [`PacketReceiver::receive_packet`] returns the
//! raw bytes of the next complete frame. Sending and receiving are separate
//! traits so the two halves of a full-duplex connection can be driven from
//! different threads.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use gdbtape_core::history::DEFAULT_HISTORY_CAPACITY;
use gdbtape_core::{Direction, FrameReader, PacketHistory};
use tracing::trace;

use crate::error::ReproError;

/// Writes whole frames to the peer.
pub trait PacketSender {
    /// Send one frame. `frame` is written verbatim.
    fn send_packet(&mut self, frame: &[u8]) -> Result<(), ReproError>;
}

/// Reads whole frames from the peer.
pub trait PacketReceiver {
    /// Block until the next complete frame arrives and return its raw bytes.
    ///
    /// Returns [`ReproError::Disconnected`] when the peer closes cleanly
    /// between frames.
    fn receive_packet(&mut self) -> Result<Vec<u8>, ReproError>;
}

/// A transport that can both send and receive.
pub trait PacketTransport: PacketSender + PacketReceiver {}

impl<T: PacketSender + PacketReceiver + ?Sized> PacketTransport for T {}

impl<T: PacketSender + ?Sized> PacketSender for Box<T> {
    fn send_packet(&mut self, frame: &[u8]) -> Result<(), ReproError> {
        (**self).send_packet(frame)
    }
}

impl<T: PacketReceiver + ?Sized> PacketReceiver for Box<T> {
    fn receive_packet(&mut self) -> Result<Vec<u8>, ReproError> {
        (**self).receive_packet()
    }
}

impl<T: PacketSender + ?Sized> PacketSender for &mut T {
    fn send_packet(&mut self, frame: &[u8]) -> Result<(), ReproError> {
        (**self).send_packet(frame)
    }
}

impl<T: PacketReceiver + ?Sized> PacketReceiver for &mut T {
    fn receive_packet(&mut self) -> Result<Vec<u8>, ReproError> {
        (**self).receive_packet()
    }
}

impl<R: Read> PacketReceiver for FrameReader<R> {
    fn receive_packet(&mut self) -> Result<Vec<u8>, ReproError> {
        match self.read_frame()? {
            Some(frame) => Ok(frame.into_raw()),
            None => Err(ReproError::Disconnected),
        }
    }
}

/// Frame-at-a-time writer over any byte sink.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    /// Wrap a byte sink.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Return a reference to the underlying sink.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Unwrap the writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> PacketSender for FrameWriter<W> {
    fn send_packet(&mut self, frame: &[u8]) -> Result<(), ReproError> {
        self.inner
            .write_all(frame)
            .and_then(|()| self.inner.flush())
            .map_err(ReproError::Transport)
    }
}

/// A live transport over a reader/writer pair, remembering recent packets.
#[derive(Debug)]
pub struct StreamTransport<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    history: PacketHistory,
}

impl<R: Read, W: Write> StreamTransport<R, W> {
    /// Create a transport over the given halves.
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_history_capacity(reader, writer, DEFAULT_HISTORY_CAPACITY)
    }

    /// Create a transport whose history retains `capacity` packets.
    pub fn with_history_capacity(reader: R, writer: W, capacity: usize) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
            history: PacketHistory::new(capacity),
        }
    }

    /// The underlying source.
    pub fn reader(&self) -> &R {
        self.reader.get_ref()
    }

    /// Recent packets exchanged over this transport.
    pub fn history(&self) -> &PacketHistory {
        &self.history
    }

    /// Mutable access to the history, e.g. to dump it once on failure.
    pub fn history_mut(&mut self) -> &mut PacketHistory {
        &mut self.history
    }

    /// Split into independently usable halves. The history is dropped.
    pub fn into_split(self) -> (FrameReader<R>, FrameWriter<W>) {
        (self.reader, self.writer)
    }
}

impl StreamTransport<TcpStream, TcpStream> {
    /// Connect to a remote stub over TCP.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ReproError> {
        let stream = TcpStream::connect(addr).map_err(ReproError::Transport)?;
        Self::from_tcp(stream)
    }

    /// Use an already connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Result<Self, ReproError> {
        stream.set_nodelay(true).map_err(ReproError::Transport)?;
        let writer = stream.try_clone().map_err(ReproError::Transport)?;
        Ok(Self::new(stream, writer))
    }
}

impl<R: Read, W: Write> PacketSender for StreamTransport<R, W> {
    fn send_packet(&mut self, frame: &[u8]) -> Result<(), ReproError> {
        self.writer.send_packet(frame)?;
        trace!(len = frame.len(), "sent frame");
        self.history.add(Direction::Sent, frame);
        Ok(())
    }
}

impl<R: Read, W: Write> PacketReceiver for StreamTransport<R, W> {
    fn receive_packet(&mut self) -> Result<Vec<u8>, ReproError> {
        let frame = self.reader.receive_packet()?;
        trace!(len = frame.len(), "received frame");
        self.history.add(Direction::Received, &frame);
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::TcpListener;

    #[test]
    fn receive_returns_raw_frames_in_order() {
        let input = b"+$OK#9a%Stop:T05#99".to_vec();
        let mut transport = StreamTransport::new(Cursor::new(input), Vec::new());
        assert_eq!(transport.receive_packet().unwrap(), b"+");
        assert_eq!(transport.receive_packet().unwrap(), b"$OK#9a");
        assert_eq!(transport.receive_packet().unwrap(), b"%Stop:T05#99");
        assert!(matches!(
            transport.receive_packet(),
            Err(ReproError::Disconnected)
        ));
    }

    #[test]
    fn send_writes_verbatim() {
        let mut transport = StreamTransport::new(Cursor::new(Vec::new()), Vec::new());
        transport.send_packet(b"$qSupported#37").unwrap();
        transport.send_packet(b"+").unwrap();
        let (_, writer) = transport.into_split();
        assert_eq!(writer.into_inner(), b"$qSupported#37+");
    }

    #[test]
    fn history_tracks_both_directions() {
        let mut transport = StreamTransport::with_history_capacity(
            Cursor::new(b"$OK#9a".to_vec()),
            Vec::new(),
            2,
        );
        transport.send_packet(b"$c#63").unwrap();
        transport.receive_packet().unwrap();
        transport.send_packet(b"+").unwrap();

        let history = transport.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history.total(), 3);
        let entries: Vec<_> = history.entries().collect();
        assert_eq!(entries[0].direction, Direction::Received);
        assert_eq!(entries[1].bytes, b"+");
    }

    #[test]
    fn framing_error_surfaces() {
        let mut transport = StreamTransport::new(Cursor::new(b"x".to_vec()), Vec::new());
        assert!(matches!(
            transport.receive_packet(),
            Err(ReproError::Framing(_))
        ));
    }

    #[test]
    fn truncated_frame_is_framing_error() {
        let mut transport = StreamTransport::new(Cursor::new(b"$OK#9".to_vec()), Vec::new());
        assert!(matches!(
            transport.receive_packet(),
            Err(ReproError::Framing(_))
        ));
    }

    #[test]
    fn boxed_trait_objects_forward() {
        let mut rx: Box<dyn PacketReceiver> =
            Box::new(FrameReader::new(Cursor::new(b"$OK#9a".to_vec())));
        assert_eq!(rx.receive_packet().unwrap(), b"$OK#9a");

        let mut tx: Box<dyn PacketSender> = Box::new(FrameWriter::new(Vec::new()));
        tx.send_packet(b"+").unwrap();
    }

    #[test]
    fn tcp_transport_exchanges_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stub = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut peer = StreamTransport::from_tcp(stream).unwrap();
            let request = peer.receive_packet().unwrap();
            assert_eq!(request, b"$?#3f");
            peer.send_packet(b"+").unwrap();
            peer.send_packet(b"$S05#b8").unwrap();
        });

        let mut client = StreamTransport::connect(addr).unwrap();
        client.send_packet(b"$?#3f").unwrap();
        assert_eq!(client.receive_packet().unwrap(), b"+");
        assert_eq!(client.receive_packet().unwrap(), b"$S05#b8");
        stub.join().unwrap();
    }
}
