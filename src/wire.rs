//! Async RSP frame I/O for the proxy and replay server sockets.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use gdbtape_core::framer::READ_CHUNK;
use gdbtape_core::{Direction, FrameDecoder, PacketHistory};
use gdbtape_repro::ReproError;

/// Reads whole frames from an async byte source.
#[derive(Debug)]
pub(crate) struct FrameStream<R> {
    inner: R,
    decoder: FrameDecoder,
}

impl<R: AsyncRead + Unpin> FrameStream<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
        }
    }

    /// Next frame's raw bytes. [`ReproError::Disconnected`] when the peer
    /// closes between frames.
    ///
    /// Cancel safe: bytes already read stay buffered for the next call.
    pub(crate) async fn next_frame(&mut self) -> Result<Vec<u8>, ReproError> {
        loop {
            if let Some(frame) = self.decoder.decode()? {
                return Ok(frame.into_raw());
            }
            let mut chunk = [0u8; READ_CHUNK];
            let n = self
                .inner
                .read(&mut chunk)
                .await
                .map_err(ReproError::Transport)?;
            if n == 0 {
                self.decoder.finish()?;
                return Err(ReproError::Disconnected);
            }
            self.decoder.feed(&chunk[..n]);
        }
    }
}

/// Write one frame verbatim and flush it.
pub(crate) async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), ReproError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await.map_err(ReproError::Transport)?;
    writer.flush().await.map_err(ReproError::Transport)
}

/// One peer connection, remembering its recent packets.
#[derive(Debug)]
pub(crate) struct Connection<R, W> {
    reader: FrameStream<R>,
    writer: W,
    history: PacketHistory,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Connection<R, W> {
    pub(crate) fn new(reader: R, writer: W, history_capacity: usize) -> Self {
        Self {
            reader: FrameStream::new(reader),
            writer,
            history: PacketHistory::new(history_capacity),
        }
    }

    pub(crate) async fn receive(&mut self) -> Result<Vec<u8>, ReproError> {
        let frame = self.reader.next_frame().await?;
        self.history.add(Direction::Received, &frame);
        Ok(frame)
    }

    pub(crate) async fn send(&mut self, frame: &[u8]) -> Result<(), ReproError> {
        write_frame(&mut self.writer, frame).await?;
        self.history.add(Direction::Sent, frame);
        Ok(())
    }

    pub(crate) fn history_mut(&mut self) -> &mut PacketHistory {
        &mut self.history
    }

    #[cfg(test)]
    pub(crate) fn into_writer(self) -> W {
        self.writer
    }
}

impl Connection<OwnedReadHalf, OwnedWriteHalf> {
    pub(crate) fn from_tcp(stream: TcpStream, history_capacity: usize) -> Result<Self, ReproError> {
        stream.set_nodelay(true).map_err(ReproError::Transport)?;
        let (reader, writer) = stream.into_split();
        Ok(Self::new(reader, writer, history_capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn frame_stream_splits_and_reports_close() {
        let mut frames = FrameStream::new(Cursor::new(b"+$OK#9a%Stop:T05#99".to_vec()));
        assert_eq!(frames.next_frame().await.unwrap(), b"+");
        assert_eq!(frames.next_frame().await.unwrap(), b"$OK#9a");
        assert_eq!(frames.next_frame().await.unwrap(), b"%Stop:T05#99");
        assert!(matches!(
            frames.next_frame().await,
            Err(ReproError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn frame_stream_truncated_frame_is_framing_error() {
        let mut frames = FrameStream::new(Cursor::new(b"$OK#9".to_vec()));
        assert!(matches!(
            frames.next_frame().await,
            Err(ReproError::Framing(_))
        ));
    }

    #[tokio::test]
    async fn connection_records_history_and_writes_verbatim() {
        let mut conn = Connection::new(Cursor::new(b"$S05#b8".to_vec()), Vec::new(), 4);
        conn.send(b"$?#3f").await.unwrap();
        assert_eq!(conn.receive().await.unwrap(), b"$S05#b8");
        assert_eq!(conn.history_mut().total(), 2);
        assert_eq!(conn.into_writer(), b"$?#3f");
    }

    #[tokio::test]
    async fn tcp_connection_exchanges_frames() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stub = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut peer = Connection::from_tcp(stream, 4).unwrap();
            assert_eq!(peer.receive().await.unwrap(), b"$?#3f");
            peer.send(b"$S05#b8").await.unwrap();
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut client = Connection::from_tcp(stream, 4).unwrap();
        client.send(b"$?#3f").await.unwrap();
        assert_eq!(client.receive().await.unwrap(), b"$S05#b8");
        stub.await.unwrap();
    }
}
