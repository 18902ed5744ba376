use anyhow::{anyhow, bail, Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info};

use gdbtape_core::Direction;
use gdbtape_repro::{Recorder, ReproError, SessionTransport};

use crate::wire::{write_frame, FrameStream};

/// Frames forwarded in each direction over one proxied connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RelayStats {
    pub to_stub: usize,
    pub to_debugger: usize,
}

/// Unwrap the installed stub connection into the socket and, when
/// capturing, the recorder every forwarded frame goes to.
pub(crate) fn stub_parts(
    transport: SessionTransport<TcpStream>,
) -> Result<(TcpStream, Option<Recorder>)> {
    match transport {
        SessionTransport::Live(stub) => Ok((stub, None)),
        SessionTransport::Capture(stub) => {
            let recorder = stub.recorder().clone();
            Ok((stub.into_inner(), Some(recorder)))
        }
        SessionTransport::Replay(_) => bail!("proxy cannot relay to a replayed stub"),
    }
}

/// Accept one debugger on `listener` and relay it to `stub` until either
/// side disconnects.
pub(crate) async fn serve_one(
    listener: &TcpListener,
    stub: TcpStream,
    recorder: Option<Recorder>,
) -> Result<RelayStats> {
    let (debugger, peer) = listener
        .accept()
        .await
        .context("failed to accept debugger")?;
    info!("debugger connected from {peer}");
    relay(debugger, stub, recorder).await
}

enum First<T> {
    Up(T),
    Down(T),
}

/// Relay frames between a debugger connection and the stub, one task per
/// direction. When either direction ends the other is told to stop.
pub(crate) async fn relay(
    debugger: TcpStream,
    stub: TcpStream,
    recorder: Option<Recorder>,
) -> Result<RelayStats> {
    debugger.set_nodelay(true)?;
    stub.set_nodelay(true)?;
    let (from_debugger, to_debugger) = debugger.into_split();
    let (from_stub, to_stub) = stub.into_split();
    let (close_tx, close_rx) = watch::channel(false);

    let mut up = tokio::spawn(pump(
        from_debugger,
        to_stub,
        recorder.clone(),
        Direction::Sent,
        close_rx.clone(),
    ));
    let mut down = tokio::spawn(pump(
        from_stub,
        to_debugger,
        recorder,
        Direction::Received,
        close_rx,
    ));

    let first = tokio::select! {
        joined = &mut up => First::Up(joined),
        joined = &mut down => First::Down(joined),
    };
    let _ = close_tx.send(true);
    let (up, down) = match first {
        First::Up(joined) => (joined, down.await),
        First::Down(joined) => (up.await, joined),
    };

    let to_stub = up.map_err(|e| anyhow!("relay task failed: {e}"))??;
    let to_debugger = down.map_err(|e| anyhow!("relay task failed: {e}"))??;
    Ok(RelayStats {
        to_stub,
        to_debugger,
    })
}

/// Forward frames from `from` to `to` until the source closes or `close`
/// fires, recording each one under `direction`.
///
/// A frame going to the stub is recorded before it is written so that the
/// stub's answer can never be ordered ahead of it. The recorder is never
/// locked while a socket operation is pending.
async fn pump<R, W>(
    from: R,
    mut to: W,
    recorder: Option<Recorder>,
    direction: Direction,
    mut close: watch::Receiver<bool>,
) -> Result<usize, ReproError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let route = match direction {
        Direction::Sent => "debugger -> stub",
        Direction::Received => "stub -> debugger",
    };
    let mut frames = FrameStream::new(from);
    let mut forwarded = 0;

    let forward = async {
        loop {
            let frame = match frames.next_frame().await {
                Ok(frame) => frame,
                Err(ReproError::Disconnected) => {
                    debug!(route, "peer closed");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            let index = recorder.as_ref().map(|r| r.record(direction, &frame));
            if let Err(e) = write_frame(&mut to, &frame).await {
                if let (Some(recorder), Some(index), Direction::Sent) =
                    (&recorder, index, direction)
                {
                    recorder.withdraw(index);
                }
                return Err(e);
            }
            forwarded += 1;
        }
    };

    let result = tokio::select! {
        result = forward => result,
        _ = close.changed() => {
            debug!(route, "stopped by other direction");
            Ok(())
        }
    };
    debug!(route, forwarded, "relay direction finished");
    result.map(|()| forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdbtape_core::SessionLog;
    use gdbtape_repro::{CaptureInterceptor, PacketReceiver, PacketSender, StreamTransport};
    use std::time::Duration;

    use crate::wire::Connection;

    /// A blocking stub that acks and answers `$OK#9a` to every packet until
    /// the connection closes.
    fn spawn_stub() -> (std::net::SocketAddr, std::thread::JoinHandle<usize>) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut transport = StreamTransport::from_tcp(stream).unwrap();
            let mut answered = 0;
            loop {
                match transport.receive_packet() {
                    Ok(frame) if frame.first() == Some(&b'$') => {
                        transport.send_packet(b"+").unwrap();
                        transport.send_packet(b"$OK#9a").unwrap();
                        answered += 1;
                    }
                    Ok(_) => {}
                    Err(_) => return answered,
                }
            }
        });
        (addr, handle)
    }

    async fn start_proxy(
        stub_addr: std::net::SocketAddr,
        recorder: Option<Recorder>,
    ) -> (std::net::SocketAddr, tokio::task::JoinHandle<RelayStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stub = TcpStream::connect(stub_addr).await.unwrap();
        let proxy =
            tokio::spawn(async move { serve_one(&listener, stub, recorder).await.unwrap() });
        (addr, proxy)
    }

    async fn run_debugger(addr: std::net::SocketAddr, requests: &[&[u8]]) -> Vec<Vec<u8>> {
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut client = Connection::from_tcp(stream, 16).unwrap();
        let mut replies = Vec::new();
        for request in requests {
            client.send(request).await.unwrap();
            replies.push(client.receive().await.unwrap());
            replies.push(client.receive().await.unwrap());
            client.send(b"+").await.unwrap();
        }
        replies
    }

    #[tokio::test]
    async fn stub_parts_unwraps_capture() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let recorder = Recorder::new(SessionLog::new("gdb-remote"));
        let transport = SessionTransport::Capture(CaptureInterceptor::new(stream, recorder.clone()));
        let (_, got) = stub_parts(transport).unwrap();
        got.unwrap().record(Direction::Sent, b"+");
        assert_eq!(recorder.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn capture_relay_is_transparent_and_recorded() {
        let (stub_addr, stub) = spawn_stub();
        let recorder = Recorder::new(SessionLog::new("gdb-remote"));
        let (proxy_addr, proxy) = start_proxy(stub_addr, Some(recorder.clone())).await;

        let replies = run_debugger(proxy_addr, &[b"$Hg0#df", b"$?#3f"]).await;
        assert_eq!(
            replies,
            vec![b"+".to_vec(), b"$OK#9a".to_vec(), b"+".to_vec(), b"$OK#9a".to_vec()]
        );

        let stats = proxy.await.unwrap();
        assert_eq!(stats.to_stub, 4);
        assert_eq!(stats.to_debugger, 4);
        assert_eq!(tokio::task::spawn_blocking(move || stub.join().unwrap()).await.unwrap(), 2);

        let log = recorder.snapshot();
        let sent: Vec<_> = log
            .packets()
            .iter()
            .filter(|p| p.direction() == Direction::Sent)
            .map(|p| p.bytes().to_vec())
            .collect();
        assert_eq!(
            sent,
            vec![
                b"$Hg0#df".to_vec(),
                b"+".to_vec(),
                b"$?#3f".to_vec(),
                b"+".to_vec()
            ]
        );
        assert_eq!(log.len(), 8);
        assert_eq!(log.packets()[0].direction(), Direction::Sent);
        assert_eq!(log.packets()[1].bytes(), b"+");
        assert_eq!(log.packets()[1].direction(), Direction::Received);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn live_relay_records_nothing() {
        let (stub_addr, stub) = spawn_stub();
        let (proxy_addr, proxy) = start_proxy(stub_addr, None).await;

        let replies = run_debugger(proxy_addr, &[b"$c#63"]).await;
        assert_eq!(replies[1], b"$OK#9a");
        proxy.await.unwrap();
        assert_eq!(tokio::task::spawn_blocking(move || stub.join().unwrap()).await.unwrap(), 1);
    }

    /// Both peers write a burst far larger than the socket buffers before
    /// reading anything back. The stub is single threaded, so it only
    /// drains its socket once its own burst has gone out.
    async fn bidirectional_burst(recorder: Option<Recorder>) -> RelayStats {
        const FRAMES: usize = 50_000;
        let frame = gdbtape_core::framer::write_packet(&[b'm'; 200]);

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let stub_addr = listener.local_addr().unwrap();
        let stub_frame = frame.clone();
        let stub = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut stub = StreamTransport::from_tcp(stream).unwrap();
            for _ in 0..FRAMES {
                stub.send_packet(&stub_frame).unwrap();
            }
            for _ in 0..FRAMES {
                stub.receive_packet().unwrap();
            }
        });

        let (proxy_addr, proxy) = start_proxy(stub_addr, recorder).await;
        let (from_proxy, mut to_proxy) = TcpStream::connect(proxy_addr).await.unwrap().into_split();
        let writer_frame = frame.clone();
        let writer = tokio::spawn(async move {
            for _ in 0..FRAMES {
                write_frame(&mut to_proxy, &writer_frame).await.unwrap();
            }
            // Held open until the reader is done.
            to_proxy
        });
        let mut frames = FrameStream::new(from_proxy);
        for _ in 0..FRAMES {
            assert_eq!(frames.next_frame().await.unwrap(), frame);
        }
        let to_proxy = writer.await.unwrap();
        tokio::task::spawn_blocking(move || stub.join().unwrap())
            .await
            .unwrap();
        drop((frames, to_proxy));

        let stats = proxy.await.unwrap();
        assert_eq!(stats.to_stub, FRAMES);
        assert_eq!(stats.to_debugger, FRAMES);
        stats
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn capture_relay_survives_bidirectional_burst() {
        let recorder = Recorder::new(SessionLog::new("gdb-remote"));
        let stats = tokio::time::timeout(
            Duration::from_secs(120),
            bidirectional_burst(Some(recorder.clone())),
        )
        .await
        .expect("capture relay stalled");
        assert_eq!(recorder.len(), stats.to_stub + stats.to_debugger);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn live_relay_survives_bidirectional_burst() {
        tokio::time::timeout(Duration::from_secs(120), bidirectional_burst(None))
            .await
            .expect("live relay stalled");
    }
}
