use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use gdbtape_core::framer::{ACK, NACK, NOTIFY_START, PACKET_START};
use gdbtape_repro::{PacketReceiver, PacketSender, ReplayEngine, ReproError};

use crate::wire::Connection;

/// How a replayed debugger session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServeOutcome {
    /// The debugger hung up.
    DebuggerDisconnected,
    /// The debugger needed a response the capture does not have.
    Exhausted { consumed: usize },
}

/// Accept one debugger on `listener` and answer it from `engine`.
pub(crate) async fn serve_one(
    listener: &TcpListener,
    mut engine: ReplayEngine,
    history_capacity: usize,
) -> Result<ServeOutcome> {
    let (stream, peer) = listener
        .accept()
        .await
        .context("failed to accept debugger")?;
    info!("debugger connected from {peer}");
    let mut debugger = Connection::from_tcp(stream, history_capacity)?;

    let outcome = answer(&mut debugger, &mut engine).await;
    match &outcome {
        Ok(ServeOutcome::DebuggerDisconnected) => info!("debugger disconnected"),
        Ok(ServeOutcome::Exhausted { consumed }) => {
            warn!(consumed, "capture exhausted, closing connection");
            debugger.history_mut().dump_to_log();
        }
        Err(e) => {
            warn!("replay session failed: {e}");
            debugger.history_mut().dump_to_log();
        }
    }
    Ok(outcome?)
}

/// Answer every debugger request with the recorded frames up to and
/// including the next packet or notification. Debugger acks are consumed
/// without touching the engine.
pub(crate) async fn answer<R, W>(
    debugger: &mut Connection<R, W>,
    engine: &mut ReplayEngine,
) -> Result<ServeOutcome, ReproError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let request = match debugger.receive().await {
            Ok(frame) => frame,
            Err(ReproError::Disconnected) => return Ok(ServeOutcome::DebuggerDisconnected),
            Err(e) => return Err(e),
        };

        if matches!(request.first(), Some(&ACK) | Some(&NACK)) {
            debug!(ack = request[0] == ACK, "consumed debugger ack");
            continue;
        }

        engine.send_packet(&request)?;
        loop {
            let response = match engine.receive_packet() {
                Ok(frame) => frame,
                Err(e) if e.is_replay_exhausted() => {
                    return Ok(ServeOutcome::Exhausted {
                        consumed: engine.position(),
                    })
                }
                Err(e) => return Err(e),
            };
            debugger.send(&response).await?;
            if matches!(response.first(), Some(&PACKET_START) | Some(&NOTIFY_START)) {
                break;
            }
        }
    }
}
