//! Deterministic playback of a recorded session.
//!
//! The engine walks the recorded packet sequence with a single cursor.
//! Sends from the live side consume matching recorded sends; receives skip
//! any recorded sends the live side never issued and hand back the next
//! recorded response. Live request bytes are not compared against the
//! recording, so a diverging debugger simply gets the recorded answers.

use std::path::Path;

use gdbtape_core::packet::escape_for_display;
use gdbtape_core::{Direction, Packet, SessionLog};
use tracing::{debug, trace, warn};

use crate::error::ReproError;
use crate::transport::{PacketReceiver, PacketSender};

/// Where the engine stands in the request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    /// No request has been sent yet.
    AwaitingRequest,
    /// At least one request was sent; responses may be read.
    ServingResponses,
    /// A read found no recorded response left. Terminal.
    Exhausted,
}

/// Serves recorded responses in place of a live connection.
#[derive(Debug)]
pub struct ReplayEngine {
    packets: Vec<Packet>,
    cursor: usize,
    state: ReplayState,
    unmatched_sends: usize,
}

impl ReplayEngine {
    pub fn new(log: SessionLog) -> Self {
        debug!(
            subsystem = log.subsystem(),
            packets = log.len(),
            "replay engine loaded"
        );
        Self {
            packets: log.into_packets(),
            cursor: 0,
            state: ReplayState::AwaitingRequest,
            unmatched_sends: 0,
        }
    }

    /// Load the session log at `path`.
    pub fn load(path: &Path) -> Result<Self, ReproError> {
        let log = SessionLog::load_from(path).map_err(|e| ReproError::from_log(path, e))?;
        Ok(Self::new(log))
    }

    pub fn state(&self) -> ReplayState {
        self.state
    }

    /// Index of the next recorded packet to be consumed.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Total number of recorded packets.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Recorded responses not yet handed out.
    pub fn remaining_responses(&self) -> usize {
        self.packets[self.cursor..]
            .iter()
            .filter(|p| p.direction() == Direction::Received)
            .count()
    }

    /// Live sends that had no recorded send at the cursor.
    pub fn unmatched_sends(&self) -> usize {
        self.unmatched_sends
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == ReplayState::Exhausted
    }

    fn exhausted(&self) -> ReproError {
        ReproError::ReplayExhausted {
            consumed: self.cursor,
        }
    }
}

impl PacketSender for ReplayEngine {
    fn send_packet(&mut self, frame: &[u8]) -> Result<(), ReproError> {
        if self.state == ReplayState::Exhausted {
            return Err(self.exhausted());
        }

        match self.packets.get(self.cursor) {
            Some(recorded) if recorded.direction() == Direction::Sent => {
                if recorded.bytes() != frame {
                    trace!(
                        index = self.cursor,
                        live = %escape_for_display(frame),
                        recorded = %recorded.escaped(),
                        "live request differs from recording"
                    );
                }
                self.cursor += 1;
            }
            _ => {
                self.unmatched_sends += 1;
                warn!(
                    index = self.cursor,
                    packet = %escape_for_display(frame),
                    "no recorded request at this point, ignoring"
                );
            }
        }

        self.state = ReplayState::ServingResponses;
        Ok(())
    }
}

impl PacketReceiver for ReplayEngine {
    fn receive_packet(&mut self) -> Result<Vec<u8>, ReproError> {
        match self.state {
            ReplayState::Exhausted => return Err(self.exhausted()),
            ReplayState::AwaitingRequest => return Err(ReproError::ReceiveBeforeRequest),
            ReplayState::ServingResponses => {}
        }

        while let Some(recorded) = self.packets.get(self.cursor) {
            if recorded.direction() == Direction::Received {
                break;
            }
            debug!(
                index = self.cursor,
                packet = %recorded.escaped(),
                "skipping recorded request the live side did not send"
            );
            self.cursor += 1;
        }

        match self.packets.get(self.cursor) {
            Some(recorded) => {
                let bytes = recorded.bytes().to_vec();
                trace!(index = self.cursor, packet = %recorded.escaped(), "replaying response");
                self.cursor += 1;
                Ok(bytes)
            }
            None => {
                self.state = ReplayState::Exhausted;
                warn!(consumed = self.cursor, "replay exhausted");
                Err(self.exhausted())
            }
        }
    }
}
