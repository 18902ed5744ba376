//! Recorded packet model.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which side of the connection produced a packet, seen from the debugger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Written by the debugger towards the stub.
    Sent,
    /// Read by the debugger from the stub.
    Received,
}

impl Direction {
    /// Short label used in dumps and logs.
    pub fn label(self) -> &'static str {
        match self {
            Direction::Sent => "send",
            Direction::Received => "read",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One recorded frame: the exact bytes that crossed the transport.
///
/// A packet has no identity of its own; its position in the owning
/// [`SessionLog`](crate::SessionLog) is its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    direction: Direction,
    bytes: Vec<u8>,
}

impl Packet {
    /// Create a packet from its direction and raw frame bytes.
    pub fn new(direction: Direction, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            direction,
            bytes: bytes.into(),
        }
    }

    /// Return the packet direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Return the raw frame bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the packet and return its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Render the bytes for humans: printable ASCII as-is, everything
    /// else as `\xNN`.
    pub fn escaped(&self) -> String {
        escape_for_display(&self.bytes)
    }
}

/// Render arbitrary bytes as printable text.
pub fn escape_for_display(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if b.is_ascii_graphic() || b == b' ' {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\x{b:02x}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Direction::Sent).unwrap(),
            "\"sent\""
        );
        assert_eq!(
            serde_json::to_string(&Direction::Received).unwrap(),
            "\"received\""
        );
    }

    #[test]
    fn direction_label() {
        assert_eq!(Direction::Sent.to_string(), "send");
        assert_eq!(Direction::Received.to_string(), "read");
    }

    #[test]
    fn packet_keeps_bytes() {
        let pkt = Packet::new(Direction::Received, b"$OK#9a".to_vec());
        assert_eq!(pkt.direction(), Direction::Received);
        assert_eq!(pkt.bytes(), b"$OK#9a");
        assert_eq!(pkt.into_bytes(), b"$OK#9a".to_vec());
    }

    #[test]
    fn escaped_renders_control_bytes() {
        let pkt = Packet::new(Direction::Sent, vec![0x03, b'$', 0x00, b'a']);
        assert_eq!(pkt.escaped(), "\\x03$\\x00a");
    }
}
