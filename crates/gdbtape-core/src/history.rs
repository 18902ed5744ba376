//! Bounded ring of recently exchanged packets, kept for diagnostics.

use std::collections::VecDeque;
use std::io::{self, Write};

use tracing::info;

use crate::packet::{escape_for_display, Direction};

/// Default number of packets retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 64;

/// One remembered packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Position of the packet in the whole exchange, not just the ring.
    pub packet_idx: u64,
    /// Which side produced it.
    pub direction: Direction,
    /// Number of bytes that crossed the transport.
    pub bytes_transmitted: usize,
    /// The frame bytes.
    pub bytes: Vec<u8>,
}

/// Keeps the last `capacity` packets of an exchange.
#[derive(Debug)]
pub struct PacketHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
    total: u64,
    dumped_to_log: bool,
}

impl PacketHistory {
    /// Create a history retaining at most `capacity` packets.
    ///
    /// A capacity of zero disables recording.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            total: 0,
            dumped_to_log: false,
        }
    }

    /// Remember a packet, evicting the oldest one when full.
    pub fn add(&mut self, direction: Direction, bytes: &[u8]) {
        let packet_idx = self.total;
        self.total += 1;
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry {
            packet_idx,
            direction,
            bytes_transmitted: bytes.len(),
            bytes: bytes.to_vec(),
        });
    }

    /// Retained entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of packets ever added, including evicted ones.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Write one line per retained packet.
    pub fn dump<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for entry in &self.entries {
            writeln!(w, "{}", format_entry(entry))?;
        }
        Ok(())
    }

    /// Emit the retained packets through `tracing`, at most once.
    pub fn dump_to_log(&mut self) {
        if self.dumped_to_log {
            return;
        }
        self.dumped_to_log = true;
        for entry in &self.entries {
            info!("{}", format_entry(entry));
        }
    }

    /// Whether [`dump_to_log`](Self::dump_to_log) already ran.
    pub fn did_dump_to_log(&self) -> bool {
        self.dumped_to_log
    }
}

impl Default for PacketHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

fn format_entry(entry: &HistoryEntry) -> String {
    format!(
        "history[{}] <{:4}> {} packet: {}",
        entry.packet_idx,
        entry.bytes_transmitted,
        entry.direction,
        escape_for_display(&entry.bytes)
    )
}
