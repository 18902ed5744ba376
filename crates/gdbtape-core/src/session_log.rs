//! Append-only session log and its JSON Lines file format.
//!
//! ```text
//! {"type":"header","schema_version":1,"subsystem":"gdb-remote","created_at_ms":1700000000000}
//! {"type":"packet","index":0,"direction":"sent","payload":"JHFTdXBwb3J0ZWQjMzc="}
//! {"type":"packet","index":1,"direction":"received","payload":"Kw=="}
//! {"type":"trailer","packet_count":2}
//! ```
//!
//! Payloads are base64 so arbitrary binary survives byte-exact. The
//! trailer carries the packet count; a file without it was truncated.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LogError;
use crate::packet::{Direction, Packet};

/// Highest log schema version this build reads and the one it writes.
pub const SESSION_LOG_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum LogLine {
    Header {
        schema_version: u32,
        subsystem: String,
        created_at_ms: u64,
    },
    Packet {
        index: usize,
        direction: Direction,
        payload: String,
    },
    Trailer {
        packet_count: usize,
    },
}

/// The ordered packet history of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLog {
    subsystem: String,
    created_at_ms: u64,
    packets: Vec<Packet>,
}

impl SessionLog {
    /// Create an empty log for the named subsystem, stamped with the
    /// current time.
    pub fn new(subsystem: impl Into<String>) -> Self {
        Self::with_created_at(subsystem, now_ms())
    }

    /// Create an empty log with an explicit creation timestamp.
    pub fn with_created_at(subsystem: impl Into<String>, created_at_ms: u64) -> Self {
        Self {
            subsystem: subsystem.into(),
            created_at_ms,
            packets: Vec::new(),
        }
    }

    /// Append a packet and return its index.
    pub fn append(&mut self, direction: Direction, bytes: impl Into<Vec<u8>>) -> usize {
        let index = self.packets.len();
        self.packets.push(Packet::new(direction, bytes));
        index
    }

    /// The subsystem this log belongs to.
    pub fn subsystem(&self) -> &str {
        &self.subsystem
    }

    /// Creation time in milliseconds since the Unix epoch.
    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    /// All packets in wire order.
    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    /// Number of recorded packets.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Consume the log and return its packets.
    pub fn into_packets(self) -> Vec<Packet> {
        self.packets
    }

    /// Write the full log to `path`, replacing any existing file.
    ///
    /// The file is written to a sibling temp file and renamed into place,
    /// so readers never observe a half-written log. Calling this again
    /// without further appends produces identical bytes.
    pub fn finalize_to(&self, path: &Path) -> Result<(), LogError> {
        let tmp_path = temp_path_for(path);
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            self.write_to(&mut writer)?;
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        debug!(
            path = %path.display(),
            packets = self.packets.len(),
            "session log written"
        );
        Ok(())
    }

    /// Serialize the log as JSON Lines into `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_line(
            w,
            &LogLine::Header {
                schema_version: SESSION_LOG_SCHEMA_VERSION,
                subsystem: self.subsystem.clone(),
                created_at_ms: self.created_at_ms,
            },
        )?;
        for (index, packet) in self.packets.iter().enumerate() {
            write_line(
                w,
                &LogLine::Packet {
                    index,
                    direction: packet.direction(),
                    payload: STANDARD.encode(packet.bytes()),
                },
            )?;
        }
        write_line(
            w,
            &LogLine::Trailer {
                packet_count: self.packets.len(),
            },
        )?;
        w.flush()
    }

    /// Load a log previously written by [`finalize_to`](Self::finalize_to).
    pub fn load_from(path: &Path) -> Result<Self, LogError> {
        let file = File::open(path)?;
        let log = Self::read_from(BufReader::new(file))?;
        debug!(
            path = %path.display(),
            packets = log.packets.len(),
            "session log loaded"
        );
        Ok(log)
    }

    /// Deserialize a log from JSON Lines.
    pub fn read_from<R: BufRead>(reader: R) -> Result<Self, LogError> {
        let mut header: Option<(String, u64)> = None;
        let mut packets = Vec::new();
        let mut trailer_seen = false;
        let mut last_line = 0;

        for (idx, line) in reader.split(b'\n').enumerate() {
            let line_no = idx + 1;
            last_line = line_no;
            let line = line?;
            let line = std::str::from_utf8(&line)
                .map_err(|e| LogError::corrupt(line_no, format!("invalid UTF-8: {e}")))?;
            if line.trim().is_empty() {
                continue;
            }
            if trailer_seen {
                return Err(LogError::corrupt(line_no, "content after trailer"));
            }

            let parsed: LogLine = serde_json::from_str(line)
                .map_err(|e| LogError::corrupt(line_no, e.to_string()))?;
            match parsed {
                LogLine::Header {
                    schema_version,
                    subsystem,
                    created_at_ms,
                } => {
                    if header.is_some() || !packets.is_empty() {
                        return Err(LogError::corrupt(line_no, "header must be the first line"));
                    }
                    if schema_version > SESSION_LOG_SCHEMA_VERSION {
                        return Err(LogError::corrupt(
                            line_no,
                            format!(
                                "unsupported schema_version {schema_version} (max supported: {SESSION_LOG_SCHEMA_VERSION})"
                            ),
                        ));
                    }
                    header = Some((subsystem, created_at_ms));
                }
                LogLine::Packet {
                    index,
                    direction,
                    payload,
                } => {
                    if header.is_none() {
                        return Err(LogError::corrupt(line_no, "packet before header"));
                    }
                    if index != packets.len() {
                        return Err(LogError::corrupt(
                            line_no,
                            format!("expected packet index {}, found {index}", packets.len()),
                        ));
                    }
                    let bytes = STANDARD
                        .decode(payload.as_bytes())
                        .map_err(|e| LogError::corrupt(line_no, format!("bad payload: {e}")))?;
                    packets.push(Packet::new(direction, bytes));
                }
                LogLine::Trailer { packet_count } => {
                    if header.is_none() {
                        return Err(LogError::corrupt(line_no, "trailer before header"));
                    }
                    if packet_count != packets.len() {
                        return Err(LogError::corrupt(
                            line_no,
                            format!(
                                "trailer counts {packet_count} packets, found {}",
                                packets.len()
                            ),
                        ));
                    }
                    trailer_seen = true;
                }
            }
        }

        let (subsystem, created_at_ms) =
            header.ok_or_else(|| LogError::corrupt(last_line + 1, "missing header"))?;
        if !trailer_seen {
            return Err(LogError::corrupt(
                last_line + 1,
                "missing trailer, log is truncated",
            ));
        }

        Ok(Self {
            subsystem,
            created_at_ms,
            packets,
        })
    }
}

fn write_line<W: Write>(w: &mut W, line: &LogLine) -> io::Result<()> {
    let json = serde_json::to_string(line).map_err(io::Error::other)?;
    writeln!(w, "{json}")
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path.file_name().unwrap_or_default().to_string_lossy();
    path.with_file_name(format!(".{file_name}.tmp"))
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
