//! Ties a reproducer directory to a debugging session.
//!
//! [`ReproSession::start`] decides, once, whether this run captures,
//! replays, or does neither. [`ReproSession::install`] then hands the
//! debugger its transport. [`ReproSession::finish`] persists a capture and
//! runs exactly once, whether called explicitly or on drop.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use gdbtape_config::ReproducerSettings;
use gdbtape_core::SessionLog;
use tracing::{error, info, warn};

use crate::capture::{CaptureInterceptor, Recorder};
use crate::directory::{begin_capture, begin_replay, ReproducerReader, ReproducerWriter};
use crate::error::ReproError;
use crate::replay::ReplayEngine;
use crate::transport::{PacketReceiver, PacketSender};

/// Subsystem name of the GDB remote connection in the manifest.
pub const GDB_REMOTE_PROVIDER: &str = "gdb-remote";

/// What this run does with the reproducer directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReproMode {
    /// Neither capture nor replay.
    Off,
    /// Record a new reproducer into `root`.
    Capture { root: PathBuf, force: bool },
    /// Serve the reproducer found at `root`.
    Replay { root: PathBuf },
}

impl ReproMode {
    /// Derive the mode from the host settings.
    ///
    /// `generate` wins over a bare `path`; capture without a path picks a
    /// fresh directory under the system temp dir.
    pub fn from_settings(settings: &ReproducerSettings) -> Self {
        match (settings.generate, &settings.path) {
            (true, Some(root)) => ReproMode::Capture {
                root: root.clone(),
                force: settings.force,
            },
            (true, None) => ReproMode::Capture {
                root: default_capture_root(),
                force: settings.force,
            },
            (false, Some(root)) => ReproMode::Replay { root: root.clone() },
            (false, None) => ReproMode::Off,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReproMode::Off => "off",
            ReproMode::Capture { .. } => "capture",
            ReproMode::Replay { .. } => "replay",
        }
    }
}

fn default_capture_root() -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    std::env::temp_dir().join(format!("gdbtape-{}-{stamp}", std::process::id()))
}

/// The transport handed to the debugger for one session.
#[derive(Debug)]
pub enum SessionTransport<T> {
    Live(T),
    Capture(CaptureInterceptor<T>),
    Replay(ReplayEngine),
}

impl<T> SessionTransport<T> {
    pub fn mode_name(&self) -> &'static str {
        match self {
            SessionTransport::Live(_) => "off",
            SessionTransport::Capture(_) => "capture",
            SessionTransport::Replay(_) => "replay",
        }
    }
}

impl<T: PacketSender> PacketSender for SessionTransport<T> {
    fn send_packet(&mut self, frame: &[u8]) -> Result<(), ReproError> {
        match self {
            SessionTransport::Live(t) => t.send_packet(frame),
            SessionTransport::Capture(t) => t.send_packet(frame),
            SessionTransport::Replay(t) => t.send_packet(frame),
        }
    }
}

impl<T: PacketReceiver> PacketReceiver for SessionTransport<T> {
    fn receive_packet(&mut self) -> Result<Vec<u8>, ReproError> {
        match self {
            SessionTransport::Live(t) => t.receive_packet(),
            SessionTransport::Capture(t) => t.receive_packet(),
            SessionTransport::Replay(t) => t.receive_packet(),
        }
    }
}

enum Backing {
    Off,
    Capture {
        writer: ReproducerWriter,
        recorder: Recorder,
        log_path: PathBuf,
    },
    Replay {
        reader: ReproducerReader,
        engine: Option<ReplayEngine>,
    },
}

/// One run's reproducer state.
pub struct ReproSession {
    mode: ReproMode,
    backing: Backing,
    installed: bool,
    finished: bool,
}

impl std::fmt::Debug for ReproSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReproSession")
            .field("mode", &self.mode)
            .field("installed", &self.installed)
            .field("finished", &self.finished)
            .finish()
    }
}

impl ReproSession {
    /// Open the reproducer directory for `mode`.
    ///
    /// In replay mode the session log is loaded here, so a missing or
    /// corrupt reproducer fails before any transport is installed.
    pub fn start(mode: ReproMode) -> Result<Self, ReproError> {
        let backing = match &mode {
            ReproMode::Off => Backing::Off,
            ReproMode::Capture { root, force } => {
                let mut writer = begin_capture(root, *force)?;
                let log_path = writer.register(GDB_REMOTE_PROVIDER)?;
                Backing::Capture {
                    writer,
                    recorder: Recorder::new(SessionLog::new(GDB_REMOTE_PROVIDER)),
                    log_path,
                }
            }
            ReproMode::Replay { root } => {
                let reader = begin_replay(root)?;
                let log_path = reader.log_path(GDB_REMOTE_PROVIDER)?;
                let log = SessionLog::load_from(&log_path)
                    .map_err(|e| ReproError::from_log(&log_path, e))?;
                if log.subsystem() != GDB_REMOTE_PROVIDER {
                    warn!(
                        subsystem = log.subsystem(),
                        "session log subsystem does not match manifest entry"
                    );
                }
                Backing::Replay {
                    reader,
                    engine: Some(ReplayEngine::new(log)),
                }
            }
        };
        info!(mode = mode.name(), "reproducer session started");
        Ok(Self {
            mode,
            backing,
            installed: false,
            finished: false,
        })
    }

    pub fn mode(&self) -> &ReproMode {
        &self.mode
    }

    /// The reproducer root, unless the session is off.
    pub fn root(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Off => None,
            Backing::Capture { writer, .. } => Some(writer.root()),
            Backing::Replay { reader, .. } => Some(reader.root()),
        }
    }

    /// The shared recorder of a capture session.
    pub fn recorder(&self) -> Option<&Recorder> {
        match &self.backing {
            Backing::Capture { recorder, .. } => Some(recorder),
            _ => None,
        }
    }

    /// Hand out the session transport.
    ///
    /// `connect` opens the live connection. It is not called in replay
    /// mode, where no live target is contacted.
    pub fn install<T, F>(&mut self, connect: F) -> Result<SessionTransport<T>, ReproError>
    where
        F: FnOnce() -> Result<T, ReproError>,
    {
        if self.installed {
            return Err(ReproError::AlreadyInstalled);
        }
        let transport = match &mut self.backing {
            Backing::Off => SessionTransport::Live(connect()?),
            Backing::Capture { recorder, .. } => {
                SessionTransport::Capture(CaptureInterceptor::new(connect()?, recorder.clone()))
            }
            Backing::Replay { engine, .. } => {
                SessionTransport::Replay(engine.take().ok_or(ReproError::AlreadyInstalled)?)
            }
        };
        self.installed = true;
        info!(mode = transport.mode_name(), "session transport installed");
        Ok(transport)
    }

    /// Hand out the replay engine of a replay session, for callers that
    /// drive it directly instead of through a [`SessionTransport`].
    pub fn install_replay(&mut self) -> Result<ReplayEngine, ReproError> {
        if self.installed {
            return Err(ReproError::AlreadyInstalled);
        }
        let Backing::Replay { engine, .. } = &mut self.backing else {
            return Err(ReproError::WrongMode {
                expected: "replay",
                actual: self.mode.name(),
            });
        };
        let engine = engine.take().ok_or(ReproError::AlreadyInstalled)?;
        self.installed = true;
        info!(mode = "replay", "replay engine installed");
        Ok(engine)
    }

    /// Write the capture recorded so far without ending the session.
    pub fn flush(&self) -> Result<(), ReproError> {
        if let Backing::Capture {
            recorder, log_path, ..
        } = &self.backing
        {
            recorder
                .finalize_to(log_path)
                .map_err(|e| ReproError::from_log(log_path, e))?;
        }
        Ok(())
    }

    /// End the session. A capture is persisted and kept.
    ///
    /// Later calls are no-ops.
    pub fn finish(&mut self) -> Result<(), ReproError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if let Backing::Capture {
            writer,
            recorder,
            log_path,
        } = &mut self.backing
        {
            recorder
                .finalize_to(log_path)
                .map_err(|e| ReproError::from_log(log_path, e))?;
            writer.keep()?;
            info!(
                packets = recorder.len(),
                "capture written to {}",
                log_path.display()
            );
        }
        Ok(())
    }

    /// End a capture session and delete what it wrote.
    pub fn discard(&mut self) -> Result<(), ReproError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if let Backing::Capture { writer, .. } = &mut self.backing {
            writer.discard()?;
        }
        Ok(())
    }
}

impl Drop for ReproSession {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            error!("failed to finish reproducer session: {e}");
        }
    }
}
