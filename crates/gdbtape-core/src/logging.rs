//! Log file helpers shared by the binary.
//!
//! The `tracing-subscriber` setup itself lives in `src/main.rs`; this
//! module only resolves where the log goes, keeps its size bounded, and
//! maps configured level names onto filter directives.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A log file is rotated once it grows past this size (8 MB).
pub const DEFAULT_MAX_LOG_SIZE: u64 = 8 * 1024 * 1024;

/// Number of rotated log files kept next to the active one.
pub const DEFAULT_MAX_LOG_FILES: u32 = 3;

/// Platform default for the log file when none is configured.
///
/// * Linux: `$XDG_STATE_HOME/gdbtape/gdbtape.log`, else `$HOME/.local/state/gdbtape/gdbtape.log`
/// * macOS: `$HOME/Library/Logs/gdbtape/gdbtape.log`
/// * elsewhere: `<temp dir>/gdbtape/gdbtape.log`
pub fn default_log_file_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        if let Some(state) = std::env::var_os("XDG_STATE_HOME") {
            return PathBuf::from(state).join("gdbtape/gdbtape.log");
        }
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(".local/state/gdbtape/gdbtape.log");
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join("Library/Logs/gdbtape/gdbtape.log");
        }
    }
    std::env::temp_dir().join("gdbtape").join("gdbtape.log")
}

/// Create the parent directory of `log_path` and rotate an oversized file.
pub fn prepare_log_file(log_path: &Path, max_size: u64, max_files: u32) -> io::Result<()> {
    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    rotate_log_files(log_path, max_size, max_files)
}

/// Shift `gdbtape.log` to `gdbtape.log.1`, `.1` to `.2` and so on once the
/// active file reaches `max_size` bytes. The file at `.<max_files>` is dropped.
pub fn rotate_log_files(log_path: &Path, max_size: u64, max_files: u32) -> io::Result<()> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if size < max_size {
        return Ok(());
    }
    if max_files == 0 {
        return fs::remove_file(log_path);
    }

    let oldest = rotated_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for i in (1..max_files).rev() {
        let from = rotated_path(log_path, i);
        if from.exists() {
            fs::rename(&from, rotated_path(log_path, i + 1))?;
        }
    }
    fs::rename(log_path, rotated_path(log_path, 1))
}

/// Map a level name (any case) to a filter directive; unknown names
/// fall back to `"info"`.
pub fn log_level_to_filter(level: &str) -> &'static str {
    match level.to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        "off" => "off",
        _ => "info",
    }
}

fn rotated_path(base: &Path, index: u32) -> PathBuf {
    let name = base.file_name().unwrap_or_default().to_string_lossy();
    base.with_file_name(format!("{name}.{index}"))
}
