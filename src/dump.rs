use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use gdbtape_core::SessionLog;
use gdbtape_repro::begin_replay;

/// Print every session log registered in the reproducer at `root`.
pub(crate) fn dump<W: Write>(root: &Path, out: &mut W) -> Result<()> {
    let reader = begin_replay(root)?;
    for provider in reader.providers() {
        let path = reader.log_path(provider)?;
        let log = SessionLog::load_from(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        writeln!(
            out,
            "# {provider}: {} packets, created at {} ms",
            log.len(),
            log.created_at_ms()
        )?;
        for (index, packet) in log.packets().iter().enumerate() {
            writeln!(
                out,
                "{index:>6} <{:4}> {}: {}",
                packet.bytes().len(),
                packet.direction().label(),
                packet.escaped()
            )?;
        }
    }
    Ok(())
}
