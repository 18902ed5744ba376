//! The reproducer directory: a manifest plus one session log per subsystem.
//!
//! Layout:
//!
//! ```text
//! <root>/index.json         {"version":1,"providers":{"gdb-remote":"gdb-remote.jsonl"}}
//! <root>/gdb-remote.jsonl   session log
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ReproError;

/// Manifest file name inside the reproducer root.
pub const MANIFEST_FILE: &str = "index.json";

/// Manifest format version written by this crate.
pub const MANIFEST_VERSION: u32 = 1;

const LOG_EXTENSION: &str = "jsonl";

/// Maps each registered subsystem to its log file, relative to the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    #[serde(default)]
    pub providers: BTreeMap<String, PathBuf>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            providers: BTreeMap::new(),
        }
    }
}

impl Manifest {
    fn write(&self, root: &Path) -> Result<(), ReproError> {
        let path = root.join(MANIFEST_FILE);
        let tmp = root.join(format!(".{MANIFEST_FILE}.tmp"));
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn read(root: &Path) -> Result<Self, ReproError> {
        let path = root.join(MANIFEST_FILE);
        if !path.is_file() {
            return Err(ReproError::ManifestMissing(path));
        }
        let content = fs::read_to_string(&path)?;
        let manifest: Manifest =
            serde_json::from_str(&content).map_err(|e| ReproError::CorruptManifest {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        if manifest.version > MANIFEST_VERSION {
            return Err(ReproError::CorruptManifest {
                path,
                reason: format!("unsupported manifest version {}", manifest.version),
            });
        }
        Ok(manifest)
    }
}

fn check_provider_name(name: &str) -> Result<(), ReproError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ReproError::InvalidProviderName(name.to_string()))
    }
}

fn is_empty_dir(path: &Path) -> Result<bool, ReproError> {
    Ok(fs::read_dir(path)?.next().is_none())
}

/// Claim `root` for a new capture.
///
/// A missing directory is created. An existing non-empty directory is an
/// error unless `force` is set, in which case its contents are removed.
pub fn begin_capture(root: &Path, force: bool) -> Result<ReproducerWriter, ReproError> {
    if root.exists() {
        if !root.is_dir() {
            return Err(ReproError::DirectoryExists(root.to_path_buf()));
        }
        if !is_empty_dir(root)? {
            if !force {
                return Err(ReproError::DirectoryExists(root.to_path_buf()));
            }
            warn!("clearing existing reproducer directory {}", root.display());
            fs::remove_dir_all(root)?;
        }
    }
    fs::create_dir_all(root)?;

    let manifest = Manifest::default();
    manifest.write(root)?;
    info!("capturing reproducer into {}", root.display());

    Ok(ReproducerWriter {
        root: root.to_path_buf(),
        manifest,
        decision: Decision::Pending,
    })
}

/// Open an existing reproducer for replay.
pub fn begin_replay(root: &Path) -> Result<ReproducerReader, ReproError> {
    if !root.is_dir() {
        return Err(ReproError::DirectoryNotFound(root.to_path_buf()));
    }
    let manifest = Manifest::read(root)?;
    info!(
        providers = manifest.providers.len(),
        "replaying reproducer from {}",
        root.display()
    );
    Ok(ReproducerReader {
        root: root.to_path_buf(),
        manifest,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Pending,
    Kept,
    Discarded,
}

/// Write side of a reproducer directory.
///
/// Dropping a writer that was neither kept nor discarded keeps it.
#[derive(Debug)]
pub struct ReproducerWriter {
    root: PathBuf,
    manifest: Manifest,
    decision: Decision,
}

impl ReproducerWriter {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Register a subsystem and return the path its log should be written
    /// to. Registering the same name again returns the same path.
    pub fn register(&mut self, name: &str) -> Result<PathBuf, ReproError> {
        check_provider_name(name)?;
        if let Some(file) = self.manifest.providers.get(name) {
            return Ok(self.root.join(file));
        }
        let file = PathBuf::from(format!("{name}.{LOG_EXTENSION}"));
        self.manifest.providers.insert(name.to_string(), file.clone());
        self.manifest.write(&self.root)?;
        debug!(provider = name, "registered reproducer provider");
        Ok(self.root.join(file))
    }

    /// Mark the capture as complete, rewriting the manifest.
    pub fn keep(&mut self) -> Result<(), ReproError> {
        if self.decision != Decision::Pending {
            return Ok(());
        }
        self.manifest.write(&self.root)?;
        self.decision = Decision::Kept;
        info!("reproducer written to {}", self.root.display());
        Ok(())
    }

    /// Delete everything this capture wrote.
    pub fn discard(&mut self) -> Result<(), ReproError> {
        if self.decision != Decision::Pending {
            return Ok(());
        }
        self.decision = Decision::Discarded;
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        info!("reproducer discarded: {}", self.root.display());
        Ok(())
    }
}

impl Drop for ReproducerWriter {
    fn drop(&mut self) {
        if self.decision == Decision::Pending {
            if let Err(e) = self.keep() {
                warn!("failed to finalize reproducer manifest: {e}");
            }
        }
    }
}

/// Read side of a reproducer directory.
#[derive(Debug)]
pub struct ReproducerReader {
    root: PathBuf,
    manifest: Manifest,
}

impl ReproducerReader {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Registered subsystem names, sorted.
    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.manifest.providers.keys().map(String::as_str)
    }

    /// Path of the log registered for `name`.
    pub fn log_path(&self, name: &str) -> Result<PathBuf, ReproError> {
        self.manifest
            .providers
            .get(name)
            .map(|file| self.root.join(file))
            .ok_or_else(|| ReproError::ProviderMissing(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn capture_creates_directory_and_manifest() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repro");
        let mut writer = begin_capture(&root, false).unwrap();
        let log = writer.register("gdb-remote").unwrap();
        assert_eq!(log, root.join("gdb-remote.jsonl"));
        writer.keep().unwrap();

        let content = fs::read_to_string(root.join(MANIFEST_FILE)).unwrap();
        let manifest: Manifest = serde_json::from_str(&content).unwrap();
        assert_eq!(manifest.version, 1);
        assert_eq!(
            manifest.providers.get("gdb-remote"),
            Some(&PathBuf::from("gdb-remote.jsonl"))
        );
    }

    #[test]
    fn capture_into_empty_existing_directory() {
        let tmp = TempDir::new().unwrap();
        assert!(begin_capture(tmp.path(), false).is_ok());
    }

    #[test]
    fn capture_refuses_non_empty_directory() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("stale"), "x").unwrap();
        let err = begin_capture(tmp.path(), false).unwrap_err();
        assert!(matches!(err, ReproError::DirectoryExists(_)));
        assert!(tmp.path().join("stale").exists());
    }

    #[test]
    fn capture_force_clears_directory() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repro");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("stale"), "x").unwrap();
        let writer = begin_capture(&root, true).unwrap();
        assert!(!root.join("stale").exists());
        assert!(root.join(MANIFEST_FILE).exists());
        drop(writer);
    }

    #[test]
    fn register_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let mut writer = begin_capture(tmp.path(), false).unwrap();
        let a = writer.register("gdb-remote").unwrap();
        let b = writer.register("gdb-remote").unwrap();
        assert_eq!(a, b);
        assert_eq!(writer.manifest().providers.len(), 1);
    }

    #[test]
    fn register_rejects_path_like_names() {
        let tmp = TempDir::new().unwrap();
        let mut writer = begin_capture(tmp.path(), false).unwrap();
        for name in ["", "../escape", "a/b", "a.b"] {
            assert!(matches!(
                writer.register(name),
                Err(ReproError::InvalidProviderName(_))
            ));
        }
    }

    #[test]
    fn discard_removes_directory() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repro");
        let mut writer = begin_capture(&root, false).unwrap();
        writer.register("gdb-remote").unwrap();
        writer.discard().unwrap();
        assert!(!root.exists());
        // Decision is final.
        writer.keep().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn drop_keeps_by_default() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repro");
        {
            let mut writer = begin_capture(&root, false).unwrap();
            writer.register("gdb-remote").unwrap();
        }
        let reader = begin_replay(&root).unwrap();
        assert_eq!(reader.providers().collect::<Vec<_>>(), vec!["gdb-remote"]);
    }

    #[test]
    fn replay_missing_directory() {
        let tmp = TempDir::new().unwrap();
        let err = begin_replay(&tmp.path().join("absent")).unwrap_err();
        assert!(matches!(err, ReproError::DirectoryNotFound(_)));
    }

    #[test]
    fn replay_missing_manifest() {
        let tmp = TempDir::new().unwrap();
        let err = begin_replay(tmp.path()).unwrap_err();
        assert!(matches!(err, ReproError::ManifestMissing(_)));
    }

    #[test]
    fn replay_corrupt_manifest() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(MANIFEST_FILE), "{ not json").unwrap();
        let err = begin_replay(tmp.path()).unwrap_err();
        assert!(matches!(err, ReproError::CorruptManifest { .. }));
    }

    #[test]
    fn replay_rejects_newer_manifest_version() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(MANIFEST_FILE),
            r#"{"version":2,"providers":{}}"#,
        )
        .unwrap();
        let err = begin_replay(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("unsupported manifest version 2"));
    }

    #[test]
    fn replay_unknown_provider() {
        let tmp = TempDir::new().unwrap();
        begin_capture(tmp.path(), false).unwrap().keep().unwrap();
        let reader = begin_replay(tmp.path()).unwrap();
        let err = reader.log_path("gdb-remote").unwrap_err();
        assert!(matches!(err, ReproError::ProviderMissing(name) if name == "gdb-remote"));
    }
}
