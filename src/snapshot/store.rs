//! Snapshot Store
//!
//! Persists the `start` snapshot as `dcf.<key>.json` inside a directory so the
//! matching `end` run can pick it up. One file per correlation key; creating
//! it twice is a precondition violation.

use super::Snapshot;
use crate::error::{not_found_error, precondition_error, validation_error, AppError};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// File-backed store for snapshots
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File path for a key
    pub fn path_for(&self, key: &str) -> Result<PathBuf, AppError> {
        validate_key(key)?;
        Ok(self.dir.join(format!("dcf.{}.json", key)))
    }

    pub fn exists(&self, key: &str) -> Result<bool, AppError> {
        Ok(self.path_for(key)?.exists())
    }

    /// Fail with a precondition violation if `key` already has a snapshot
    pub fn ensure_absent(&self, key: &str) -> Result<(), AppError> {
        let path = self.path_for(key)?;
        if path.exists() {
            return Err(already_exists(&path));
        }
        Ok(())
    }

    /// Persist a snapshot under a fresh key. The file is written to a
    /// temporary name and linked into place only once complete.
    pub fn create(&self, key: &str, snapshot: &Snapshot) -> Result<PathBuf, AppError> {
        let path = self.path_for(key)?;
        let bytes = snapshot.to_json()?;

        std::fs::create_dir_all(&self.dir)?;

        let mut file = NamedTempFile::new_in(&self.dir)?;
        file.write_all(&bytes)?;
        file.as_file().sync_all()?;

        file.persist_noclobber(&path).map_err(|e| match e.error.kind() {
            ErrorKind::AlreadyExists => already_exists(&path),
            _ => AppError::Io(e.error),
        })?;

        tracing::info!(
            "Saved snapshot for key {} ({} tables) to {}",
            key,
            snapshot.tables().len(),
            path.display()
        );

        Ok(path)
    }

    /// Load the snapshot stored under `key`
    pub fn load(&self, key: &str) -> Result<Snapshot, AppError> {
        let path = self.path_for(key)?;

        let bytes = std::fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => not_found_error(format!(
                "No start snapshot for key {} ({}). Run 'statdiff start {}' first.",
                key,
                path.display(),
                key
            )),
            _ => AppError::Io(e),
        })?;

        let snapshot = Snapshot::from_json(&bytes).map_err(|e| match e {
            AppError::Format(msg) => AppError::Format(format!("{}: {}", path.display(), msg)),
            other => other,
        })?;

        tracing::debug!(
            "Loaded snapshot for key {} captured at {}",
            key,
            snapshot.captured_at()
        );

        Ok(snapshot)
    }
}

fn already_exists(path: &Path) -> AppError {
    precondition_error(format!("Snapshot file already exists: {}", path.display()))
}

/// Keys end up in a file name: no separators, no leading dot
fn validate_key(key: &str) -> Result<(), AppError> {
    if key.is_empty() {
        return Err(validation_error("Correlation key must not be empty"));
    }
    if key.starts_with('.') {
        return Err(validation_error(format!(
            "Correlation key '{}' must not start with '.'",
            key
        )));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(validation_error(format!(
            "Correlation key '{}' may only contain letters, digits, '-', '_' and '.'",
            key
        )));
    }
    Ok(())
}
