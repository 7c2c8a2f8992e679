//! History retention for report directories.
//!
//! The report root holds one directory per execution plus the `latest`
//! marker. After every fan-out the oldest entries (by modification time) beyond
//! `report_history + 1` are deleted; the extra slot is taken by the marker.
//! The registry forgets a pruned execution before its directory is removed so
//! late callbacks cannot resurrect state for a directory that is gone.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, error, info};

use crate::core::errors::{ControllerError, Result};

/// Name of the pointer to the most recent execution directory
pub const LATEST_MARKER: &str = "latest";

/// Result of a retention run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetentionOutcome {
    /// Entries in the report root before pruning
    pub entries_before: usize,
    /// Names of the pruned executions, oldest first
    pub pruned: Vec<String>,
    /// Entries that could not be deleted from disk
    pub delete_failures: usize,
}

#[derive(Debug, Clone)]
pub struct RetentionManager {
    report_root: PathBuf,
    capacity: usize,
}

impl RetentionManager {
    pub fn new(report_root: impl Into<PathBuf>, report_history: usize) -> Self {
        Self {
            report_root: report_root.into(),
            capacity: report_history + 1,
        }
    }

    /// Maximum number of entries kept in the report root
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn report_root(&self) -> &Path {
        &self.report_root
    }

    /// Entries to delete, oldest first. The marker itself is never selected
    /// but occupies its slot when present.
    pub fn victims(&self) -> Result<Vec<String>> {
        let mut entries = list_entries(&self.report_root)?;
        let before = entries.len();
        entries.retain(|(name, _)| name != LATEST_MARKER);
        let keep = self.capacity - (before - entries.len()).min(1);
        if entries.len() <= keep {
            return Ok(Vec::new());
        }
        let excess = entries.len() - keep;
        entries.sort_by(|(a_name, a_mtime), (b_name, b_mtime)| {
            a_mtime.cmp(b_mtime).then_with(|| a_name.cmp(b_name))
        });
        Ok(entries
            .into_iter()
            .take(excess)
            .map(|(name, _)| name)
            .collect())
    }

    /// Prune the report root. `forget` runs for each victim before its
    /// directory is deleted.
    pub fn enforce(&self, mut forget: impl FnMut(&str)) -> Result<RetentionOutcome> {
        let entries_before = list_entries(&self.report_root)?.len();
        let victims = self.victims()?;
        let mut outcome = RetentionOutcome {
            entries_before,
            ..Default::default()
        };

        for name in victims {
            forget(&name);

            let path = self.report_root.join(&name);
            info!(dir = %path.display(), "deleting report directory");
            if let Err(e) = remove_entry(&path) {
                error!(dir = %path.display(), error = %e, "could not delete report directory");
                outcome.delete_failures += 1;
            }
            outcome.pruned.push(name);
        }

        if !outcome.pruned.is_empty() {
            debug!(
                pruned = outcome.pruned.len(),
                capacity = self.capacity,
                "retention complete"
            );
        }
        Ok(outcome)
    }
}

fn list_entries(root: &Path) -> Result<Vec<(String, SystemTime)>> {
    let read = fs::read_dir(root)
        .map_err(|e| ControllerError::io(format!("list report dir {}", root.display()), e))?;

    let mut entries = Vec::new();
    for entry in read.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        // DirEntry::metadata does not follow the marker symlink
        let mtime = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        entries.push((name, mtime));
    }
    Ok(entries)
}

fn remove_entry(path: &Path) -> std::io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Repoint the latest marker at `execution_id`. A relative symlink on unix,
/// a pointer file holding the id elsewhere.
pub fn point_latest(report_root: &Path, execution_id: &str) -> Result<()> {
    let marker = report_root.join(LATEST_MARKER);
    if fs::symlink_metadata(&marker).is_ok() {
        fs::remove_file(&marker)
            .map_err(|e| ControllerError::io(format!("delete {}", marker.display()), e))?;
    }

    #[cfg(unix)]
    let created = std::os::unix::fs::symlink(execution_id, &marker);
    #[cfg(not(unix))]
    let created = fs::write(&marker, execution_id);

    created.map_err(|e| ControllerError::io(format!("create {}", marker.display()), e))
}

/// Execution id the latest marker points to
pub fn resolve_latest(report_root: &Path) -> Option<String> {
    let marker = report_root.join(LATEST_MARKER);
    let meta = fs::symlink_metadata(&marker).ok()?;
    if meta.file_type().is_symlink() {
        let target = fs::read_link(&marker).ok()?;
        target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    } else {
        fs::read_to_string(&marker)
            .ok()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
    }
}
