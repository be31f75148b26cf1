//! Crash-safe saving of the container file.
//!
//! Saves go to a `~` sibling that is synced and then renamed over the real
//! path, so a crash mid-save leaves either the old or the new file in place.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{CalError, CalResult};

pub struct PersistenceEngine {
    path: PathBuf,
    writable: bool,
    dirty: bool,
    scheduled: bool,
    saves: u64,
}

impl PersistenceEngine {
    pub fn new(path: PathBuf, writable: bool) -> Self {
        PersistenceEngine {
            path,
            writable,
            dirty: false,
            scheduled: false,
            saves: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push("~");
        PathBuf::from(name)
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of completed writes.
    pub fn saves(&self) -> u64 {
        self.saves
    }

    /// Mark the container dirty. Returns true when the caller must schedule
    /// a save; at most one is outstanding at a time.
    pub fn mark_dirty(&mut self) -> bool {
        self.dirty = true;
        if self.scheduled {
            return false;
        }
        self.scheduled = true;
        true
    }

    /// Called by the scheduled task before saving.
    pub fn take_scheduled(&mut self) {
        self.scheduled = false;
    }

    /// Write `contents` if dirty. In read-only mode the dirty flag is
    /// cleared without touching disk.
    pub fn save_now(&mut self, contents: &str) -> CalResult<()> {
        if !self.dirty {
            return Ok(());
        }
        if !self.writable {
            self.dirty = false;
            return Ok(());
        }

        let backup = self.backup_path();
        if let Err(e) = write_synced(&backup, contents).and_then(|_| fs::rename(&backup, &self.path)) {
            let _ = fs::remove_file(&backup);
            return Err(CalError::PersistenceFailure(format!(
                "{}: {}",
                self.path.display(),
                e
            )));
        }

        self.dirty = false;
        self.saves += 1;
        tracing::debug!(path = %self.path.display(), "Saved calendar");
        Ok(())
    }
}

fn write_synced(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()
}

/// Read the container file, creating it with `initial` when absent.
/// Returns the text and whether the file is writable.
pub fn load_or_create(path: &Path, initial: impl FnOnce() -> String) -> CalResult<(String, bool)> {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = initial();
        write_synced(path, &contents)?;
        tracing::info!(path = %path.display(), "Created new calendar file");
        return Ok((contents, true));
    }

    let contents = fs::read_to_string(path)?;
    let writable = fs::OpenOptions::new().append(true).open(path).is_ok();
    if !writable {
        tracing::warn!(path = %path.display(), "Calendar file is read-only; changes will not be saved");
    }
    Ok((contents, writable))
}
