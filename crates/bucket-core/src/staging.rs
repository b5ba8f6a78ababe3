//! Staged outputs: build next to the target, swap in on success.
//!
//! The staging path is removed when a [`StagedOutput`] is dropped without
//! being committed, so a failed merge never leaves a partial artifact behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

#[derive(Debug)]
pub struct StagedOutput {
    target: PathBuf,
    staging: PathBuf,
    committed: bool,
}

impl StagedOutput {
    /// Reserve a staging path beside `target`, clearing any stale leftover.
    pub fn new(target: &Path) -> io::Result<Self> {
        let name = target
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "output has no file name"))?
            .to_string_lossy()
            .into_owned();
        let parent = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;
        let staging = parent.join(format!(".{name}.partial"));
        remove_path(&staging)?;
        debug!(?target, ?staging, "output staged");
        Ok(Self {
            target: target.to_path_buf(),
            staging,
            committed: false,
        })
    }

    /// Where the output is being built.
    pub fn path(&self) -> &Path {
        &self.staging
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Replace the target with the staged output.
    pub fn commit(mut self) -> io::Result<PathBuf> {
        remove_path(&self.target)?;
        fs::rename(&self.staging, &self.target)?;
        self.committed = true;
        debug!(target = ?self.target, "output committed");
        Ok(self.target.clone())
    }
}

impl Drop for StagedOutput {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = remove_path(&self.staging) {
            warn!(staging = ?self.staging, error = %e, "failed to discard staged output");
        }
    }
}

/// Remove a file or directory tree; missing paths are fine.
pub fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
