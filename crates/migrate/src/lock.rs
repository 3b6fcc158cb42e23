//! Exclusive per-network run lock.
//!
//! Two runs against the same network would race on the registry frontier, so
//! a run holds `<outdata>/locks/<network>.lock` for its whole duration.

use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use fs2::FileExt;

/// Held for as long as a run owns its network. Released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock for `network`, failing immediately if another run holds it.
    pub fn acquire(outdata: &Path, network: &str) -> Result<Self> {
        let dir = outdata.join("locks");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create lock directory {}", dir.display()))?;

        let path = dir.join(format!("{network}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;

        file.try_lock_exclusive().with_context(|| {
            format!("Another migration run holds the lock for {network} ({})", path.display())
        })?;

        tracing::debug!(network, path = %path.display(), "Run lock acquired");

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(error = %e, path = %self.path.display(), "Failed to release run lock");
        }
    }
}
