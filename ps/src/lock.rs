//! Exclusive run lock
//!
//! Only one automation run may drive a store at a time. The lock is an
//! advisory `flock` on `{store_dir}/run.lock`, released on drop or process exit.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

pub const LOCK_FILE: &str = "run.lock";

/// Held for the lifetime of a run
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Try to take the lock without blocking
    pub fn acquire(store_dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = store_dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE);
        debug!(?path, "RunLock::acquire: called");

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            debug!(?path, "RunLock::acquire: lock held elsewhere");
            return Err(StoreError::Locked(dir.to_path_buf()));
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.sync_all()?;

        info!(?path, "Run lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(error = %e, path = ?self.path, "RunLock::drop: unlock failed");
        }
    }
}
