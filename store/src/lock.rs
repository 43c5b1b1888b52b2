//! The whole-program mutation lock.
//!
//! A single advisory lock on `R/.lock` serializes every operation that
//! writes to `store/`, `profiles/` or `vir`. Fetching and hashing are
//! lock-free. The lock is held for the whole extent of a mutation and
//! released on drop, including on error paths.

use crate::error::Error;
use crate::layout::PandoraRoot;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use tracing::debug;

pub struct MutationLock {
    file: File,
}

impl MutationLock {
    /// Block until the exclusive lock is held.
    pub fn acquire(root: &PandoraRoot) -> Result<Self, Error> {
        let path = root.lock_path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| Error::internal(format!("unable to open {}", path.display()), e))?;

        file.lock_exclusive()
            .map_err(|e| Error::internal(format!("unable to lock {}", path.display()), e))?;
        debug!(path = %path.display(), "mutation lock acquired");

        Ok(Self { file })
    }
}

impl Drop for MutationLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
