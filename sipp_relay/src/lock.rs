// Single-instance guard.
//
// The server optionally takes a lock file at startup. The file's existence is
// the whole protocol: creation uses `create_new`, so a second server pointed
// at the same path fails immediately. The guard deletes the file when it is
// dropped, which covers both graceful shutdown and early returns in `main`.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{RelayError, Result};

#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Create the lock file, failing with `AlreadyRunning` if it exists.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(RelayError::AlreadyRunning { path });
            }
            Err(e) => return Err(e.into()),
        };
        // The pid is informational; nothing reads it back.
        writeln!(file, "{}", std::process::id())?;
        tracing::debug!(path = %path.display(), "lock file acquired");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), "could not remove lock file: {e}");
        }
    }
}
