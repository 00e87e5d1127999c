use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::{AppError, AppResult};

pub const LOCK_FILE: &str = "dbfix.lock";
pub const LOCK_BUSY: &str = "LOCK/BUSY";

/// Exclusive advisory lock on a database root, released on drop.
#[derive(Debug)]
pub struct DbLock {
    file: File,
    path: PathBuf,
}

impl DbLock {
    pub fn acquire(root: &Path) -> AppResult<Self> {
        let path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| AppError::io(err, "db_lock_open", &path))?;

        if let Err(err) = file.try_lock_exclusive() {
            let busy = err.kind() == ErrorKind::WouldBlock
                || err.raw_os_error() == fs2::lock_contended_error().raw_os_error();
            if busy {
                return Err(AppError::new(
                    LOCK_BUSY,
                    "Database is being updated by another process.",
                )
                .with_context("path", path.display().to_string()));
            }
            return Err(AppError::io(err, "db_lock_acquire", &path));
        }

        tracing::debug!(target: "dbfix", event = "db_lock_acquired", path = %path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DbLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
        if let Err(err) = self.file.unlock() {
            tracing::warn!(
                target: "dbfix",
                event = "db_lock_release_failed",
                path = %self.path.display(),
                error = %err,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_busy_until_release() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = DbLock::acquire(dir.path()).expect("first lock");
        let err = DbLock::acquire(dir.path()).unwrap_err();
        assert_eq!(err.code(), LOCK_BUSY);

        drop(first);
        assert!(!dir.path().join(LOCK_FILE).exists());
        let again = DbLock::acquire(dir.path()).expect("lock after release");
        assert_eq!(again.path(), dir.path().join(LOCK_FILE));
    }
}
