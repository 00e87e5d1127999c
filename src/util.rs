use std::any::Any;
use std::fs;
use std::io::{self, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use walkdir::WalkDir;

use crate::{AppError, AppResult};

/// Lowercase hex MD5 of `bytes`.
pub fn md5_hex(bytes: &[u8]) -> String {
    let digest = Md5::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// MD5 of a file's contents, `None` when the file cannot be read.
pub fn file_md5(path: &Path) -> Option<String> {
    fs::read(path).ok().map(|bytes| md5_hex(&bytes))
}

/// Writes `bytes` next to `path` in a temporary file, syncs it and renames it over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> AppResult<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|err| AppError::io(err, "write_atomic_create_tmp", path))?;
    tmp.write_all(bytes)
        .map_err(|err| AppError::io(err, "write_atomic_write", path))?;
    tmp.as_file()
        .sync_all()
        .map_err(|err| AppError::io(err, "write_atomic_sync", path))?;
    tmp.persist(path)
        .map_err(|err| AppError::io(err.error, "write_atomic_rename", path))?;
    Ok(())
}

/// Names of the immediate subdirectories of `path`, sorted.
pub fn list_dirs(path: &Path) -> AppResult<Vec<String>> {
    let mut names = Vec::new();
    for entry in WalkDir::new(path).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|err| {
            let io_err = err
                .into_io_error()
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "directory walk failed"));
            AppError::io(io_err, "list_dirs", path)
        })?;
        if entry.file_type().is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Joins a `/`-separated path relative to the database root.
pub fn db_join(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |acc, part| acc.join(part))
}

pub(crate) fn panic_payload(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn app_error_from_panic(payload: Box<dyn Any + Send>) -> AppError {
    let message = panic_payload(payload.as_ref());
    tracing::error!(
        target: "dbfix",
        event = "panic_caught",
        error = %message,
    );
    AppError::new("RUNTIME/PANIC", message)
}

#[allow(clippy::result_large_err)]
pub fn dispatch_with_fence<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> T,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => Ok(result),
        Err(payload) => Err(app_error_from_panic(payload)),
    }
}

#[allow(clippy::result_large_err)]
pub fn dispatch_app_result<T, F>(f: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T>,
{
    dispatch_with_fence(f)?
}
