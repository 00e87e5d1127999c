//! Write-ahead backup and cleanup journal kept at the database root.
//!
//! Every file a step rewrites is first copied to `<path>.bak` and recorded
//! in `update.backup` together with the MD5 of its bytes. Files that must
//! disappear once the step is committed are listed in `update.cleanup`.
//! `cleanup()` commits by deleting the backup index first, so a crash at
//! any point leaves either a revertible journal or a cleanup that the next
//! `revert()` simply finishes.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::registry::SchemaRegistry;
use crate::util::{db_join, md5_hex, write_atomic};
use crate::{AppError, AppResult};

pub const BACKUP_INDEX: &str = "update.backup";
pub const CLEANUP_INDEX: &str = "update.cleanup";
pub const AUDIT_LOG: &str = "update.log";
const SHADOW_SUFFIX: &str = ".bak";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub path: String,
    pub md5: String,
}

#[derive(Clone)]
pub struct Journal {
    root: PathBuf,
    registry: Arc<dyn SchemaRegistry>,
}

impl Journal {
    pub fn new(root: impl Into<PathBuf>, registry: Arc<dyn SchemaRegistry>) -> Self {
        Self {
            root: root.into(),
            registry,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry(&self) -> &dyn SchemaRegistry {
        self.registry.as_ref()
    }

    /// Absolute path of a `/`-separated database path.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        db_join(&self.root, relative)
    }

    pub fn backup_index_path(&self) -> PathBuf {
        self.root.join(BACKUP_INDEX)
    }

    pub fn cleanup_index_path(&self) -> PathBuf {
        self.root.join(CLEANUP_INDEX)
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.root.join(AUDIT_LOG)
    }

    /// True while uncommitted work is recorded.
    pub fn is_dirty(&self) -> bool {
        self.backup_index_path().exists() || self.cleanup_index_path().exists()
    }

    /// Shadows `path` before it is rewritten.
    pub fn backup(&self, path: &str, must_exist: bool) -> AppResult<()> {
        let source = self.resolve(path);
        let bytes = match fs::read(&source) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound && !must_exist => return Ok(()),
            Err(err) => return Err(AppError::io(err, "journal_backup_read", &source)),
        };

        let shadow_rel = format!("{path}{SHADOW_SUFFIX}");
        write_atomic(&self.resolve(&shadow_rel), &bytes)?;

        let md5 = md5_hex(&bytes);
        self.append(&self.backup_index_path(), &format!("{path}: {md5}\n"))?;
        self.append(&self.cleanup_index_path(), &format!("{shadow_rel}\n"))?;
        tracing::debug!(target: "dbfix", event = "journal_backup", path = %path, md5 = %md5);
        self.append_log(&format!("backup file {path}"))
    }

    /// Copies `src` to `dst` and queues `src` for removal on commit.
    pub fn copy(&self, src: &str, dst: &str, must_exist: bool) -> AppResult<()> {
        let from = self.resolve(src);
        let to = self.resolve(dst);
        match fs::copy(&from, &to) {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound && !from.exists() => {
                if must_exist {
                    return Err(AppError::io(err, "journal_copy", &from)
                        .with_context("to", to.display().to_string()));
                }
                return Ok(());
            }
            Err(err) => {
                return Err(AppError::io(err, "journal_copy", &from)
                    .with_context("to", to.display().to_string()))
            }
        }

        self.append(&self.cleanup_index_path(), &format!("{src}\n"))?;
        tracing::debug!(target: "dbfix", event = "journal_copy", from = %src, to = %dst);
        self.append_log(&format!("copy file {src}"))
    }

    pub fn mark_remove(&self, path: &str) -> AppResult<()> {
        self.append(&self.cleanup_index_path(), &format!("{path}\n"))
    }

    /// Replaces the schema file at `path` with the canonical bytes of `tag`.
    pub fn write_schema(&self, path: &str, tag: &str) -> AppResult<()> {
        let bytes = self.registry.schema(tag)?;
        self.backup(path, true)?;
        write_atomic(&self.resolve(path), &bytes)?;
        tracing::debug!(target: "dbfix", event = "journal_write_schema", path = %path, tag = %tag);
        Ok(())
    }

    pub fn append_log(&self, message: &str) -> AppResult<()> {
        let mut line = message.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        self.append(&self.audit_log_path(), &line)
    }

    /// Commits the current step.
    pub fn cleanup(&self) -> AppResult<()> {
        remove_if_present(&self.backup_index_path(), "journal_cleanup_backup_index")?;
        remove_if_present(&self.audit_log_path(), "journal_cleanup_audit_log")?;

        let index = self.cleanup_index_path();
        let Some(entries) = read_index(&index)? else {
            return Ok(());
        };
        for entry in &entries {
            remove_if_present(&self.resolve(entry), "journal_cleanup_entry")?;
        }
        remove_if_present(&index, "journal_cleanup_index")?;

        if !entries.is_empty() {
            tracing::debug!(target: "dbfix", event = "journal_cleanup", removed = entries.len());
        }
        Ok(())
    }

    /// Restores every backed-up file and discards the uncommitted step.
    ///
    /// Without a backup index this finishes an interrupted `cleanup()`.
    /// Shadows are all verified before the first restore, so a failure
    /// leaves both the database and the journal untouched.
    pub fn revert(&self) -> AppResult<()> {
        let index = self.backup_index_path();
        let Some(lines) = read_index(&index)? else {
            return self.cleanup();
        };

        let entries = lines
            .iter()
            .map(|line| parse_backup_line(line, &index))
            .collect::<AppResult<Vec<_>>>()?;

        let mut restores = Vec::with_capacity(entries.len());
        for entry in &entries {
            let shadow = self.resolve(&format!("{}{SHADOW_SUFFIX}", entry.path));
            let bytes = fs::read(&shadow).map_err(|err| {
                let missing = err.kind() == ErrorKind::NotFound;
                let mut app = AppError::io(err, "journal_revert_read_shadow", &shadow);
                if missing {
                    app = AppError::new(AppError::BACKUP_MISSING, "Backup copy is missing.")
                        .with_context("path", shadow.display().to_string())
                        .with_cause(app);
                }
                app
            })?;
            let actual = md5_hex(&bytes);
            if actual != entry.md5 {
                return Err(AppError::new(
                    AppError::CHECKSUM_MISMATCH,
                    "Backup copy does not match its recorded checksum.",
                )
                .with_context("path", entry.path.clone())
                .with_context("expected", entry.md5.clone())
                .with_context("actual", actual));
            }
            restores.push((self.resolve(&entry.path), bytes));
        }

        for (path, bytes) in &restores {
            write_atomic(path, bytes)?;
        }

        self.discard(&entries)?;
        tracing::info!(
            target: "dbfix",
            event = "journal_reverted",
            root = %self.root.display(),
            restored = entries.len(),
        );
        Ok(())
    }

    /// Drops the journal after a restore without deleting queued originals.
    fn discard(&self, entries: &[BackupEntry]) -> AppResult<()> {
        let cleanup_index = self.cleanup_index_path();
        let queued = read_index(&cleanup_index)?.unwrap_or_default();

        remove_if_present(&self.backup_index_path(), "journal_discard_backup_index")?;
        remove_if_present(&self.audit_log_path(), "journal_discard_audit_log")?;
        for entry in entries {
            let shadow = self.resolve(&format!("{}{SHADOW_SUFFIX}", entry.path));
            remove_if_present(&shadow, "journal_discard_shadow")?;
        }
        for path in queued.iter().filter(|p| p.ends_with(SHADOW_SUFFIX)) {
            remove_if_present(&self.resolve(path), "journal_discard_shadow")?;
        }
        remove_if_present(&cleanup_index, "journal_discard_cleanup_index")
    }

    fn append(&self, path: &Path, text: &str) -> AppResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| AppError::io(err, "journal_append_open", path))?;
        file.write_all(text.as_bytes())
            .map_err(|err| AppError::io(err, "journal_append_write", path))?;
        file.sync_data()
            .map_err(|err| AppError::io(err, "journal_append_sync", path))?;
        Ok(())
    }
}

fn remove_if_present(path: &Path, operation: &str) -> AppResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::io(err, operation, path)),
    }
}

/// Complete lines of an index file, `None` when the file is absent.
///
/// A trailing line without its newline is a torn append; the write it
/// guarded never started, so it is skipped.
fn read_index(path: &Path) -> AppResult<Option<Vec<String>>> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(AppError::io(err, "journal_read_index", path)),
    };
    let mut parts: Vec<&str> = data.split('\n').collect();
    if let Some(torn) = parts.pop() {
        if !torn.is_empty() {
            tracing::warn!(
                target: "dbfix",
                event = "journal_torn_entry",
                path = %path.display(),
                entry = %torn,
            );
        }
    }
    Ok(Some(
        parts
            .into_iter()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
    ))
}

fn parse_backup_line(line: &str, index: &Path) -> AppResult<BackupEntry> {
    match line.split_once(": ") {
        Some((path, md5)) if !path.is_empty() && !md5.is_empty() => Ok(BackupEntry {
            path: path.to_string(),
            md5: md5.to_string(),
        }),
        _ => Err(
            AppError::new(AppError::MALFORMED_INDEX, "Backup index entry is malformed.")
                .with_context("path", index.display().to_string())
                .with_context("entry", line.to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;

    fn journal(root: &Path) -> Journal {
        let registry = InMemoryRegistry::new().with("19A285F3", b"schema-19".to_vec());
        Journal::new(root, Arc::new(registry))
    }

    fn seed(root: &Path, rel: &str, bytes: &[u8]) {
        let path = db_join(root, rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, bytes).expect("seed file");
    }

    #[test]
    fn backup_records_shadow_and_indexes() {
        let dir = tempfile::tempdir().expect("tempdir");
        seed(dir.path(), "p1/t1/track.prm", b"original");
        let journal = journal(dir.path());

        journal.backup("p1/t1/track.prm", true).expect("backup");

        assert_eq!(
            fs::read(dir.path().join("p1/t1/track.prm.bak")).expect("shadow"),
            b"original"
        );
        let backup = fs::read_to_string(journal.backup_index_path()).expect("backup index");
        assert_eq!(backup, format!("p1/t1/track.prm: {}\n", md5_hex(b"original")));
        let cleanup = fs::read_to_string(journal.cleanup_index_path()).expect("cleanup index");
        assert_eq!(cleanup, "p1/t1/track.prm.bak\n");
        let log = fs::read_to_string(journal.audit_log_path()).expect("audit log");
        assert_eq!(log, "backup file p1/t1/track.prm\n");
    }

    #[test]
    fn backup_of_absent_file_depends_on_must_exist() {
        let dir = tempfile::tempdir().expect("tempdir");
        let journal = journal(dir.path());
        journal.backup("p1/project.prm/planner.prm", false).expect("optional backup");
        assert!(!journal.is_dirty());
        let err = journal.backup("p1/project.prm/planner.prm", true).unwrap_err();
        assert_eq!(err.code(), "IO/NotFound");
    }

    #[test]
    fn copy_queues_source_for_removal() {
        let dir = tempfile::tempdir().expect("tempdir");
        seed(dir.path(), "p1/t1/ss-port-raw.000000.i", b"idx");
        let journal = journal(dir.path());

        journal
            .copy("p1/t1/ss-port-raw.000000.i", "p1/t1/ss-port.000000.i", true)
            .expect("copy");
        assert_eq!(fs::read(dir.path().join("p1/t1/ss-port.000000.i")).expect("dst"), b"idx");

        journal.cleanup().expect("cleanup");
        assert!(!dir.path().join("p1/t1/ss-port-raw.000000.i").exists());
        assert!(dir.path().join("p1/t1/ss-port.000000.i").exists());
        assert!(!journal.is_dirty());
        assert!(!journal.audit_log_path().exists());
    }

    #[test]
    fn copy_of_missing_optional_source_is_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("p1/project.prm")).expect("mkdir");
        let journal = journal(dir.path());
        journal
            .copy(
                "p1/project.prm/waterfall-marks.prm",
                "p1/project.prm/waterfall-mark.prm",
                false,
            )
            .expect("optional copy");
        assert!(!journal.is_dirty());
        assert!(journal
            .copy("p1/project.prm/waterfall-marks.prm", "p1/project.prm/x.prm", true)
            .is_err());
    }

    #[test]
    fn cleanup_tolerates_already_removed_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let journal = journal(dir.path());
        journal.mark_remove("p1/t1/gone.000000.i").expect("mark");
        journal.cleanup().expect("cleanup of absent file");
        assert!(!journal.cleanup_index_path().exists());
    }

    #[test]
    fn write_schema_backs_up_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        seed(dir.path(), "p1/t1/track.sch", b"schema-2f");
        let journal = journal(dir.path());

        journal.write_schema("p1/t1/track.sch", "19A285F3").expect("write schema");
        assert_eq!(fs::read(dir.path().join("p1/t1/track.sch")).expect("schema"), b"schema-19");
        assert_eq!(
            fs::read(dir.path().join("p1/t1/track.sch.bak")).expect("shadow"),
            b"schema-2f"
        );

        let err = journal.write_schema("p1/t1/track.sch", "9726336A").unwrap_err();
        assert_eq!(err.code(), "REGISTRY/UNKNOWN_SCHEMA");
    }

    #[test]
    fn revert_restores_and_keeps_queued_originals() {
        let dir = tempfile::tempdir().expect("tempdir");
        seed(dir.path(), "p1/t1/track.prm", b"before");
        seed(dir.path(), "p1/t1/ss-port-raw.000000.d", b"data");
        let journal = journal(dir.path());

        journal.backup("p1/t1/track.prm", true).expect("backup");
        journal
            .copy("p1/t1/ss-port-raw.000000.d", "p1/t1/ss-port.000000.d", true)
            .expect("copy");
        fs::write(dir.path().join("p1/t1/track.prm"), b"after").expect("rewrite");

        journal.revert().expect("revert");

        assert_eq!(fs::read(dir.path().join("p1/t1/track.prm")).expect("restored"), b"before");
        assert!(dir.path().join("p1/t1/ss-port-raw.000000.d").exists());
        assert!(!dir.path().join("p1/t1/track.prm.bak").exists());
        assert!(!journal.is_dirty());
        assert!(!journal.audit_log_path().exists());
    }

    #[test]
    fn revert_refuses_corrupted_shadow() {
        let dir = tempfile::tempdir().expect("tempdir");
        seed(dir.path(), "p1/t1/track.prm", b"before");
        let journal = journal(dir.path());
        journal.backup("p1/t1/track.prm", true).expect("backup");
        fs::write(dir.path().join("p1/t1/track.prm"), b"after").expect("rewrite");
        fs::write(dir.path().join("p1/t1/track.prm.bak"), b"corrupt").expect("corrupt shadow");

        let err = journal.revert().unwrap_err();
        assert_eq!(err.code(), AppError::CHECKSUM_MISMATCH);
        assert_eq!(fs::read(dir.path().join("p1/t1/track.prm")).expect("untouched"), b"after");
        assert!(journal.backup_index_path().exists());
        assert!(journal.cleanup_index_path().exists());
    }

    #[test]
    fn revert_without_backup_index_finishes_cleanup() {
        let dir = tempfile::tempdir().expect("tempdir");
        seed(dir.path(), "p1/t1/old.000000.i", b"x");
        let journal = journal(dir.path());
        journal.mark_remove("p1/t1/old.000000.i").expect("mark");

        journal.revert().expect("revert");
        assert!(!dir.path().join("p1/t1/old.000000.i").exists());
        assert!(!journal.is_dirty());
    }

    #[test]
    fn malformed_backup_index_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(BACKUP_INDEX), "no separator here\n").expect("write index");
        let err = journal(dir.path()).revert().unwrap_err();
        assert_eq!(err.code(), AppError::MALFORMED_INDEX);
    }

    #[test]
    fn torn_trailing_entry_is_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        seed(dir.path(), "p1/t1/track.prm", b"keep");
        fs::write(dir.path().join(CLEANUP_INDEX), "p1/t1/track.prm").expect("torn index");
        journal(dir.path()).cleanup().expect("cleanup");
        assert!(dir.path().join("p1/t1/track.prm").exists());
    }
}
