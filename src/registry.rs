//! Lookup of schema fingerprints and canonical schema bytes by version tag.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::util::md5_hex;
use crate::version::{ProjectVersion, SchemaVersion, TrackVersion};
use crate::{AppError, AppResult};

pub const UNKNOWN_SCHEMA: &str = "REGISTRY/UNKNOWN_SCHEMA";
pub const FINGERPRINT_MISMATCH: &str = "REGISTRY/FINGERPRINT_MISMATCH";

pub trait SchemaRegistry: Send + Sync {
    /// Lowercase hex MD5 the schema file of `tag` carries on disk.
    fn fingerprint(&self, tag: &str) -> Option<String>;

    /// Canonical schema bytes for `tag`.
    fn schema(&self, tag: &str) -> AppResult<Vec<u8>>;
}

fn builtin_fingerprint(tag: &str) -> Option<&'static str> {
    if let Some(version) = TrackVersion::from_tag(tag) {
        return version.builtin_fingerprint();
    }
    ProjectVersion::from_tag(tag).and_then(|v| v.builtin_fingerprint())
}

/// The shipped fingerprint table, with schema bytes read from `<dir>/<fingerprint>.sch`.
#[derive(Debug, Clone, Default)]
pub struct BuiltinRegistry {
    schema_dir: Option<PathBuf>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            schema_dir: Some(dir.into()),
        }
    }

    pub fn schema_dir(&self) -> Option<&Path> {
        self.schema_dir.as_deref()
    }
}

impl SchemaRegistry for BuiltinRegistry {
    fn fingerprint(&self, tag: &str) -> Option<String> {
        builtin_fingerprint(tag).map(str::to_string)
    }

    fn schema(&self, tag: &str) -> AppResult<Vec<u8>> {
        let fingerprint = builtin_fingerprint(tag).ok_or_else(|| {
            AppError::new(UNKNOWN_SCHEMA, "No schema is registered for this version.")
                .with_context("tag", tag.to_string())
        })?;
        let dir = self.schema_dir.as_ref().ok_or_else(|| {
            AppError::new(
                UNKNOWN_SCHEMA,
                "No schema directory configured; set DBFIX_SCHEMA_DIR or pass --schemas.",
            )
            .with_context("tag", tag.to_string())
        })?;
        let path = dir.join(format!("{fingerprint}.sch"));
        let bytes = fs::read(&path).map_err(|err| {
            AppError::io(err, "registry_read_schema", &path).with_context("tag", tag.to_string())
        })?;
        let actual = md5_hex(&bytes);
        if actual != fingerprint {
            return Err(AppError::new(
                FINGERPRINT_MISMATCH,
                "Schema file content does not match its fingerprint.",
            )
            .with_context("tag", tag.to_string())
            .with_context("path", path.display().to_string())
            .with_context("expected", fingerprint.to_string())
            .with_context("actual", actual));
        }
        Ok(bytes)
    }
}

/// Registry backed by in-memory schema bytes; fingerprints are their MD5.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    schemas: HashMap<String, Vec<u8>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: &str, bytes: impl Into<Vec<u8>>) {
        self.schemas.insert(tag.to_ascii_uppercase(), bytes.into());
    }

    pub fn with(mut self, tag: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(tag, bytes);
        self
    }
}

impl SchemaRegistry for InMemoryRegistry {
    fn fingerprint(&self, tag: &str) -> Option<String> {
        self.schemas
            .get(&tag.to_ascii_uppercase())
            .map(|bytes| md5_hex(bytes))
    }

    fn schema(&self, tag: &str) -> AppResult<Vec<u8>> {
        self.schemas
            .get(&tag.to_ascii_uppercase())
            .cloned()
            .ok_or_else(|| {
                AppError::new(UNKNOWN_SCHEMA, "No schema is registered for this version.")
                    .with_context("tag", tag.to_string())
            })
    }
}
