//! Grouped `key=value` parameter store used by project and track `.prm` files.
//!
//! The on-disk layout is the classic key-file text format: `[group]` headers
//! followed by `key=value` lines. Groups and keys keep insertion order so a
//! rewritten file lists entries in the same order as its source.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::util::write_atomic;
use crate::{AppError, AppResult};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyFileError {
    #[error("line {line}: expected `[group]` or `key=value`, found {content:?}")]
    InvalidLine { line: usize, content: String },
    #[error("line {line}: key/value pair outside of any group")]
    KeyOutsideGroup { line: usize },
    #[error("invalid escape sequence in {value:?}")]
    InvalidEscape { value: String },
    #[error("group {group:?} not found")]
    GroupNotFound { group: String },
    #[error("key {key:?} not found in group {group:?}")]
    KeyNotFound { group: String, key: String },
    #[error("value {value:?} of {group}:{key} is not a valid {expected}")]
    InvalidValue {
        group: String,
        key: String,
        value: String,
        expected: &'static str,
    },
}

impl KeyFileError {
    pub fn code(&self) -> &'static str {
        match self {
            KeyFileError::GroupNotFound { .. } | KeyFileError::KeyNotFound { .. } => {
                "PARAMS/MISSING_KEY"
            }
            _ => "PARAMS/PARSE",
        }
    }
}

impl From<KeyFileError> for AppError {
    fn from(err: KeyFileError) -> Self {
        AppError::new(err.code(), err.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Group {
    name: String,
    entries: Vec<(String, String)>,
}

impl Group {
    fn raw(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// In-memory parameter document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyFile {
    groups: Vec<Group>,
}

impl KeyFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(data: &str) -> Result<Self, KeyFileError> {
        let mut file = KeyFile::new();
        let mut current: Option<usize> = None;

        for (idx, raw_line) in data.lines().enumerate() {
            let line = raw_line.trim_start();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') {
                let trimmed = line.trim_end();
                if !trimmed.ends_with(']') || trimmed.len() < 3 {
                    return Err(KeyFileError::InvalidLine {
                        line: idx + 1,
                        content: raw_line.to_string(),
                    });
                }
                let name = &trimmed[1..trimmed.len() - 1];
                current = Some(file.group_index_or_insert(name));
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(KeyFileError::InvalidLine {
                    line: idx + 1,
                    content: raw_line.to_string(),
                });
            };
            let key = key.trim_end();
            if key.is_empty() {
                return Err(KeyFileError::InvalidLine {
                    line: idx + 1,
                    content: raw_line.to_string(),
                });
            }
            let Some(group_idx) = current else {
                return Err(KeyFileError::KeyOutsideGroup { line: idx + 1 });
            };
            let value = value.trim_start_matches([' ', '\t']);
            file.put_raw(group_idx, key, value.to_string());
        }

        Ok(file)
    }

    pub fn load(path: &Path) -> AppResult<Self> {
        let data = fs::read_to_string(path).map_err(|err| AppError::io(err, "keyfile_load", path))?;
        KeyFile::parse(&data).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "keyfile_parse")
                .with_context("path", path.display().to_string())
        })
    }

    /// Loads `path`, returning `None` when the file does not exist.
    pub fn load_optional(path: &Path) -> AppResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        KeyFile::load(path).map(Some)
    }

    pub fn save(&self, path: &Path) -> AppResult<()> {
        write_atomic(path, self.to_data().as_bytes())
    }

    pub fn to_data(&self) -> String {
        let mut out = String::new();
        for (idx, group) in self.groups.iter().enumerate() {
            if idx > 0 {
                out.push('\n');
            }
            out.push('[');
            out.push_str(&group.name);
            out.push_str("]\n");
            for (key, value) in &group.entries {
                out.push_str(key);
                out.push('=');
                out.push_str(value);
                out.push('\n');
            }
        }
        out
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|g| g.name.as_str())
    }

    pub fn keys(&self, group: &str) -> Vec<&str> {
        self.group(group)
            .map(|g| g.entries.iter().map(|(k, _)| k.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.group(group).is_some()
    }

    pub fn has_key(&self, group: &str, key: &str) -> bool {
        self.group(group).and_then(|g| g.raw(key)).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// The stored, still escaped, value.
    pub fn value(&self, group: &str, key: &str) -> Result<&str, KeyFileError> {
        let g = self.group(group).ok_or_else(|| KeyFileError::GroupNotFound {
            group: group.to_string(),
        })?;
        g.raw(key).ok_or_else(|| KeyFileError::KeyNotFound {
            group: group.to_string(),
            key: key.to_string(),
        })
    }

    pub fn string(&self, group: &str, key: &str) -> Result<String, KeyFileError> {
        unescape(self.value(group, key)?)
    }

    pub fn int64(&self, group: &str, key: &str) -> Result<i64, KeyFileError> {
        self.parse_number(group, key, "int64")
    }

    pub fn integer(&self, group: &str, key: &str) -> Result<i32, KeyFileError> {
        self.parse_number(group, key, "integer")
    }

    pub fn double(&self, group: &str, key: &str) -> Result<f64, KeyFileError> {
        self.parse_number(group, key, "double")
    }

    fn parse_number<T: std::str::FromStr>(
        &self,
        group: &str,
        key: &str,
        expected: &'static str,
    ) -> Result<T, KeyFileError> {
        let raw = self.value(group, key)?;
        raw.trim().parse::<T>().map_err(|_| KeyFileError::InvalidValue {
            group: group.to_string(),
            key: key.to_string(),
            value: raw.to_string(),
            expected,
        })
    }

    pub fn set_value(&mut self, group: &str, key: &str, raw: impl Into<String>) {
        let idx = self.group_index_or_insert(group);
        self.put_raw(idx, key, raw.into());
    }

    pub fn set_string(&mut self, group: &str, key: &str, value: &str) {
        self.set_value(group, key, escape(value));
    }

    pub fn set_int64(&mut self, group: &str, key: &str, value: i64) {
        self.set_value(group, key, value.to_string());
    }

    pub fn set_integer(&mut self, group: &str, key: &str, value: i32) {
        self.set_value(group, key, value.to_string());
    }

    pub fn set_double(&mut self, group: &str, key: &str, value: f64) {
        self.set_value(group, key, value.to_string());
    }

    fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    fn group_index_or_insert(&mut self, name: &str) -> usize {
        if let Some(idx) = self.groups.iter().position(|g| g.name == name) {
            return idx;
        }
        self.groups.push(Group {
            name: name.to_string(),
            entries: Vec::new(),
        });
        self.groups.len() - 1
    }

    fn put_raw(&mut self, group_idx: usize, key: &str, raw: String) {
        let entries = &mut self.groups[group_idx].entries;
        match entries.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = raw,
            None => entries.push((key.to_string(), raw)),
        }
    }
}

/// Escapes a string for storage; a leading space is kept as `\s`.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (idx, ch) in value.chars().enumerate() {
        match ch {
            ' ' if idx == 0 => out.push_str("\\s"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out
}

pub fn unescape(raw: &str) -> Result<String, KeyFileError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('s') => out.push(' '),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            _ => {
                return Err(KeyFileError::InvalidEscape {
                    value: raw.to_string(),
                })
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SAMPLE: &str = "# comment\n[track]\nschema-id=track\n/id=abc\n\n[ss-port-raw]\nschema-id=raw\n/data/rate=52083.33\n";

    #[test]
    fn parses_groups_and_keys_in_order() {
        let file = KeyFile::parse(SAMPLE).expect("parse sample");
        let groups: Vec<_> = file.groups().collect();
        assert_eq!(groups, vec!["track", "ss-port-raw"]);
        assert_eq!(file.keys("track"), vec!["schema-id", "/id"]);
        assert_eq!(file.string("track", "/id").expect("id"), "abc");
        assert!((file.double("ss-port-raw", "/data/rate").expect("rate") - 52083.33).abs() < 1e-9);
    }

    #[test]
    fn writes_back_without_comments() {
        let file = KeyFile::parse(SAMPLE).expect("parse sample");
        assert_eq!(
            file.to_data(),
            "[track]\nschema-id=track\n/id=abc\n\n[ss-port-raw]\nschema-id=raw\n/data/rate=52083.33\n"
        );
    }

    #[test]
    fn rejects_key_outside_group() {
        let err = KeyFile::parse("a=b\n").unwrap_err();
        assert_eq!(err, KeyFileError::KeyOutsideGroup { line: 1 });
        assert_eq!(AppError::from(err).code(), "PARAMS/PARSE");
    }

    #[test]
    fn rejects_garbage_line() {
        let err = KeyFile::parse("[g]\nnot a pair\n").unwrap_err();
        assert!(matches!(err, KeyFileError::InvalidLine { line: 2, .. }));
    }

    #[test]
    fn typed_accessors_report_bad_values() {
        let file = KeyFile::parse("[m]\n/source=ss-port\n").expect("parse");
        let err = file.integer("m", "/source").unwrap_err();
        assert!(matches!(err, KeyFileError::InvalidValue { expected: "integer", .. }));
        let missing = file.int64("m", "/ctime").unwrap_err();
        assert_eq!(AppError::from(missing).code(), "PARAMS/MISSING_KEY");
    }

    #[test]
    fn setters_replace_in_place() {
        let mut file = KeyFile::new();
        file.set_integer("mark", "/source", 101);
        file.set_string("mark", "/name", "first");
        file.set_integer("mark", "/source", 2);
        assert_eq!(file.keys("mark"), vec!["/source", "/name"]);
        assert_eq!(file.integer("mark", "/source").expect("source"), 2);
    }

    #[test]
    fn nested_document_survives_as_string_value() {
        let inner = "[info]\n/info/hydra/drv=Hydra4\n";
        let mut file = KeyFile::new();
        file.set_string("track", "/sonar", inner);
        let reparsed = KeyFile::parse(&file.to_data()).expect("reparse");
        assert_eq!(reparsed.string("track", "/sonar").expect("sonar"), inner);
    }

    #[test]
    fn leading_space_is_preserved() {
        assert_eq!(escape("  x"), "\\s x");
        assert_eq!(unescape("\\s x").expect("unescape"), "  x");
        assert!(unescape("bad\\q").is_err());
    }

    proptest! {
        #[test]
        fn escape_is_reversible(value in "[ -~\\n\\t\\r]{0,40}") {
            prop_assert_eq!(unescape(&escape(&value)).unwrap(), value);
        }
    }
}
