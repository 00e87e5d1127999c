use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::db_join;

/// "1701" packed little-endian.
pub const FORMAT_VERSION: u32 = 0x3130_3731;
pub const PROJECT_MAGIC: u32 = 0x5250_5348;
pub const TRACK_MAGIC: u32 = 0x5254_5348;

pub const ID_HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Project,
    Track,
}

impl EntityKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityKind::Project => "project",
            EntityKind::Track => "track",
        }
    }

    pub const fn magic(self) -> u32 {
        match self {
            EntityKind::Project => PROJECT_MAGIC,
            EntityKind::Track => TRACK_MAGIC,
        }
    }

    pub const fn id_file(self) -> &'static str {
        match self {
            EntityKind::Project => "project.id",
            EntityKind::Track => "track.id",
        }
    }

    /// Schema file relative to the entity directory.
    pub const fn schema_file(self) -> &'static str {
        match self {
            EntityKind::Project => "project.prm/project.sch",
            EntityKind::Track => "track.sch",
        }
    }
}

/// The fixed binary record at the start of `project.id` / `track.id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdHeader {
    pub magic: u32,
    pub format_version: u32,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
}

impl IdHeader {
    pub fn new(kind: EntityKind, created_at: u64) -> Self {
        Self {
            magic: kind.magic(),
            format_version: FORMAT_VERSION,
            created_at,
        }
    }

    pub fn from_bytes(bytes: &[u8; ID_HEADER_LEN]) -> Self {
        let mut magic = [0u8; 4];
        let mut version = [0u8; 4];
        let mut created = [0u8; 8];
        magic.copy_from_slice(&bytes[0..4]);
        version.copy_from_slice(&bytes[4..8]);
        created.copy_from_slice(&bytes[8..16]);
        Self {
            magic: u32::from_le_bytes(magic),
            format_version: u32::from_le_bytes(version),
            created_at: u64::from_le_bytes(created),
        }
    }

    pub fn to_bytes(&self) -> [u8; ID_HEADER_LEN] {
        let mut out = [0u8; ID_HEADER_LEN];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.format_version.to_le_bytes());
        out[8..16].copy_from_slice(&self.created_at.to_le_bytes());
        out
    }

    pub fn is_valid_for(&self, kind: EntityKind) -> bool {
        self.magic == kind.magic() && self.format_version == FORMAT_VERSION
    }

    /// Creation time in microseconds, the unit parameter stores use.
    pub fn created_at_micros(&self) -> i64 {
        (self.created_at as i64).saturating_mul(1_000_000)
    }
}

/// Reads the ID header of `entity` (a `/`-relative path under `root`).
///
/// Absent, short or foreign headers all read as `None`.
pub fn read_id_header(root: &Path, entity: &str, kind: EntityKind) -> Option<IdHeader> {
    let path = db_join(root, entity).join(kind.id_file());
    let mut file = File::open(path).ok()?;
    let mut bytes = [0u8; ID_HEADER_LEN];
    file.read_exact(&mut bytes).ok()?;
    let header = IdHeader::from_bytes(&bytes);
    header.is_valid_for(kind).then_some(header)
}

/// A fresh 32 character alphanumeric identifier.
pub fn new_entity_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_constants_spell_their_tags() {
        assert_eq!(&PROJECT_MAGIC.to_le_bytes(), b"HSPR");
        assert_eq!(&TRACK_MAGIC.to_le_bytes(), b"HSTR");
        assert_eq!(&FORMAT_VERSION.to_le_bytes(), b"1701");
    }

    #[test]
    fn header_reads_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("p1")).expect("mkdir");
        let header = IdHeader::new(EntityKind::Project, 1_600_000_000);
        std::fs::write(dir.path().join("p1/project.id"), header.to_bytes()).expect("write id");

        let read = read_id_header(dir.path(), "p1", EntityKind::Project).expect("valid header");
        assert_eq!(read, header);
        assert_eq!(read.created_at_micros(), 1_600_000_000_000_000);
        assert!(read_id_header(dir.path(), "p1", EntityKind::Track).is_none());
    }

    #[test]
    fn short_or_foreign_header_is_not_an_entity() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("t1")).expect("mkdir");
        std::fs::write(dir.path().join("t1/track.id"), b"HSTR1701").expect("write short");
        assert!(read_id_header(dir.path(), "t1", EntityKind::Track).is_none());

        let wrong = IdHeader {
            magic: TRACK_MAGIC,
            format_version: 0x3030_3030,
            created_at: 0,
        };
        std::fs::write(dir.path().join("t1/track.id"), wrong.to_bytes()).expect("write wrong");
        assert!(read_id_header(dir.path(), "t1", EntityKind::Track).is_none());
    }

    #[test]
    fn entity_ids_are_32_alphanumerics() {
        let id = new_entity_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, new_entity_id());
    }
}
