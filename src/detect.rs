use std::path::Path;

use serde::Serialize;

use crate::entity::{read_id_header, EntityKind};
use crate::registry::SchemaRegistry;
use crate::util::{db_join, file_md5, list_dirs};
use crate::version::{ProjectVersion, SchemaVersion, TrackVersion};
use crate::AppResult;

/// Outcome of looking at an entity directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Detection<V> {
    /// No valid ID header; the directory is not this kind of entity.
    NotEntity,
    /// A real entity whose schema matches no known generation.
    Unknown { checksum: Option<String> },
    Known { version: V },
}

impl<V: SchemaVersion> Detection<V> {
    pub fn version(&self) -> Option<V> {
        match self {
            Detection::Known { version } => Some(*version),
            _ => None,
        }
    }

    pub fn is_latest(&self) -> bool {
        self.version().map(|v| v.is_latest()).unwrap_or(false)
    }

    pub fn label(&self) -> String {
        match self {
            Detection::NotEntity => "not-entity".to_string(),
            Detection::Unknown { checksum: Some(sum) } => format!("unknown ({sum})"),
            Detection::Unknown { checksum: None } => "unknown (unreadable schema)".to_string(),
            Detection::Known { version } if version.is_latest() => {
                format!("{} (latest)", version.tag())
            }
            Detection::Known { version } => version.tag().to_string(),
        }
    }
}

/// Identifies the schema generation of `entity`, a `/`-separated path under `root`.
///
/// Never touches the filesystem beyond reading the ID header and schema file.
pub fn get_version<V: SchemaVersion>(
    root: &Path,
    entity: &str,
    registry: &dyn SchemaRegistry,
) -> Detection<V> {
    let kind = V::KIND;
    if read_id_header(root, entity, kind).is_none() {
        return Detection::NotEntity;
    }

    let schema_path = db_join(root, entity).join(kind.schema_file());
    let Some(checksum) = file_md5(&schema_path) else {
        tracing::warn!(
            target: "dbfix",
            event = "schema_unreadable",
            kind = kind.as_str(),
            entity = %entity,
            path = %schema_path.display(),
        );
        return Detection::Unknown { checksum: None };
    };

    for version in V::ALL.iter().copied().filter(|v| !v.is_deprecated()) {
        if registry.fingerprint(version.tag()).as_deref() == Some(checksum.as_str()) {
            return Detection::Known { version };
        }
    }

    tracing::warn!(
        target: "dbfix",
        event = "unknown_schema_version",
        kind = kind.as_str(),
        entity = %entity,
        checksum = %checksum,
    );
    Detection::Unknown {
        checksum: Some(checksum),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackReport {
    pub name: String,
    pub detection: Detection<TrackVersion>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectReport {
    pub name: String,
    pub detection: Detection<ProjectVersion>,
    pub tracks: Vec<TrackReport>,
}

/// Read-only survey of every project and track under `root`.
pub fn scan(root: &Path, registry: &dyn SchemaRegistry) -> AppResult<Vec<ProjectReport>> {
    let mut projects = Vec::new();
    for name in list_dirs(root)? {
        let detection = get_version::<ProjectVersion>(root, &name, registry);
        if detection == Detection::NotEntity {
            continue;
        }
        let mut tracks = Vec::new();
        for track in list_dirs(&root.join(&name))? {
            let entity = format!("{name}/{track}");
            let detection = get_version::<TrackVersion>(root, &entity, registry);
            if detection != Detection::NotEntity {
                tracks.push(TrackReport {
                    name: track,
                    detection,
                });
            }
        }
        projects.push(ProjectReport {
            name,
            detection,
            tracks,
        });
    }
    Ok(projects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::IdHeader;
    use crate::registry::InMemoryRegistry;
    use std::fs;

    fn registry() -> InMemoryRegistry {
        InMemoryRegistry::new()
            .with("2F9C8A44", b"track-a".to_vec())
            .with("19A285F3", b"track-b".to_vec())
            .with("9726336A", b"track-c".to_vec())
    }

    fn make_track(root: &Path, schema: &[u8]) {
        let dir = root.join("p1").join("t1");
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(
            dir.join("track.id"),
            IdHeader::new(EntityKind::Track, 10).to_bytes(),
        )
        .expect("write id");
        fs::write(dir.join("track.sch"), schema).expect("write schema");
    }

    #[test]
    fn detects_known_generation() {
        let dir = tempfile::tempdir().expect("tempdir");
        make_track(dir.path(), b"track-b");
        let detection = get_version::<TrackVersion>(dir.path(), "p1/t1", &registry());
        assert_eq!(
            detection,
            Detection::Known {
                version: TrackVersion::V19a285f3
            }
        );
        assert!(!detection.is_latest());
    }

    #[test]
    fn unmatched_schema_is_unknown_with_checksum() {
        let dir = tempfile::tempdir().expect("tempdir");
        make_track(dir.path(), b"something else");
        let detection = get_version::<TrackVersion>(dir.path(), "p1/t1", &registry());
        match detection {
            Detection::Unknown { checksum: Some(sum) } => assert_eq!(sum.len(), 32),
            other => panic!("unexpected detection {other:?}"),
        }
    }

    #[test]
    fn missing_schema_is_unknown_without_checksum() {
        let dir = tempfile::tempdir().expect("tempdir");
        make_track(dir.path(), b"track-a");
        fs::remove_file(dir.path().join("p1/t1/track.sch")).expect("remove schema");
        let detection = get_version::<TrackVersion>(dir.path(), "p1/t1", &registry());
        assert_eq!(detection, Detection::Unknown { checksum: None });
    }

    #[test]
    fn directory_without_header_is_not_entity() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("p1/t1")).expect("mkdir");
        let detection = get_version::<TrackVersion>(dir.path(), "p1/t1", &registry());
        assert_eq!(detection, Detection::NotEntity);
    }

    #[test]
    fn labels_mark_latest() {
        let latest: Detection<TrackVersion> = Detection::Known {
            version: TrackVersion::LATEST,
        };
        assert_eq!(latest.label(), "9726336A (latest)");
        assert_eq!(Detection::<TrackVersion>::NotEntity.label(), "not-entity");
    }
}
