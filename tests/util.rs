#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dbfix_lib::entity::{EntityKind, IdHeader};
use dbfix_lib::registry::{InMemoryRegistry, SchemaRegistry};
use dbfix_lib::util::{db_join, md5_hex};
use dbfix_lib::version::{ProjectVersion, SchemaVersion, TrackVersion};
use walkdir::WalkDir;

/// Creation time written into fixture ID headers, in seconds.
pub const CREATED_AT: u64 = 1_500_000_000;

/// Legacy track parameters with one channel of every convertible kind
/// plus an unmapped channel that the first step drops.
pub const LEGACY_TRACK_PRM: &str = "\
[track]
schema-id=track
/id=0123456789abcdef0123456789abcdef
/type=survey
/sonar=<schema><key id=\"gain\" access=\"readonly\"/></schema>

[ss-port-raw]
schema-id=raw
/data/type=complex-adc14le
/data/rate=52083
/antenna/frequency=240000
/antenna/bandwidth=20000
/position/x=1.5
/position/psi=0.25

[ss-port-raw-signal]
schema-id=signal
/data/type=complex-float
/data/rate=52083

[ss-starboard-raw-tvg]
schema-id=tvg
/data/type=float
/data/rate=68681

[nmea]
schema-id=sensor
/position/z=-2
/position/gamma=0.5

[ss-port-raw-acoustic]
schema-id=acoustic
/data/type=float
";

pub const LATEST_TRACK_PRM: &str = "\
[track]
schema-id=track
/id=fedcba9876543210fedcba9876543210
";

/// Deterministic schema bytes for a version tag.
pub fn schema_bytes(kind: EntityKind, tag: &str) -> Vec<u8> {
    format!("# {} schema {}\n<schemalist/>\n", kind.as_str(), tag).into_bytes()
}

/// Registry knowing every non-deprecated tag of both kinds.
pub fn registry() -> InMemoryRegistry {
    let mut registry = InMemoryRegistry::new();
    for version in TrackVersion::ALL {
        registry.insert(version.tag(), schema_bytes(EntityKind::Track, version.tag()));
    }
    for version in ProjectVersion::ALL.iter().filter(|v| !v.is_deprecated()) {
        registry.insert(version.tag(), schema_bytes(EntityKind::Project, version.tag()));
    }
    registry
}

pub fn shared_registry() -> Arc<dyn SchemaRegistry> {
    Arc::new(registry())
}

pub fn write_file(root: &Path, rel: &str, bytes: impl AsRef<[u8]>) -> PathBuf {
    let path = db_join(root, rel);
    fs::create_dir_all(path.parent().expect("fixture path has a parent")).expect("create dirs");
    fs::write(&path, bytes).expect("write fixture file");
    path
}

pub fn read_string(root: &Path, rel: &str) -> String {
    fs::read_to_string(db_join(root, rel)).unwrap_or_else(|err| panic!("read {rel}: {err}"))
}

pub fn exists(root: &Path, rel: &str) -> bool {
    db_join(root, rel).exists()
}

pub fn write_id(root: &Path, entity: &str, kind: EntityKind) {
    let header = IdHeader::new(kind, CREATED_AT);
    write_file(root, &format!("{entity}/{}", kind.id_file()), header.to_bytes());
}

pub fn make_project(root: &Path, name: &str, version: ProjectVersion) {
    write_id(root, name, EntityKind::Project);
    write_file(
        root,
        &format!("{name}/{}", EntityKind::Project.schema_file()),
        schema_bytes(EntityKind::Project, version.tag()),
    );
}

pub fn make_track(root: &Path, project: &str, track: &str, version: TrackVersion, prm: &str) {
    let entity = format!("{project}/{track}");
    write_id(root, &entity, EntityKind::Track);
    write_file(
        root,
        &format!("{entity}/{}", EntityKind::Track.schema_file()),
        schema_bytes(EntityKind::Track, version.tag()),
    );
    write_file(root, &format!("{entity}/track.prm"), prm);
}

/// Writes `count` index/data segment pairs of `channel`.
pub fn write_segments(root: &Path, entity: &str, channel: &str, count: u32) {
    for index in 0..count {
        for ext in ['i', 'd'] {
            write_file(
                root,
                &format!("{entity}/{channel}.{index:06}.{ext}"),
                format!("{channel}:{index}:{ext}"),
            );
        }
    }
}

/// A legacy track carrying segments for every channel of [`LEGACY_TRACK_PRM`].
pub fn make_legacy_track(root: &Path, project: &str, track: &str) {
    make_track(root, project, track, TrackVersion::V2f9c8a44, LEGACY_TRACK_PRM);
    let entity = format!("{project}/{track}");
    write_segments(root, &entity, "ss-port-raw", 2);
    write_segments(root, &entity, "ss-port-raw-signal", 1);
    write_segments(root, &entity, "ss-starboard-raw-tvg", 1);
    write_segments(root, &entity, "nmea", 1);
    write_segments(root, &entity, "ss-port-raw-acoustic", 2);
}

pub fn schema_md5(root: &Path, entity: &str, kind: EntityKind) -> String {
    let bytes = fs::read(db_join(root, entity).join(kind.schema_file())).expect("read schema");
    md5_hex(&bytes)
}

/// MD5 of every regular file under `root`, keyed by relative path.
pub fn snapshot(root: &Path) -> Vec<(String, String)> {
    let mut files: Vec<(String, String)> = WalkDir::new(root)
        .into_iter()
        .map(|entry| entry.expect("walk fixture tree"))
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let rel = entry
                .path()
                .strip_prefix(root)
                .expect("under root")
                .to_string_lossy()
                .replace('\\', "/");
            let sum = md5_hex(&fs::read(entry.path()).expect("read file"));
            (rel, sum)
        })
        .collect();
    files.sort();
    files
}
