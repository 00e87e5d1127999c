//! Project parameter upgrade steps.

use chrono::Utc;

use super::{Step, StepContext};
use crate::detect::{get_version, Detection};
use crate::entity::{new_entity_id, read_id_header, EntityKind};
use crate::keyfile::KeyFile;
use crate::util::list_dirs;
use crate::version::{ProjectVersion, SchemaVersion, TrackVersion};
use crate::{AppError, AppResult};

const INFO_FILE: &str = "project.prm/info.prm";
const LEGACY_MARKS_FILE: &str = "project.prm/waterfall-marks.prm";
const MARKS_FILE: &str = "project.prm/waterfall-mark.prm";
const GEO_MARKS_FILE: &str = "project.prm/geo-mark.prm";
const PLANNER_FILE: &str = "project.prm/planner.prm";

pub static STEPS: &[Step<ProjectVersion>] = &[
    Step {
        from: &[ProjectVersion::V3e65462d],
        target: ProjectVersion::V6190124d,
        description: "waterfall mark schema added",
        apply: schema_only,
    },
    Step {
        from: &[ProjectVersion::V6190124d],
        target: ProjectVersion::Ve38fabcf,
        description: "project info and waterfall mark rename",
        apply: upgrade_6190124d,
    },
    Step {
        from: &[ProjectVersion::V2c71f69b, ProjectVersion::Ve38fabcf],
        target: ProjectVersion::V3c282d25,
        description: "geo mark schema added",
        apply: schema_only,
    },
    Step {
        from: &[ProjectVersion::V3c282d25],
        target: ProjectVersion::V7f9eb90c,
        description: "waterfall mark field renames",
        apply: upgrade_3c282d25,
    },
    Step {
        from: &[ProjectVersion::V7f9eb90c],
        target: ProjectVersion::Vfd8e8922,
        description: "waterfall mark source names",
        apply: upgrade_7f9eb90c,
    },
    Step {
        from: &[ProjectVersion::Vfd8e8922],
        target: ProjectVersion::Vde7491c1,
        description: "waterfall mark schema revision",
        apply: schema_only,
    },
    Step {
        from: &[ProjectVersion::Vde7491c1],
        target: ProjectVersion::Vad1f40a3,
        description: "planner schema added",
        apply: schema_only,
    },
    Step {
        from: &[ProjectVersion::Vad1f40a3],
        target: ProjectVersion::Vb288ba04,
        description: "planner schema revision",
        apply: schema_only,
    },
    Step {
        from: &[ProjectVersion::Vb288ba04],
        target: ProjectVersion::Vc95a6f48,
        description: "planner coordinate renames",
        apply: upgrade_b288ba04,
    },
    Step {
        from: &[ProjectVersion::Vc95a6f48],
        target: ProjectVersion::V8c1d17c8,
        description: "mark label renames",
        apply: upgrade_c95a6f48,
    },
];

fn schema_only(_ctx: &StepContext<'_>) -> AppResult<()> {
    Ok(())
}

/// Remaps legacy sonar source identifiers of waterfall marks.
pub fn remap_source_id(legacy: i32) -> i32 {
    match legacy {
        101 | 201 => 2,
        102 | 202 => 5,
        103 | 203 => 4,
        104 | 204 => 7,
        107 | 205 => 8,
        108 | 209 => 13,
        _ => -1,
    }
}

pub fn source_name(id: i32) -> Option<&'static str> {
    Some(match id {
        2 => "ss-starboard",
        3 => "ss-starboard-low",
        4 => "ss-starboard-hi",
        5 => "ss-port",
        6 => "ss-port-low",
        7 => "ss-port-hi",
        8 => "echosounder",
        9 => "echosounder-low",
        10 => "echosounder-hi",
        13 => "profiler",
        14 => "profiler-echo",
        _ => return None,
    })
}

/// Rewrites `file` key by key. `convert` returns `false` to keep a key verbatim.
///
/// An absent file has nothing to convert and is left absent.
fn transform_params<F>(ctx: &StepContext<'_>, file: &str, mut convert: F) -> AppResult<()>
where
    F: FnMut(&KeyFile, &mut KeyFile, &str, &str) -> AppResult<bool>,
{
    let path = ctx.resolve(file);
    let Some(src) = KeyFile::load_optional(&path)? else {
        tracing::debug!(target: "dbfix", event = "params_absent", path = %path.display());
        return Ok(());
    };

    let mut dst = KeyFile::new();
    for group in src.groups() {
        for key in src.keys(group) {
            if !convert(&src, &mut dst, group, key)? {
                dst.set_value(group, key, src.value(group, key)?);
            }
        }
    }
    dst.save(&path)
}

fn rewrite_params<F>(ctx: &StepContext<'_>, file: &str, convert: F) -> AppResult<()>
where
    F: FnMut(&KeyFile, &mut KeyFile, &str, &str) -> AppResult<bool>,
{
    ctx.journal.backup(&ctx.rel(file), false)?;
    transform_params(ctx, file, convert)
}

fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

fn upgrade_6190124d(ctx: &StepContext<'_>) -> AppResult<()> {
    let journal = ctx.journal;
    let header = read_id_header(journal.root(), ctx.entity, EntityKind::Project).ok_or_else(|| {
        AppError::new("PROJECT/INVALID_ID", "Project identification header is unreadable.")
            .with_context("entity", ctx.entity.to_string())
    })?;

    let mut info = KeyFile::new();
    info.set_string("project", "schema-id", "project-info");
    info.set_int64("project", "/ctime", header.created_at_micros());
    info.set_int64("project", "/mtime", now_micros());
    info.set_string("project", "/id", &new_entity_id());

    for track in list_dirs(&journal.resolve(ctx.entity))? {
        let entity = ctx.rel(&track);
        match get_version::<TrackVersion>(journal.root(), &entity, journal.registry()) {
            Detection::NotEntity => continue,
            detection if detection.is_latest() => {}
            detection => {
                return Err(AppError::new(
                    AppError::NOT_LATEST_TRACK,
                    "Track must be upgraded before its project.",
                )
                .with_context("track", entity)
                .with_context("detected", detection.label()))
            }
        }

        let params = KeyFile::load(&journal.resolve(&format!("{entity}/track.prm")))?;
        let track_id = params.string("track", "/id")?;
        info.set_string(&track_id, "schema-id", "track-info");
        info.set_int64(&track_id, "/mtime", now_micros());
    }

    journal.backup(&ctx.rel(INFO_FILE), false)?;
    info.save(&ctx.resolve(INFO_FILE))?;

    journal.backup(&ctx.rel(MARKS_FILE), false)?;
    journal.copy(&ctx.rel(LEGACY_MARKS_FILE), &ctx.rel(MARKS_FILE), false)?;
    transform_params(ctx, MARKS_FILE, |src, dst, group, key| {
        if key != "/coordinates/source0" {
            return Ok(false);
        }
        dst.set_integer(group, key, remap_source_id(src.integer(group, key)?));
        Ok(true)
    })
}

fn upgrade_3c282d25(ctx: &StepContext<'_>) -> AppResult<()> {
    rewrite_params(ctx, MARKS_FILE, |src, dst, group, key| {
        match key {
            "/time/creation" => dst.set_int64(group, "/ctime", src.int64(group, key)?),
            "/time/modification" => dst.set_int64(group, "/mtime", src.int64(group, key)?),
            "/coordinates/source0" => dst.set_integer(group, "/source", src.integer(group, key)?),
            "/coordinates/index0" => dst.set_integer(group, "/index", src.integer(group, key)?),
            "/coordinates/count0" => dst.set_integer(group, "/count", src.integer(group, key)?),
            "/coordinates/lat" => dst.set_double(group, "/lat", src.double(group, key)?),
            "/coordinates/lon" => dst.set_double(group, "/lon", src.double(group, key)?),
            "/coordinates/width" => {
                dst.set_double(group, "/width", src.double(group, key)? / 1000.0)
            }
            "/coordinates/height" => {
                dst.set_double(group, "/height", src.double(group, key)? / 1000.0)
            }
            _ => return Ok(false),
        }
        Ok(true)
    })
}

fn upgrade_7f9eb90c(ctx: &StepContext<'_>) -> AppResult<()> {
    let journal = ctx.journal;
    rewrite_params(ctx, MARKS_FILE, |src, dst, group, key| {
        if key != "/source" {
            return Ok(false);
        }
        let id = src.integer(group, key)?;
        match source_name(id) {
            Some(name) => dst.set_string(group, key, name),
            None => {
                tracing::warn!(
                    target: "dbfix",
                    event = "mark_source_dropped",
                    entity = %ctx.entity,
                    mark = %group,
                    source = id,
                );
                journal.append_log(&format!("drop unknown source {id} of mark {group}"))?;
            }
        }
        Ok(true)
    })
}

fn upgrade_b288ba04(ctx: &StepContext<'_>) -> AppResult<()> {
    rewrite_params(ctx, PLANNER_FILE, |src, dst, group, key| {
        let renamed = match key {
            "/start-lat" => "/start/lat",
            "/start-lon" => "/start/lon",
            "/end-lat" => "/end/lat",
            "/end-lon" => "/end/lon",
            _ => return Ok(false),
        };
        dst.set_double(group, renamed, src.double(group, key)?);
        Ok(true)
    })
}

fn upgrade_c95a6f48(ctx: &StepContext<'_>) -> AppResult<()> {
    for file in [MARKS_FILE, GEO_MARKS_FILE] {
        rewrite_params(ctx, file, |src, dst, group, key| {
            if key != "/label" {
                return Ok(false);
            }
            dst.set_int64(group, "/labels", src.int64(group, key)?);
            Ok(true)
        })?;
    }
    Ok(())
}
