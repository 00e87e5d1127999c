//! Track upgrade steps.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{ProgressScope, Step, StepContext};
use crate::entity::{read_id_header, EntityKind};
use crate::keyfile::{KeyFile, KeyFileError};
use crate::version::TrackVersion;
use crate::{AppError, AppResult};

pub const CHANNEL_ASYMMETRY: &str = "TRACK/CHANNEL_ASYMMETRY";
pub const MISSING_SCHEMA_ID: &str = "TRACK/MISSING_SCHEMA_ID";
pub const UNSUPPORTED_DATA: &str = "TRACK/UNSUPPORTED_DATA";
pub const MISSING_SONAR: &str = "TRACK/MISSING_SONAR";

const PARAMS_FILE: &str = "track.prm";
const TRACK_GROUP: &str = "track";

pub static STEPS: &[Step<TrackVersion>] = &[
    Step {
        from: &[TrackVersion::V2f9c8a44],
        target: TrackVersion::V19a285f3,
        description: "channel remap and parameter conversion",
        apply: upgrade_2f9c8a44,
    },
    Step {
        from: &[TrackVersion::V19a285f3],
        target: TrackVersion::V9726336a,
        description: "offset renames with sign inversion",
        apply: upgrade_19a285f3,
    },
];

static READONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new("readonly").expect("readonly access pattern to compile"));

/// New name of a legacy channel; `None` drops the channel.
pub fn channel_name(legacy: &str) -> Option<&'static str> {
    Some(match legacy {
        "ss-port-raw" => "ss-port",
        "ss-port-raw-noise" => "ss-port-noise",
        "ss-port-raw-signal" => "ss-port-signal",
        "ss-port-raw-tvg" => "ss-port-tvg",
        "ss-starboard-raw" => "ss-starboard",
        "ss-starboard-raw-noise" => "ss-starboard-noise",
        "ss-starboard-raw-signal" => "ss-starboard-signal",
        "ss-starboard-raw-tvg" => "ss-starboard-tvg",
        "echosounder-raw" => "echosounder",
        "echosounder-raw-noise" => "echosounder-noise",
        "echosounder-raw-signal" => "echosounder-signal",
        "echosounder-raw-tvg" => "echosounder-tvg",
        "forward-look-raw-1" => "forward-look",
        "forward-look-raw-1-noise" => "forward-look-noise",
        "forward-look-raw-1-signal" => "forward-look-signal",
        "forward-look-raw-1-tvg" => "forward-look-tvg",
        "forward-look-raw-2" => "forward-look-2",
        "forward-look-raw-2-noise" => "forward-look-noise-2",
        "forward-look-raw-2-signal" => "forward-look-signal-2",
        "forward-look-raw-2-tvg" => "forward-look-tvg-2",
        "profiler" => "profiler",
        "nmea" => "nmea",
        "nmea-2" => "nmea-2",
        "track" => "track",
        _ => return None,
    })
}

/// Working frequency of an acoustic source, or `-1.0` when it cannot be resolved.
///
/// Known receiver data rates pin the frequency per device; otherwise the
/// antenna frequency is trusted when it is plausible.
pub fn signal_frequency(source: &str, data_rate: f64, antenna_frequency: f64) -> f64 {
    let known = match data_rate as i64 {
        61276 | 58640 if source.starts_with("profiler") => Some(12000.0),
        78125 if source.starts_with("echosounder") => Some(315657.0),
        52083 if source.starts_with("ss-port") => Some(240000.0),
        68681 if source.starts_with("ss-starboard") => Some(250000.0),
        208333 if source.starts_with("echosounder") => Some(1041670.0),
        223214 if source.starts_with("ss-port") => Some(538793.0),
        223214 if source.starts_with("ss-starboard") => Some(664894.0),
        111607 if source.starts_with("forward-look") => Some(434027.0),
        156250 if source.starts_with("ss-port") || source.starts_with("ss-starboard") => {
            Some(679348.0)
        }
        _ => None,
    };

    match known {
        Some(frequency) => frequency,
        None if antenna_frequency > 1e3 => antenna_frequency,
        None => -1.0,
    }
}

fn segment_file(channel: &str, index: u32, ext: char) -> String {
    format!("{channel}.{index:06}.{ext}")
}

/// Number of complete segment pairs of `channel`.
fn count_segments(ctx: &StepContext<'_>, channel: &str) -> AppResult<u32> {
    let mut count = 0u32;
    loop {
        let has_index = ctx.resolve(&segment_file(channel, count, 'i')).exists();
        let has_data = ctx.resolve(&segment_file(channel, count, 'd')).exists();
        match (has_index, has_data) {
            (true, true) => count += 1,
            (false, false) => return Ok(count),
            _ => {
                return Err(AppError::new(
                    CHANNEL_ASYMMETRY,
                    "Channel segment is missing its index or data file.",
                )
                .with_context("entity", ctx.entity.to_string())
                .with_context("channel", channel.to_string())
                .with_context("segment", count.to_string()))
            }
        }
    }
}

fn copy_channel(ctx: &StepContext<'_>, from: &str, to: &str) -> AppResult<()> {
    if from == to {
        return Ok(());
    }
    let segments = count_segments(ctx, from)?;
    for index in 0..segments {
        for ext in ['i', 'd'] {
            ctx.journal.copy(
                &ctx.rel(&segment_file(from, index, ext)),
                &ctx.rel(&segment_file(to, index, ext)),
                true,
            )?;
        }
    }
    tracing::debug!(
        target: "dbfix",
        event = "channel_copied",
        entity = %ctx.entity,
        from = %from,
        to = %to,
        segments,
    );
    Ok(())
}

fn mark_channel_remove(ctx: &StepContext<'_>, channel: &str) -> AppResult<()> {
    let segments = count_segments(ctx, channel)?;
    for index in 0..segments {
        for ext in ['i', 'd'] {
            ctx.journal
                .mark_remove(&ctx.rel(&segment_file(channel, index, ext)))?;
        }
    }
    ctx.journal
        .append_log(&format!("drop channel {} in {}", channel, ctx.entity))
}

/// Reads a double, treating an absent key as zero.
fn double_or_zero(params: &KeyFile, group: &str, key: &str) -> AppResult<f64> {
    match params.double(group, key) {
        Ok(value) => Ok(value),
        Err(KeyFileError::KeyNotFound { .. }) | Err(KeyFileError::GroupNotFound { .. }) => Ok(0.0),
        Err(err) => Err(err.into()),
    }
}

fn optional_string(params: &KeyFile, group: &str, key: &str) -> AppResult<Option<String>> {
    match params.string(group, key) {
        Ok(value) => Ok(Some(value)),
        Err(KeyFileError::KeyNotFound { .. }) | Err(KeyFileError::GroupNotFound { .. }) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

const POSITION_KEYS: [(&str, &str); 6] = [
    ("/position/x", "/offset/x"),
    ("/position/y", "/offset/y"),
    ("/position/z", "/offset/z"),
    ("/position/psi", "/offset/psi"),
    ("/position/gamma", "/offset/gamma"),
    ("/position/theta", "/offset/theta"),
];

fn copy_position(src: &KeyFile, dst: &mut KeyFile, from: &str, to: &str) -> AppResult<()> {
    for (old, new) in POSITION_KEYS {
        dst.set_double(to, new, double_or_zero(src, from, old)?);
    }
    Ok(())
}

fn unsupported(group: &str, data_type: Option<&str>) -> AppError {
    AppError::new(UNSUPPORTED_DATA, "Channel data format cannot be converted.")
        .with_context("channel", group.to_string())
        .with_context("data_type", data_type.unwrap_or("<none>").to_string())
}

/// Rebuilds the sonar description stored in the `track` group.
fn rebuild_sonar(src: &KeyFile) -> AppResult<String> {
    let legacy = optional_string(src, TRACK_GROUP, "/sonar")?.ok_or_else(|| {
        AppError::new(MISSING_SONAR, "Track parameters carry no sonar description.")
    })?;
    let schema = READONLY.replace_all(&legacy, "r");

    let mut info = KeyFile::new();
    info.set_string("info", "/info/hydra/schema", &schema);
    info.set_string("info", "/info/hydra/drv", "Hydra4");
    info.set_string("info", "/info/hydra/drv-version", "4a");

    for channel in src.groups().filter_map(channel_name) {
        match channel {
            "ss-port" | "ss-starboard" | "echosounder" | "forward-look" | "profiler" => {
                info.set_string("info", &format!("/info/sources/{channel}/dev-id"), "hydra");
                info.set_string(
                    "info",
                    &format!("/info/sources/{channel}/description"),
                    channel,
                );
            }
            "nmea" | "nmea-2" => {
                info.set_string("info", &format!("/info/sensors/{channel}/dev-id"), "hydra");
                info.set_string(
                    "info",
                    &format!("/info/sensors/{channel}/description"),
                    "NMEA sensor",
                );
            }
            _ => {}
        }
    }

    Ok(info.to_data())
}

/// Converts one channel group into the 19A285F3 layout.
fn convert_group(
    src: &KeyFile,
    dst: &mut KeyFile,
    from: &str,
    to: &str,
    ctime_us: i64,
) -> AppResult<()> {
    let schema_id = optional_string(src, from, "schema-id")?.ok_or_else(|| {
        AppError::new(MISSING_SCHEMA_ID, "Channel parameters carry no schema-id.")
            .with_context("channel", from.to_string())
    })?;

    match schema_id.as_str() {
        "track" => {
            let sonar = rebuild_sonar(src)?;
            dst.set_string(to, "schema-id", "track");
            if let Some(id) = optional_string(src, from, "/id")? {
                dst.set_string(to, "/id", &id);
            }
            if let Some(kind) = optional_string(src, from, "/type")? {
                dst.set_string(to, "/type", &kind);
            }
            dst.set_string(to, "/sonar", &sonar);
            dst.set_int64(to, "/ctime", ctime_us);
        }
        "raw" => {
            let data_type = optional_string(src, from, "/data/type")?;
            let data_rate = double_or_zero(src, from, "/data/rate")?;
            let antenna_frequency = double_or_zero(src, from, "/antenna/frequency")?;
            let frequency = signal_frequency(to, data_rate, antenna_frequency);
            if data_type.as_deref() != Some("complex-adc14le") || frequency < 0.0 {
                return Err(unsupported(from, data_type.as_deref())
                    .with_context("data_rate", data_rate.to_string()));
            }

            dst.set_string(to, "schema-id", "acoustic");
            dst.set_string(to, "/data/type", "complex-adc14le");
            dst.set_double(to, "/data/rate", data_rate);
            for key in [
                "/antenna/offset/vertical",
                "/antenna/offset/horizontal",
                "/antenna/frequency",
                "/antenna/bandwidth",
            ] {
                dst.set_double(to, key, double_or_zero(src, from, key)?);
            }
            dst.set_double(to, "/signal/frequency", frequency);
            dst.set_double(to, "/signal/bandwidth", 0.18 * frequency);
            copy_position(src, dst, from, to)?;
        }
        "signal" | "tvg" => {
            let (legacy, current) = if schema_id == "signal" {
                ("complex-float", "complex-float32le")
            } else {
                ("float", "float32le")
            };
            let data_type = optional_string(src, from, "/data/type")?;
            if data_type.as_deref() != Some(legacy) {
                return Err(unsupported(from, data_type.as_deref()));
            }
            dst.set_string(to, "schema-id", &schema_id);
            dst.set_string(to, "/data/type", current);
            dst.set_double(to, "/data/rate", double_or_zero(src, from, "/data/rate")?);
        }
        "acoustic" => {
            let data_type = optional_string(src, from, "/data/type")?;
            if data_type.as_deref() != Some("float") {
                return Err(unsupported(from, data_type.as_deref()));
            }
            dst.set_string(to, "schema-id", "acoustic");
            dst.set_string(to, "/data/type", "float32le");
            dst.set_double(to, "/data/rate", double_or_zero(src, from, "/data/rate")?);
            copy_position(src, dst, from, to)?;
        }
        "sensor" => {
            dst.set_string(to, "schema-id", "sensor");
            dst.set_string(to, "/sensor-name", to);
            copy_position(src, dst, from, to)?;
        }
        other => {
            tracing::debug!(
                target: "dbfix",
                event = "channel_params_dropped",
                channel = %from,
                schema_id = %other,
            );
        }
    }
    Ok(())
}

fn upgrade_2f9c8a44(ctx: &StepContext<'_>) -> AppResult<()> {
    let header = read_id_header(ctx.journal.root(), ctx.entity, EntityKind::Track)
        .ok_or_else(|| {
            AppError::new("TRACK/INVALID_ID", "Track identification header is unreadable.")
                .with_context("entity", ctx.entity.to_string())
        })?;

    let prm = ctx.rel(PARAMS_FILE);
    ctx.journal.backup(&prm, true)?;
    let src = KeyFile::load(&ctx.resolve(PARAMS_FILE))?;
    let mut dst = KeyFile::new();

    let groups: Vec<&str> = src.groups().collect();
    let total = groups.len() as u64;
    let _scope = ProgressScope::open(ctx.cancellable);
    for (idx, group) in groups.iter().enumerate() {
        ctx.cancellable.set_total(idx as u64, 0, total);
        let Some(channel) = channel_name(group) else {
            mark_channel_remove(ctx, group)?;
            continue;
        };
        copy_channel(ctx, group, channel)?;
        convert_group(&src, &mut dst, group, channel, header.created_at_micros())?;
    }

    dst.save(&ctx.resolve(PARAMS_FILE))
}

fn upgrade_19a285f3(ctx: &StepContext<'_>) -> AppResult<()> {
    let prm = ctx.rel(PARAMS_FILE);
    ctx.journal.backup(&prm, true)?;
    let src = KeyFile::load(&ctx.resolve(PARAMS_FILE))?;
    let mut dst = KeyFile::new();

    for group in src.groups() {
        for key in src.keys(group) {
            let renamed = match key {
                "/offset/x" => Some(("/offset/forward", false)),
                "/offset/y" => Some(("/offset/starboard", false)),
                "/offset/z" => Some(("/offset/vertical", false)),
                "/offset/psi" => Some(("/offset/yaw", true)),
                "/offset/gamma" => Some(("/offset/roll", true)),
                "/offset/theta" => Some(("/offset/pitch", true)),
                _ => None,
            };
            match renamed {
                Some((new_key, invert)) => {
                    let value = double_or_zero(&src, group, key)?;
                    dst.set_double(group, new_key, if invert { -value } else { value });
                    ctx.journal.append_log(&format!(
                        "rename track parameter in {group}: {key} -> {new_key}"
                    ))?;
                }
                None => dst.set_value(group, key, src.value(group, key)?),
            }
        }
    }

    dst.save(&ctx.resolve(PARAMS_FILE))
}
