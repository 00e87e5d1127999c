//! The fixed historical schema generations of projects and tracks.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;

/// A schema generation of one entity kind, ordered oldest to newest.
pub trait SchemaVersion: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    const KIND: EntityKind;
    const ALL: &'static [Self];
    const LATEST: Self;

    /// Upper-case 8 hex digit tag, e.g. `9726336A`.
    fn tag(self) -> &'static str;

    /// Fingerprint shipped with the fixer, `None` for tags that can never be detected.
    fn builtin_fingerprint(self) -> Option<&'static str>;

    fn is_deprecated(self) -> bool {
        false
    }

    fn index(self) -> usize {
        Self::ALL
            .iter()
            .position(|v| *v == self)
            .unwrap_or(Self::ALL.len())
    }

    fn is_latest(self) -> bool {
        self == Self::LATEST
    }

    fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|v| v.tag().eq_ignore_ascii_case(tag))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackVersion {
    #[serde(rename = "2F9C8A44")]
    V2f9c8a44,
    #[serde(rename = "19A285F3")]
    V19a285f3,
    #[serde(rename = "9726336A")]
    V9726336a,
}

impl SchemaVersion for TrackVersion {
    const KIND: EntityKind = EntityKind::Track;
    const ALL: &'static [Self] = &[
        TrackVersion::V2f9c8a44,
        TrackVersion::V19a285f3,
        TrackVersion::V9726336a,
    ];
    const LATEST: Self = TrackVersion::V9726336a;

    fn tag(self) -> &'static str {
        match self {
            TrackVersion::V2f9c8a44 => "2F9C8A44",
            TrackVersion::V19a285f3 => "19A285F3",
            TrackVersion::V9726336a => "9726336A",
        }
    }

    fn builtin_fingerprint(self) -> Option<&'static str> {
        Some(match self {
            TrackVersion::V2f9c8a44 => "2f9c8a4405c52774c22fbd1e00c45ab2",
            TrackVersion::V19a285f3 => "19a285f398b930c936df0567abf356b3",
            TrackVersion::V9726336a => "9726336af32731e31dd3752276981192",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectVersion {
    #[serde(rename = "3E65462D")]
    V3e65462d,
    #[serde(rename = "6190124D")]
    V6190124d,
    #[serde(rename = "2C71F69B")]
    V2c71f69b,
    #[serde(rename = "E38FABCF")]
    Ve38fabcf,
    #[serde(rename = "3C282D25")]
    V3c282d25,
    #[serde(rename = "7F9EB90C")]
    V7f9eb90c,
    #[serde(rename = "FD8E8922")]
    Vfd8e8922,
    #[serde(rename = "DE7491C1")]
    Vde7491c1,
    #[serde(rename = "AD1F40A3")]
    Vad1f40a3,
    #[serde(rename = "B288BA04")]
    Vb288ba04,
    #[serde(rename = "C95A6F48")]
    Vc95a6f48,
    #[serde(rename = "8C1D17C8")]
    V8c1d17c8,
}

impl SchemaVersion for ProjectVersion {
    const KIND: EntityKind = EntityKind::Project;
    const ALL: &'static [Self] = &[
        ProjectVersion::V3e65462d,
        ProjectVersion::V6190124d,
        ProjectVersion::V2c71f69b,
        ProjectVersion::Ve38fabcf,
        ProjectVersion::V3c282d25,
        ProjectVersion::V7f9eb90c,
        ProjectVersion::Vfd8e8922,
        ProjectVersion::Vde7491c1,
        ProjectVersion::Vad1f40a3,
        ProjectVersion::Vb288ba04,
        ProjectVersion::Vc95a6f48,
        ProjectVersion::V8c1d17c8,
    ];
    const LATEST: Self = ProjectVersion::V8c1d17c8;

    fn tag(self) -> &'static str {
        match self {
            ProjectVersion::V3e65462d => "3E65462D",
            ProjectVersion::V6190124d => "6190124D",
            ProjectVersion::V2c71f69b => "2C71F69B",
            ProjectVersion::Ve38fabcf => "E38FABCF",
            ProjectVersion::V3c282d25 => "3C282D25",
            ProjectVersion::V7f9eb90c => "7F9EB90C",
            ProjectVersion::Vfd8e8922 => "FD8E8922",
            ProjectVersion::Vde7491c1 => "DE7491C1",
            ProjectVersion::Vad1f40a3 => "AD1F40A3",
            ProjectVersion::Vb288ba04 => "B288BA04",
            ProjectVersion::Vc95a6f48 => "C95A6F48",
            ProjectVersion::V8c1d17c8 => "8C1D17C8",
        }
    }

    fn builtin_fingerprint(self) -> Option<&'static str> {
        match self {
            ProjectVersion::V3e65462d => Some("3e65462db44e1dc9317f38a063d60ef1"),
            ProjectVersion::V6190124d => Some("6190124dbc946f010e07a5ffb86f68ee"),
            // Parameters written by this generation were never released.
            ProjectVersion::V2c71f69b => None,
            ProjectVersion::Ve38fabcf => Some("e38fabcf1b95fced8c87447c1ffa0f32"),
            ProjectVersion::V3c282d25 => Some("3c282d259e3db686fef4c3b26dde5edc"),
            ProjectVersion::V7f9eb90c => Some("7f9eb90c7f852d6457d7a1bdc5d9b012"),
            ProjectVersion::Vfd8e8922 => Some("fd8e8922e61b89e749e7b076444c039e"),
            ProjectVersion::Vde7491c1 => Some("de7491c1298d4368ad87ded88e617fea"),
            ProjectVersion::Vad1f40a3 => Some("ad1f40a3292926b566fe8ed6465a6e64"),
            ProjectVersion::Vb288ba04 => Some("b288ba043bea8a11886a458a4bfab4a8"),
            ProjectVersion::Vc95a6f48 => Some("c95a6f48d4f0f2784dfd45351ab83f8a"),
            ProjectVersion::V8c1d17c8 => Some("8c1d17c827ebbc76fca7548e4ca06226"),
        }
    }

    fn is_deprecated(self) -> bool {
        matches!(self, ProjectVersion::V2c71f69b)
    }
}

impl fmt::Display for TrackVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl fmt::Display for ProjectVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
