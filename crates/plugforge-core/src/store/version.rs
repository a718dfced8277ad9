use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which part of a `major.minor.patch` version to increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionBump {
    Major,
    Minor,
    Patch,
}

impl fmt::Display for VersionBump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Major => "major",
            Self::Minor => "minor",
            Self::Patch => "patch",
        };
        f.write_str(s)
    }
}

impl FromStr for VersionBump {
    type Err = VersionBumpParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "major" => Ok(Self::Major),
            "minor" => Ok(Self::Minor),
            "patch" => Ok(Self::Patch),
            other => Err(VersionBumpParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version bump: {0:?} (expected major, minor, or patch)")]
pub struct VersionBumpParseError(pub String);

/// Increment one part of `version`, resetting the parts below it.
///
/// Missing or non-numeric parts count as zero, so a malformed version still
/// yields a well-formed result. A part at `u64::MAX` stays there.
pub fn bump(version: &str, kind: VersionBump) -> String {
    let mut parts = [0u64; 3];
    for (slot, part) in parts.iter_mut().zip(version.trim().split('.')) {
        *slot = part.trim().parse().unwrap_or(0);
    }
    match kind {
        VersionBump::Major => parts = [parts[0].saturating_add(1), 0, 0],
        VersionBump::Minor => parts = [parts[0], parts[1].saturating_add(1), 0],
        VersionBump::Patch => parts[2] = parts[2].saturating_add(1),
    }
    format!("{}.{}.{}", parts[0], parts[1], parts[2])
}
