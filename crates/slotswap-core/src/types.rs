//! Shared types used across slotswap crates.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the two interchangeable execution slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotIdentity {
    A,
    B,
}

impl SlotIdentity {
    pub const ALL: [SlotIdentity; 2] = [SlotIdentity::A, SlotIdentity::B];

    /// The other slot.
    pub fn complement(self) -> Self {
        match self {
            SlotIdentity::A => SlotIdentity::B,
            SlotIdentity::B => SlotIdentity::A,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SlotIdentity::A => "a",
            SlotIdentity::B => "b",
        }
    }
}

impl fmt::Display for SlotIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot-{}", self.label())
    }
}

/// A single registry build. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDescriptor {
    /// Registry project, e.g. `paper`.
    pub project: String,
    /// Registry version the build belongs to, e.g. `1.20.4`.
    pub version: String,
    pub build_number: u32,
    pub published_at: DateTime<Utc>,
    /// File name of the application download; also the cache key.
    pub artifact_file_name: String,
}

impl fmt::Display for BuildDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} build #{}",
            self.project, self.version, self.build_number
        )
    }
}

/// How a project's registry version is derived from the target version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionPolicy {
    /// Use the target version unchanged.
    #[default]
    Exact,
    /// Truncate to `major.minor` (`1.20.4` → `1.20`).
    MajorMinor,
}

impl VersionPolicy {
    pub fn derive(self, target: &str) -> String {
        match self {
            VersionPolicy::Exact => target.to_string(),
            VersionPolicy::MajorMinor => target
                .split('.')
                .take(2)
                .collect::<Vec<_>>()
                .join("."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complement_is_involutive() {
        for slot in SlotIdentity::ALL {
            assert_ne!(slot, slot.complement());
            assert_eq!(slot, slot.complement().complement());
        }
    }

    #[test]
    fn slot_display() {
        assert_eq!(SlotIdentity::A.to_string(), "slot-a");
        assert_eq!(SlotIdentity::B.to_string(), "slot-b");
    }

    #[test]
    fn major_minor_truncates_patch() {
        assert_eq!(VersionPolicy::MajorMinor.derive("1.20.4"), "1.20");
        assert_eq!(VersionPolicy::MajorMinor.derive("1.21"), "1.21");
        assert_eq!(VersionPolicy::MajorMinor.derive("1"), "1");
    }

    #[test]
    fn exact_keeps_version() {
        assert_eq!(VersionPolicy::Exact.derive("1.20.4"), "1.20.4");
    }

    #[test]
    fn policy_parses_snake_case() {
        let p: VersionPolicy = serde_json::from_str("\"major_minor\"").unwrap();
        assert_eq!(p, VersionPolicy::MajorMinor);
    }
}
