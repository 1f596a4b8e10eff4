use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// An application release such as `14.0`.
///
/// Ordering is numeric on `(major, minor)`, so `9.0 < 10.0` and equality never
/// depends on how the string was written (`14.0` and `14.00` are the same
/// release).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    major: u32,
    minor: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub const fn major_release(major: u32) -> Self {
        Self::new(major, 0)
    }

    pub fn parse(input: &str) -> anyhow::Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("version must not be empty"));
        }

        let (major, minor) = match trimmed.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (trimmed, "0"),
        };
        if major.is_empty() || minor.is_empty() {
            return Err(anyhow!("invalid version '{trimmed}': expected MAJOR.MINOR"));
        }
        if !major.chars().all(|ch| ch.is_ascii_digit())
            || !minor.chars().all(|ch| ch.is_ascii_digit())
        {
            return Err(anyhow!("invalid version '{trimmed}': expected MAJOR.MINOR"));
        }

        let major = major
            .parse::<u32>()
            .with_context(|| format!("invalid major version in '{trimmed}'"))?;
        let minor = minor
            .parse::<u32>()
            .with_context(|| format!("invalid minor version in '{trimmed}'"))?;
        Ok(Self::new(major, minor))
    }

    pub fn major(self) -> u32 {
        self.major
    }

    pub fn minor(self) -> u32 {
        self.minor
    }

    pub fn next_major(self) -> Self {
        Self::major_release(self.major + 1)
    }

    /// True when `self` is at least one full major release past `other`.
    pub fn is_major_ahead_of(self, other: Version) -> bool {
        self.major > other.major
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Version::parse(&raw).map_err(de::Error::custom)
    }
}

/// Every major release from `start` up to and including `target`.
pub fn build_versions(start: Version, target: Version) -> Vec<Version> {
    (start.major..=target.major)
        .map(Version::major_release)
        .collect()
}

/// The ladder that still needs a build when the enterprise tool jumps straight
/// to `minimum_target`: the start release plus everything from the minimum
/// target onwards.
pub fn enterprise_build_versions(
    start: Version,
    target: Version,
    minimum_target: Version,
) -> Vec<Version> {
    build_versions(start, target)
        .into_iter()
        .filter(|version| version.major == start.major || *version >= minimum_target)
        .collect()
}
