use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::ModError;

/// A `major.minor.patch` triple. Ordering is numeric, component by component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

fn parse_components(s: &str) -> Result<Vec<u32>, ModError> {
    let trimmed = s.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(ModError::invalid_argument("empty version"));
    }
    trimmed
        .split('.')
        .map(|part| {
            part.parse::<u32>().map_err(|_| {
                ModError::invalid_argument(format!(
                    "'{}' is not a valid version: '{}' is not a number",
                    s, part
                ))
            })
        })
        .collect()
}

impl FromStr for Version {
    type Err = ModError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_components(s)?.as_slice() {
            [major, minor, patch] => Ok(Version::new(*major, *minor, *patch)),
            _ => Err(ModError::invalid_argument(format!(
                "'{}' is not a valid version, expected major.minor.patch",
                s
            ))),
        }
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A version request.
///
/// `1.2.3` asks for exactly that version. `1.2` is relaxed: any `1.x.y` is
/// acceptable, preferring the newest `1.2.y` and falling back to the newest
/// `1.x.y` when no `1.2` release exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionSpec {
    Exact(Version),
    Relaxed { major: u32, minor: u32 },
}

impl VersionSpec {
    pub fn major(&self) -> u32 {
        match self {
            VersionSpec::Exact(v) => v.major,
            VersionSpec::Relaxed { major, .. } => *major,
        }
    }

    pub fn matches(&self, version: &Version) -> bool {
        match self {
            VersionSpec::Exact(v) => v == version,
            VersionSpec::Relaxed { major, .. } => version.major == *major,
        }
    }

    /// Picks the best candidate for this request, if any.
    pub fn select<I>(&self, candidates: I) -> Option<Version>
    where
        I: IntoIterator<Item = Version>,
    {
        match self {
            VersionSpec::Exact(wanted) => candidates.into_iter().find(|v| v == wanted),
            VersionSpec::Relaxed { major, minor } => {
                let same_major: Vec<Version> = candidates
                    .into_iter()
                    .filter(|v| v.major == *major)
                    .collect();
                same_major
                    .iter()
                    .filter(|v| v.minor == *minor)
                    .max()
                    .or_else(|| same_major.iter().max())
                    .copied()
            }
        }
    }
}

impl From<Version> for VersionSpec {
    fn from(version: Version) -> Self {
        VersionSpec::Exact(version)
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Exact(v) => write!(f, "{}", v),
            VersionSpec::Relaxed { major, minor } => write!(f, "{}.{}", major, minor),
        }
    }
}

impl FromStr for VersionSpec {
    type Err = ModError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_components(s)?.as_slice() {
            [major, minor, patch] => Ok(VersionSpec::Exact(Version::new(*major, *minor, *patch))),
            [major, minor] => Ok(VersionSpec::Relaxed {
                major: *major,
                minor: *minor,
            }),
            [_] => Err(ModError::invalid_argument(format!(
                "'{}' has no minor version; use at least major.minor",
                s
            ))),
            _ => Err(ModError::invalid_argument(format!(
                "'{}' is not a valid version request",
                s
            ))),
        }
    }
}

impl Serialize for VersionSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(v("1.2.3"), Version::new(1, 2, 3));
        assert_eq!(v("v10.0.7"), Version::new(10, 0, 7));
        assert!("1.2".parse::<Version>().is_err());
        assert!("1.2.x".parse::<Version>().is_err());
        assert!("".parse::<Version>().is_err());
    }

    #[test]
    fn test_version_ordering_is_numeric() {
        assert!(v("1.10.0") > v("1.9.9"));
        assert!(v("2.0.0") > v("1.99.99"));
        assert!(v("1.0.10") > v("1.0.2"));
    }

    #[test]
    fn test_parse_spec() {
        assert_eq!(
            "1.2.3".parse::<VersionSpec>().unwrap(),
            VersionSpec::Exact(Version::new(1, 2, 3))
        );
        assert_eq!(
            "1.2".parse::<VersionSpec>().unwrap(),
            VersionSpec::Relaxed { major: 1, minor: 2 }
        );
    }

    #[test]
    fn test_spec_without_minor_is_rejected() {
        let err = "1".parse::<VersionSpec>().unwrap_err();
        assert!(err.to_string().contains("minor"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_relaxed_prefers_requested_minor() {
        let candidates = [v("1.1.0"), v("1.1.2"), v("1.3.0"), v("2.1.5")];
        let spec: VersionSpec = "1.1".parse().unwrap();
        assert_eq!(spec.select(candidates), Some(v("1.1.2")));
    }

    #[test]
    fn test_relaxed_falls_back_to_newest_in_major() {
        let candidates = [v("1.1.0"), v("1.1.2"), v("1.3.0"), v("2.9.0")];
        let spec: VersionSpec = "1.9".parse().unwrap();
        assert_eq!(spec.select(candidates), Some(v("1.3.0")));
    }

    #[test]
    fn test_relaxed_never_crosses_major() {
        let spec: VersionSpec = "3.0".parse().unwrap();
        assert_eq!(spec.select([v("1.0.0"), v("2.0.0")]), None);
    }

    #[test]
    fn test_exact_select() {
        let spec: VersionSpec = "1.1.0".parse().unwrap();
        assert_eq!(spec.select([v("1.1.0"), v("1.1.2")]), Some(v("1.1.0")));
        assert_eq!(spec.select([v("1.1.2")]), None);
    }

    #[test]
    fn test_serde_as_strings() {
        let json = serde_json::to_string(&v("1.2.3")).unwrap();
        assert_eq!(json, "\"1.2.3\"");
        let spec: VersionSpec = serde_json::from_str("\"4.5\"").unwrap();
        assert_eq!(spec, VersionSpec::Relaxed { major: 4, minor: 5 });
        assert!(serde_json::from_str::<VersionSpec>("\"4\"").is_err());
    }
}
