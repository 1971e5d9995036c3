use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// First wallet release that understands per-wallet mixing tuning
/// (anonymity target, coin isolation). Older releases silently ignore the
/// corresponding environment variables, so the orchestrator drops the
/// settings with a notice instead of exporting them.
pub const FIRST_TUNABLE: Version = Version {
    major: 2,
    minor: 0,
    patch: 3,
};

/// A wallet client release, ordered by `(major, minor, patch)`.
///
/// The major component selects the RPC flavor spoken by the client; minor
/// and patch only matter for capability gating and image naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

#[derive(Debug, Error, PartialEq)]
#[error("invalid version string: {0}")]
pub struct ParseVersionError(String);

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Whether this release accepts per-wallet mixing tuning parameters.
    pub fn supports_tuning(&self) -> bool {
        *self >= FIRST_TUNABLE
    }
}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let mut next = || {
            parts
                .next()
                .and_then(|p| p.parse::<u32>().ok())
                .ok_or_else(|| ParseVersionError(s.to_string()))
        };
        let version = Version {
            major: next()?,
            minor: next()?,
            patch: next()?,
        };
        if parts.next().is_some() {
            return Err(ParseVersionError(s.to_string()));
        }
        Ok(version)
    }
}

impl TryFrom<String> for Version {
    type Error = ParseVersionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        let version: Version = "2.0.4".parse().unwrap();
        assert_eq!(version, Version::new(2, 0, 4));
        assert_eq!(version.to_string(), "2.0.4");
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!("2.0".parse::<Version>().is_err());
        assert!("2.0.4.1".parse::<Version>().is_err());
        assert!("2.x.4".parse::<Version>().is_err());
        assert!("".parse::<Version>().is_err());
    }

    #[test]
    fn ordering_is_numeric_not_lexicographic() {
        let older: Version = "2.0.4".parse().unwrap();
        let newer: Version = "2.0.10".parse().unwrap();
        assert!(older < newer);
        assert!(Version::new(1, 9, 9) < Version::new(2, 0, 0));
    }

    #[test]
    fn tuning_capability_gate() {
        assert!(!Version::new(2, 0, 2).supports_tuning());
        assert!(Version::new(2, 0, 3).supports_tuning());
        assert!(Version::new(2, 1, 0).supports_tuning());
        assert!(!Version::new(1, 1, 12).supports_tuning());
    }
}
