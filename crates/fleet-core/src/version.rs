//! Firmware version comparison
//!
//! Versions are exactly three dot-separated unsigned integers
//! (`major.minor.patch`). Anything else is rejected with
//! [`Error::InvalidVersionFormat`](crate::Error::InvalidVersionFormat);
//! there is no lenient fallback ordering.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Parsed `major.minor.patch` firmware version
///
/// Field order matters: the derived `Ord` compares major, then minor, then patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a dotted version string
    pub fn parse(input: &str) -> Result<Self> {
        let mut parts = input.split('.');
        let major = component(input, parts.next())?;
        let minor = component(input, parts.next())?;
        let patch = component(input, parts.next())?;

        if parts.next().is_some() {
            return Err(Error::invalid_version(format!(
                "'{}' has more than three components",
                input
            )));
        }

        Ok(Self::new(major, minor, patch))
    }
}

fn component(input: &str, part: Option<&str>) -> Result<u64> {
    let part = part.ok_or_else(|| {
        Error::invalid_version(format!("'{}' has fewer than three components", input))
    })?;

    // u64::from_str accepts a leading '+', firmware never does
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::invalid_version(format!(
            "'{}' has non-numeric component '{}'",
            input, part
        )));
    }

    part.parse()
        .map_err(|_| Error::invalid_version(format!("'{}' component '{}' overflows", input, part)))
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Returns true iff `candidate` is strictly greater than `current`
pub fn is_newer(current: &str, candidate: &str) -> Result<bool> {
    Ok(Version::parse(candidate)? > Version::parse(current)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_component_precedence() {
        assert!(is_newer("1.2.3", "1.2.4").unwrap());
        assert!(!is_newer("1.2.3", "1.2.3").unwrap());
        assert!(!is_newer("2.0.0", "1.9.9").unwrap());
        assert!(is_newer("1.9.9", "2.0.0").unwrap());
        assert!(is_newer("1.2.9", "1.3.0").unwrap());
    }

    #[test]
    fn compares_numerically_not_lexically() {
        assert!(is_newer("1.2.9", "1.2.10").unwrap());
        assert!(!is_newer("1.10.0", "1.9.0").unwrap());
    }

    #[test]
    fn antisymmetric_over_a_grid() {
        let versions = ["0.0.0", "0.0.1", "0.1.0", "1.0.0", "1.0.10", "1.2.3", "2.0.0"];
        for a in versions {
            for b in versions {
                let forward = is_newer(a, b).unwrap();
                let backward = is_newer(b, a).unwrap();
                assert!(!(forward && backward), "{a} vs {b}");
                if a != b {
                    assert!(forward || backward, "{a} vs {b}");
                }
            }
        }
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!(matches!(
            is_newer("1.2", "1.2.3"),
            Err(Error::InvalidVersionFormat(_))
        ));
        assert!(matches!(
            is_newer("1.2.3", "1.2.3.4"),
            Err(Error::InvalidVersionFormat(_))
        ));
        assert!(Version::parse("").is_err());
    }

    #[test]
    fn rejects_non_numeric_components() {
        for bad in ["1.x.3", "1..3", "v1.2.3", "1.2.3-beta", " 1.2.3", "+1.2.3"] {
            assert!(Version::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn display_round_trips() {
        let v: Version = "10.0.7".parse().unwrap();
        assert_eq!(v.to_string(), "10.0.7");
    }
}
