//! Package versions and wildcard patterns.
//!
//! Versions are dot-separated numeric segments with an optional
//! `-prerelease` suffix. Missing trailing segments compare as zero and a
//! prerelease sorts before its release.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::error::{ModuleError, Result};

/// The version string meaning "highest available".
pub const LATEST: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageVersion {
    segments: Vec<u64>,
    prerelease: Option<String>,
}

impl PackageVersion {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let invalid = |reason: &str| ModuleError::InvalidVersion {
            version: raw.to_owned(),
            reason: reason.to_owned(),
        };

        let (core, prerelease) = match raw.split_once('-') {
            Some((core, pre)) if !pre.is_empty() => (core, Some(pre.to_owned())),
            Some(_) => return Err(invalid("empty prerelease")),
            None => (raw, None),
        };
        if core.is_empty() {
            return Err(invalid("empty version"));
        }

        let segments = core
            .split('.')
            .map(|s| s.parse::<u64>().map_err(|_| invalid("segments must be numeric")))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            segments,
            prerelease,
        })
    }

    fn segment(&self, index: usize) -> u64 {
        self.segments.get(index).copied().unwrap_or(0)
    }
}

impl FromStr for PackageVersion {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        for i in 0..len {
            match self.segment(i).cmp(&other.segment(i)) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        match (&self.prerelease, &other.prerelease) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core: Vec<String> = self.segments.iter().map(u64::to_string).collect();
        f.write_str(&core.join("."))?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

/// Whether a requested version is a pattern rather than an exact version.
pub fn is_wildcard(version: &str) -> bool {
    version.contains('*')
}

/// A version pattern such as `1.*` or `2.1.*`. `*` matches any run of
/// characters.
#[derive(Debug, Clone)]
pub struct VersionPattern {
    regex: Regex,
}

impl VersionPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let body = pattern
            .trim()
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("^{body}$")).map_err(|e| ModuleError::InvalidVersion {
            version: pattern.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Self { regex })
    }

    pub fn matches(&self, version: &str) -> bool {
        self.regex.is_match(version)
    }
}

/// Highest parseable version among `candidates`; unparseable ones are
/// skipped.
pub fn highest<'a, T>(
    candidates: impl IntoIterator<Item = &'a T>,
    version_of: impl Fn(&T) -> &str,
) -> Option<&'a T>
where
    T: 'a,
{
    candidates
        .into_iter()
        .filter_map(|c| PackageVersion::parse(version_of(c)).ok().map(|v| (v, c)))
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, c)| c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> PackageVersion {
        PackageVersion::parse(s).unwrap()
    }

    #[test]
    fn numeric_ordering() {
        assert!(v("2.0.0") > v("1.9.9"));
        assert!(v("1.10.0") > v("1.9.0"));
        assert_eq!(v("1.0"), v("1.0.0"));
    }

    #[test]
    fn prerelease_sorts_before_release() {
        assert!(v("1.0.0-beta") < v("1.0.0"));
        assert!(v("1.0.0-alpha") < v("1.0.0-beta"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(PackageVersion::parse("").is_err());
        assert!(PackageVersion::parse("one.two").is_err());
        assert!(PackageVersion::parse("1.0-").is_err());
    }

    #[test]
    fn display_round_trips() {
        assert_eq!(v("1.2.3-rc1").to_string(), "1.2.3-rc1");
    }

    #[test]
    fn pattern_matching() {
        let p = VersionPattern::new("1.*").unwrap();
        assert!(p.matches("1.0.0"));
        assert!(p.matches("1.12.3"));
        assert!(!p.matches("2.0.0"));
        assert!(!p.matches("11.0.0"));
        assert!(is_wildcard("1.*"));
        assert!(!is_wildcard("1.0.0"));
    }

    #[test]
    fn highest_skips_unparseable() {
        let versions = ["1.0.0", "bogus", "2.1.0", "2.0.9"];
        let best = highest(versions.iter(), |s| *s);
        assert_eq!(best, Some(&"2.1.0"));
    }
}
