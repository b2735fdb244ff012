//! Semantic version allocation for attachment version chains
//!
//! Versions are dotted `major.minor.patch[suffix]` strings, optionally
//! prefixed with `v`. Ordering is numeric on the triple, never
//! lexicographic on the text.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// A parsed semantic version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    /// Anything trailing the patch number, e.g. `-beta.1`
    pub suffix: Option<String>,
}

/// Which component to bump when allocating a new version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Increment {
    Major,
    Minor,
    Patch,
}

impl SemVer {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            suffix: None,
        }
    }

    /// Parse `v?N.N[.N[suffix]]`
    pub fn parse(text: &str) -> StoreResult<Self> {
        let malformed = || StoreError::MalformedVersion(text.to_string());
        let body = text.strip_prefix('v').unwrap_or(text);

        let mut parts = body.splitn(3, '.');
        let major = parse_number(parts.next().ok_or_else(malformed)?).ok_or_else(malformed)?;
        let minor = parse_number(parts.next().ok_or_else(malformed)?).ok_or_else(malformed)?;

        let (patch, suffix) = match parts.next() {
            None => (0, None),
            Some(rest) => {
                let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
                if digits == 0 {
                    return Err(malformed());
                }
                let patch = parse_number(&rest[..digits]).ok_or_else(malformed)?;
                let suffix = &rest[digits..];
                let suffix = if suffix.is_empty() {
                    None
                } else if suffix.starts_with('-') || suffix.starts_with('+') {
                    Some(suffix.to_string())
                } else {
                    return Err(malformed());
                };
                (patch, suffix)
            }
        };

        Ok(Self {
            major,
            minor,
            patch,
            suffix,
        })
    }

    /// Allocate the version that follows `current`
    ///
    /// A missing current version behaves like `0.0.0`, so chains start at
    /// `1.0.0`, `0.1.0` or `0.0.1` depending on the increment. Fails with
    /// `MalformedVersion` when the bumped component would overflow.
    pub fn next(current: Option<&SemVer>, increment: Increment) -> StoreResult<SemVer> {
        let base = current.cloned().unwrap_or_else(|| SemVer::new(0, 0, 0));
        let bump = |n: u64| {
            n.checked_add(1)
                .ok_or_else(|| StoreError::MalformedVersion(base.to_string()))
        };
        Ok(match increment {
            Increment::Major => SemVer::new(bump(base.major)?, 0, 0),
            Increment::Minor => SemVer::new(base.major, bump(base.minor)?, 0),
            Increment::Patch => SemVer::new(base.major, base.minor, bump(base.patch)?),
        })
    }
}

fn parse_number(text: &str) -> Option<u64> {
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

impl FromStr for SemVer {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SemVer::parse(s)
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(ref suffix) = self.suffix {
            write!(f, "{}", suffix)?;
        }
        Ok(())
    }
}

impl Ord for SemVer {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.suffix, &other.suffix) {
                (None, None) => Ordering::Equal,
                // a pre-release sorts before its release
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for SemVer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Increment {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "major" => Ok(Increment::Major),
            "minor" => Ok(Increment::Minor),
            "patch" => Ok(Increment::Patch),
            _ => Err(StoreError::MalformedVersion(s.to_string())),
        }
    }
}

impl fmt::Display for Increment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Increment::Major => "major",
            Increment::Minor => "minor",
            Increment::Patch => "patch",
        };
        f.write_str(name)
    }
}
