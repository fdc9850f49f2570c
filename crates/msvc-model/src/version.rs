//! Version strings and precedence
//!
//! Registry versions are dotted numeric strings with one to three components
//! (`"2"`, `"1.4"`, `"1.0.12"`). Missing trailing components count as zero.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Maximum number of dotted components
pub const MAX_COMPONENTS: usize = 3;

/// A parsed dotted numeric version
///
/// Equality and ordering ignore how many components were written, so
/// `"1.0"` equals `"1.0.0"`.
#[derive(Debug, Clone, Copy)]
pub struct Version {
    parts: [u64; MAX_COMPONENTS],
    len: usize,
}

impl Version {
    /// Build from explicit components
    #[inline]
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            parts: [major, minor, patch],
            len: MAX_COMPONENTS,
        }
    }

    /// Numeric components, zero padded
    #[inline]
    #[must_use]
    pub const fn components(&self) -> [u64; MAX_COMPONENTS] {
        self.parts
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for Version {}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(VersionError::Empty);
        }

        let mut parts = [0u64; MAX_COMPONENTS];
        let mut len = 0;
        for piece in trimmed.split('.') {
            if len == MAX_COMPONENTS {
                return Err(VersionError::TooManyComponents(trimmed.to_string()));
            }
            if piece.is_empty() || !piece.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionError::InvalidComponent {
                    version: trimmed.to_string(),
                    component: piece.to_string(),
                });
            }
            parts[len] = piece.parse().map_err(|_| VersionError::InvalidComponent {
                version: trimmed.to_string(),
                component: piece.to_string(),
            })?;
            len += 1;
        }

        Ok(Self { parts, len })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts[..self.len].iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

/// How two version strings are ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionPrecedence {
    /// Compare dotted components numerically (`"10" > "9"`)
    #[default]
    Semantic,
    /// Byte-wise string comparison (`"9" > "10"`), kept for registries that
    /// rely on the legacy ordering
    Ordinal,
}

impl VersionPrecedence {
    /// Compare two version strings.
    ///
    /// Under [`VersionPrecedence::Semantic`], strings that do not parse as
    /// versions fall back to ordinal comparison.
    #[must_use]
    pub fn compare(self, a: &str, b: &str) -> Ordering {
        match self {
            Self::Ordinal => a.cmp(b),
            Self::Semantic => match (a.parse::<Version>(), b.parse::<Version>()) {
                (Ok(va), Ok(vb)) => va.cmp(&vb),
                _ => a.cmp(b),
            },
        }
    }
}

/// Version parse errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    /// Empty string
    #[error("empty version string")]
    Empty,

    /// More than three components
    #[error("version {0} has more than {MAX_COMPONENTS} components")]
    TooManyComponents(String),

    /// Non-numeric or empty component
    #[error("version {version} has invalid component '{component}'")]
    InvalidComponent { version: String, component: String },
}
