//! Version-range expressions
//!
//! Accepted forms:
//! - a bare version `1.2.0`, meaning `[1.2.0,INFINITY)`
//! - an interval `[1.0.0,2.0.0)`, `(1.0,2.0]`, `[1.0.0,INFINITY)`
//!
//! The registry receives the canonical interval form from
//! [`VersionRange::expression`].

use crate::version::{Version, VersionError};
use std::fmt;
use std::str::FromStr;

/// Upper bound keyword for open-ended ranges
pub const INFINITY: &str = "INFINITY";

/// A parsed version interval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    start: Version,
    start_inclusive: bool,
    end: Option<Version>,
    end_inclusive: bool,
}

impl VersionRange {
    /// Range containing `start` and everything above it
    #[inline]
    #[must_use]
    pub const fn at_least(start: Version) -> Self {
        Self {
            start,
            start_inclusive: true,
            end: None,
            end_inclusive: false,
        }
    }

    /// Canonical interval text sent to the registry
    #[must_use]
    pub fn expression(&self) -> String {
        self.to_string()
    }

    /// Lower bound
    #[inline]
    #[must_use]
    pub const fn start(&self) -> Version {
        self.start
    }

    /// Upper bound, `None` when unbounded
    #[inline]
    #[must_use]
    pub const fn end(&self) -> Option<Version> {
        self.end
    }

    /// Check whether a version falls inside the interval
    #[must_use]
    pub fn contains(&self, version: &Version) -> bool {
        let above_start = if self.start_inclusive {
            *version >= self.start
        } else {
            *version > self.start
        };
        let below_end = match self.end {
            None => true,
            Some(end) if self.end_inclusive => *version <= end,
            Some(end) => *version < end,
        };
        above_start && below_end
    }

    /// Parse `version` and check membership
    ///
    /// # Errors
    /// Returns error if `version` is not a valid version string
    pub fn contains_str(&self, version: &str) -> Result<bool, RangeError> {
        let v: Version = version.parse().map_err(|e| RangeError::Bound {
            expression: version.to_string(),
            source: e,
        })?;
        Ok(self.contains(&v))
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = if self.start_inclusive { '[' } else { '(' };
        match self.end {
            Some(end) => {
                let close = if self.end_inclusive { ']' } else { ')' };
                write!(f, "{open}{},{end}{close}", self.start)
            }
            None => write!(f, "{open}{},{INFINITY})", self.start),
        }
    }
}

impl FromStr for VersionRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let expr = s.trim();
        if expr.is_empty() {
            return Err(RangeError::Empty);
        }

        let bound = |text: &str| -> Result<Version, RangeError> {
            text.trim().parse().map_err(|e| RangeError::Bound {
                expression: expr.to_string(),
                source: e,
            })
        };

        let first = expr.as_bytes()[0];
        if first != b'[' && first != b'(' {
            return Ok(Self::at_least(bound(expr)?));
        }

        let start_inclusive = first == b'[';
        let end_inclusive = match expr.as_bytes()[expr.len() - 1] {
            b']' => true,
            b')' => false,
            _ => return Err(RangeError::Malformed(expr.to_string())),
        };

        let inner = &expr[1..expr.len() - 1];
        let (lo, hi) = inner
            .split_once(',')
            .ok_or_else(|| RangeError::Malformed(expr.to_string()))?;

        let start = bound(lo)?;
        let end = if hi.trim() == INFINITY {
            if end_inclusive {
                return Err(RangeError::Malformed(expr.to_string()));
            }
            None
        } else {
            let end = bound(hi)?;
            let empty = if start_inclusive && end_inclusive {
                end < start
            } else {
                end <= start
            };
            if empty {
                return Err(RangeError::EmptyInterval(expr.to_string()));
            }
            Some(end)
        };

        Ok(Self {
            start,
            start_inclusive,
            end,
            end_inclusive,
        })
    }
}

/// Range parse errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    /// Empty expression
    #[error("empty version range")]
    Empty,

    /// Brackets or separator missing
    #[error("malformed version range: {0}")]
    Malformed(String),

    /// A bound is not a valid version
    #[error("invalid bound in version range {expression}: {source}")]
    Bound {
        expression: String,
        #[source]
        source: VersionError,
    },

    /// Upper bound below lower bound
    #[error("version range {0} contains no versions")]
    EmptyInterval(String),
}
