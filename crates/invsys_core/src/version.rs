//! Container versions
//!
//! Every committed transaction bumps the version of each container it touched
//! by exactly one. Replicas use the version to order deltas: a delta at
//! version `v` may only be applied to a copy sitting at `v - 1`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic commit counter of one container
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Version of a freshly spawned, never mutated container
    pub const ZERO: Version = Version(0);

    /// Create a version from a raw counter
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw counter
    #[inline]
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// The version after one more commit
    #[inline]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Whether `other` is the direct successor of this version
    #[inline]
    pub const fn is_followed_by(&self, other: Version) -> bool {
        other.0 == self.0 + 1
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({})", self.0)
    }
}

impl From<u64> for Version {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_succession() {
        let v = Version::ZERO;
        assert_eq!(v.next(), Version::new(1));
        assert!(v.is_followed_by(Version::new(1)));
        assert!(!v.is_followed_by(Version::new(2)));
        assert!(!v.next().is_followed_by(v));
    }

    #[test]
    fn test_version_ordering() {
        assert!(Version::new(5) < Version::new(7));
        assert_eq!(Version::new(3).to_string(), "v3");
    }
}
