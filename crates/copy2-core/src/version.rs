use std::fmt;

use semver::Version;

/// `(major, minor, patch)` parsed leniently from a release tag.
///
/// Ordering is lexicographic on the triple. Parsing never fails: a tag with
/// no leading number normalizes to `0.0.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionTriple {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl VersionTriple {
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Version of the running build.
    #[must_use]
    pub fn current() -> Self {
        Self::parse_tag(env!("CARGO_PKG_VERSION"))
    }

    #[must_use]
    pub fn parse_tag(tag: &str) -> Self {
        let tag = tag.trim();
        let tag = tag
            .strip_prefix('v')
            .or_else(|| tag.strip_prefix('V'))
            .unwrap_or(tag);

        if let Ok(parsed) = Version::parse(tag) {
            return Self::new(parsed.major, parsed.minor, parsed.patch);
        }

        let mut numbers = [0_u64; 3];
        for (slot, part) in numbers.iter_mut().zip(tag.split('.')) {
            let digits_end = part
                .find(|ch: char| !ch.is_ascii_digit())
                .unwrap_or(part.len());
            let Ok(value) = part[..digits_end].parse::<u64>() else {
                break;
            };
            *slot = value;
            if digits_end < part.len() {
                break;
            }
        }

        let [major, minor, patch] = numbers;
        Self::new(major, minor, patch)
    }

    #[must_use]
    pub fn is_newer_than(self, other: Self) -> bool {
        self > other
    }
}

impl fmt::Display for VersionTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
