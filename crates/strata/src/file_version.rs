//! File format version triples shared by the text and crate file formats.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A dotted `major.minor.patch` version, packed into 32 bits for comparison.
///
/// The compatibility rules are asymmetric: patch-level changes are
/// forward-compatible for readers but not for writers, so [`can_read`] ignores
/// the patch component while [`can_write`] does not.
///
/// [`can_read`]: FileVersion::can_read
/// [`can_write`]: FileVersion::can_write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FileVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl FileVersion {
    /// Creates a version from its three components.
    #[must_use]
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self { major, minor, patch }
    }

    /// Parses a dotted decimal version string, e.g. `"1.2.3"` or `"1.0"`.
    ///
    /// Major and minor are required; a trailing `.` demands a patch number.
    /// Trailing whitespace is tolerated, any other trailing character is a
    /// parse failure. Returns `None` on malformed input.
    #[must_use]
    pub fn from_string(s: &str) -> Option<Self> {
        let s = s.trim_end_matches([' ', '\t', '\n']);
        let mut parts = s.split('.');
        let major: u8 = parts.next()?.parse().ok()?;
        let minor: u8 = parts.next()?.parse().ok()?;
        let patch: u8 = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(major, minor, patch))
    }

    /// Returns the version as a single integer with bytes
    /// `0, major, minor, patch` from most to least significant.
    #[must_use]
    pub const fn as_int(self) -> u32 {
        (self.major as u32) << 16 | (self.minor as u32) << 8 | self.patch as u32
    }

    /// Returns a dotted string, eliding the patch component when it is zero,
    /// e.g. `"1.0"` or `"1.2.3"`.
    #[must_use]
    pub fn as_string(self) -> String {
        if self.patch == 0 {
            format!("{}.{}", self.major, self.minor)
        } else {
            format!("{}.{}.{}", self.major, self.minor, self.patch)
        }
    }

    /// Returns a dotted string that always includes the patch component,
    /// e.g. `"1.0.0"` or `"1.2.3"`.
    #[must_use]
    pub fn as_full_string(self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }

    /// Returns true if any component is non-zero.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.as_int() != 0
    }

    /// Returns true if a file written at `file_version` can be read by this
    /// version: same major, and a minor no newer than ours. Patch level is
    /// forward-compatible and therefore ignored.
    #[must_use]
    pub const fn can_read(self, file_version: Self) -> bool {
        file_version.major == self.major && file_version.minor <= self.minor
    }

    /// Returns true if this version can produce a file stamped
    /// `file_version`: same major, and either a strictly older minor or the
    /// same minor with a patch no newer than ours.
    #[must_use]
    pub const fn can_write(self, file_version: Self) -> bool {
        file_version.major == self.major
            && (file_version.minor < self.minor
                || (file_version.minor == self.minor && file_version.patch <= self.patch))
    }
}

impl PartialOrd for FileVersion {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FileVersion {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_int().cmp(&other.as_int())
    }
}

impl fmt::Display for FileVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_print_round_trip() {
        let v = FileVersion::from_string("1.2.3").unwrap();
        assert_eq!(v.as_full_string(), "1.2.3");
        assert_eq!(v.as_string(), "1.2.3");
        let v = FileVersion::from_string("1.0.0").unwrap();
        assert_eq!(v.as_string(), "1.0");
        assert_eq!(v.as_full_string(), "1.0.0");
    }

    #[test]
    fn parse_requires_minor_and_rejects_garbage() {
        assert!(FileVersion::from_string("1").is_none());
        assert!(FileVersion::from_string("1.").is_none());
        assert!(FileVersion::from_string("1.2.").is_none());
        assert!(FileVersion::from_string("1.2.3.4").is_none());
        assert!(FileVersion::from_string("1.2x").is_none());
        assert!(FileVersion::from_string("300.0").is_none());
        // trailing whitespace is fine
        assert_eq!(
            FileVersion::from_string("1.2 \n"),
            Some(FileVersion::new(1, 2, 0))
        );
    }

    #[test]
    fn read_compatibility_ignores_patch() {
        let ours = FileVersion::from_string("1.2").unwrap();
        assert!(!ours.can_read(FileVersion::from_string("1.3").unwrap()));
        let ours = FileVersion::from_string("1.3").unwrap();
        assert!(ours.can_read(FileVersion::from_string("1.2").unwrap()));
        let ours = FileVersion::from_string("1.3.5").unwrap();
        assert!(ours.can_read(FileVersion::from_string("1.3.9").unwrap()));
    }

    #[test]
    fn write_compatibility_honors_patch() {
        let ours = FileVersion::new(1, 3, 5);
        assert!(ours.can_write(FileVersion::new(1, 2, 9)));
        assert!(ours.can_write(FileVersion::new(1, 3, 5)));
        assert!(!ours.can_write(FileVersion::new(1, 3, 6)));
        assert!(!ours.can_write(FileVersion::new(2, 0, 0)));
    }

    #[test]
    fn packed_ordering() {
        assert!(FileVersion::new(1, 2, 3) < FileVersion::new(1, 10, 0));
        assert!(FileVersion::new(0, 0, 0) < FileVersion::new(0, 0, 1));
        assert!(!FileVersion::new(0, 0, 0).is_valid());
        assert!(FileVersion::new(0, 0, 1).is_valid());
    }
}
