//! Host and tool version parsing
//!
//! OS versions are compared numerically (`10.9 < 10.10`), so they are padded
//! to three components and stored as semver. Tool version extraction is
//! soft-fail: anything unparsable yields `None` and the caller treats the
//! dependent feature as absent.

use serde::{Serialize, Serializer};
use std::fmt;

/// A numeric `major.minor[.patch]` version of the host operating system.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OsVersion(semver::Version);

impl OsVersion {
    pub fn new(major: u64, minor: u64) -> Self {
        Self(semver::Version::new(major, minor, 0))
    }

    /// Parse the leading numeric part of a version string.
    ///
    /// `"10.14"`, `"13.2.1"`, `"v22.04"` and `"6.1.0-arch1"` all parse;
    /// `""` and `"unknown"` do not.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let s = s.strip_prefix('v').unwrap_or(s);
        let numeric: String = s
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();

        let parts: Vec<u64> = numeric
            .split('.')
            .take(3)
            .map(|p| p.parse::<u64>())
            .collect::<Result<_, _>>()
            .ok()?;

        match parts.as_slice() {
            [major] => Some(Self(semver::Version::new(*major, 0, 0))),
            [major, minor] => Some(Self(semver::Version::new(*major, *minor, 0))),
            [major, minor, patch] => Some(Self(semver::Version::new(*major, *minor, *patch))),
            _ => None,
        }
    }

    /// Map a macOS release name to its version.
    pub fn macos(name: &str) -> Option<Self> {
        let (major, minor) = match name.to_ascii_lowercase().as_str() {
            "yosemite" => (10, 10),
            "el_capitan" => (10, 11),
            "sierra" => (10, 12),
            "high_sierra" => (10, 13),
            "mojave" => (10, 14),
            "catalina" => (10, 15),
            "big_sur" => (11, 0),
            "monterey" => (12, 0),
            "ventura" => (13, 0),
            "sonoma" => (14, 0),
            "sequoia" => (15, 0),
            _ => return None,
        };
        Some(Self::new(major, minor))
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    /// True when both versions name the same `major.minor` release.
    pub fn same_release(&self, other: &OsVersion) -> bool {
        self.major() == other.major() && self.minor() == other.minor()
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.patch == 0 {
            write!(f, "{}.{}", self.0.major, self.0.minor)
        } else {
            write!(f, "{}.{}.{}", self.0.major, self.0.minor, self.0.patch)
        }
    }
}

impl Serialize for OsVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Extract `X.Y` from the first `<marker>X.Y[.Z]` occurrence in `text`.
///
/// `perl --version` prints `This is perl 5, version 30, subversion 3 (v5.30.3)`;
/// `extract_major_minor(out, 'v')` returns `Some("5.30")`.
pub fn extract_major_minor(text: &str, marker: char) -> Option<String> {
    let bytes: Vec<char> = text.chars().collect();

    for (i, c) in bytes.iter().enumerate() {
        if *c != marker {
            continue;
        }
        let rest = &bytes[i + 1..];
        let major: String = rest.iter().take_while(|c| c.is_ascii_digit()).collect();
        if major.is_empty() {
            continue;
        }
        let after_major = &rest[major.len()..];
        if after_major.first() != Some(&'.') {
            continue;
        }
        let minor: String = after_major[1..]
            .iter()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if minor.is_empty() {
            continue;
        }
        return Some(format!("{}.{}", major, minor));
    }

    None
}

/// Derive a package version from its source URL (`git-2.35.3.tar.xz` → `2.35.3`).
pub fn version_from_url(url: &str) -> Option<String> {
    let filename = url.rsplit('/').next()?.split('?').next()?;
    let stem = strip_archive_extension(filename);

    // The version starts after the last '-' or '_' that is followed by a digit.
    let start = stem
        .char_indices()
        .filter(|(i, c)| {
            (*c == '-' || *c == '_')
                && stem[i + 1..]
                    .chars()
                    .next()
                    .is_some_and(|n| n.is_ascii_digit() || n == 'v')
        })
        .map(|(i, _)| i + 1)
        .last()?;

    let version = stem[start..].trim_start_matches('v');
    if version.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        Some(version.to_string())
    } else {
        None
    }
}

fn strip_archive_extension(filename: &str) -> &str {
    const EXTENSIONS: &[&str] = &[
        ".tar.gz", ".tar.xz", ".tar.bz2", ".tar.zst", ".tgz", ".txz", ".tbz2", ".tzst", ".tar",
        ".zip",
    ];
    EXTENSIONS
        .iter()
        .find_map(|ext| filename.strip_suffix(ext))
        .unwrap_or(filename)
}
