//! Package identity from registry tarball paths.
//!
//! npm-compatible registries serve archives at
//!
//! ```text
//! /<name-segment>[/<name-segment>...]/-/<basename>-<version>.tgz
//! ```
//!
//! where the name segments form the package name (two segments for a
//! scoped package such as `@scope/pkg`, or one `@scope%2fpkg` segment),
//! the literal `-` segment separates name from file, and the version is the
//! text after the first `-` in the file stem that starts with
//! `<digits>.<digits>.<digit>`. Segments are percent-decoded.
//!
//! Anything that does not have this shape is not a tarball fetch this
//! module can classify, and parsing returns `None`.

use std::fmt;

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};

/// File extension of registry archives.
pub const TARBALL_EXTENSION: &str = ".tgz";

/// Path segment separating the package name from the archive filename.
pub const SEPARATOR_SEGMENT: &str = "-";

/// Characters escaped when re-deriving a path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/');

/// One published artifact: package name plus version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageReference {
    /// Package name, including any `@scope/` prefix.
    pub name: String,
    /// Version string as it appears in the archive name.
    pub version: String,
}

impl PackageReference {
    /// Create a reference from its parts.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Name without its scope (`pkg` for `@scope/pkg`).
    pub fn basename(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Canonical registry path of this artifact's tarball.
    ///
    /// Only characters the path grammar needs are escaped, so a path that
    /// escaped more (`%2B` for `+`) re-derives to its canonical spelling.
    pub fn tarball_path(&self) -> String {
        let mut path = String::new();
        for segment in self.name.split('/') {
            path.push('/');
            path.extend(utf8_percent_encode(segment, SEGMENT));
        }
        path.push('/');
        path.push_str(SEPARATOR_SEGMENT);
        path.push('/');
        path.extend(utf8_percent_encode(self.basename(), SEGMENT));
        path.push('-');
        path.extend(utf8_percent_encode(&self.version, SEGMENT));
        path.push_str(TARBALL_EXTENSION);
        path
    }
}

impl fmt::Display for PackageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Whether a URL path names a tarball at all.
pub fn is_tarball_path(path: &str) -> bool {
    path.ends_with(TARBALL_EXTENSION)
}

/// Parse a registry tarball path into a package reference.
pub fn parse_tarball_path(path: &str) -> Option<PackageReference> {
    if !is_tarball_path(path) {
        return None;
    }

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 3 || segments[segments.len() - 2] != SEPARATOR_SEGMENT {
        return None;
    }

    let name_segments = &segments[..segments.len() - 2];
    if name_segments.contains(&SEPARATOR_SEGMENT) {
        return None;
    }

    let filename = segments[segments.len() - 1];
    let stem = filename.strip_suffix(TARBALL_EXTENSION)?;
    let version = decode(version_suffix(stem)?)?;

    let name = name_segments
        .iter()
        .map(|s| decode(s))
        .collect::<Option<Vec<_>>>()?
        .join("/");

    Some(PackageReference { name, version })
}

/// Text after the first `-` whose remainder starts like a semver version.
fn version_suffix(stem: &str) -> Option<&str> {
    stem.match_indices('-')
        .map(|(idx, _)| &stem[idx + 1..])
        .find(|candidate| looks_like_version(candidate))
}

/// `<digits>.<digits>.<digit>` followed by anything.
fn looks_like_version(candidate: &str) -> bool {
    let bytes = candidate.as_bytes();
    let mut pos = 0;

    for _ in 0..2 {
        let start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos == start || pos >= bytes.len() || bytes[pos] != b'.' {
            return false;
        }
        pos += 1;
    }

    pos < bytes.len() && bytes[pos].is_ascii_digit()
}

fn decode(segment: &str) -> Option<String> {
    percent_decode_str(segment)
        .decode_utf8()
        .ok()
        .map(|s| s.into_owned())
}
