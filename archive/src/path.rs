//! Relative, slash-separated paths as they appear inside archives and
//! profiles.
//!
//! These are byte paths, not [std::path::Path]s: they are platform
//! independent, always relative, and normalized on construction. Archive
//! tables and profile entries are untrusted input, so `..` is rejected
//! outright rather than resolved.

use bstr::ByteSlice;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Upper bound on a normalized path, matching the usual system PATH_MAX.
pub const MAX_PATH_LEN: usize = 4096;

#[derive(Debug, Eq, PartialEq, Error)]
pub enum PathError {
    #[error("empty path")]
    Empty,
    #[error("absolute path")]
    Absolute,
    #[error("path contains a `..` component")]
    DotDot,
    #[error("path component contains a NUL byte")]
    NulByte,
    #[error("path too long: {0} bytes")]
    TooLong(usize),
}

/// An owned, normalized relative path.
///
/// Invariants: non-empty, no leading or trailing slash, no repeated
/// slashes, and no `.`, `..`, empty or NUL-containing components.
#[derive(Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct RelPathBuf {
    inner: Vec<u8>,
}

impl RelPathBuf {
    /// Normalize a raw byte path.
    ///
    /// Rejects absolute and empty input; splits on `/`, dropping empty and
    /// `.` components; rejects `..` without attempting to resolve it;
    /// rejects NUL bytes and over-long results. The canonical form is the
    /// remaining components joined with single slashes.
    pub fn normalize(raw: &[u8]) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::Empty);
        }
        if raw[0] == b'/' {
            return Err(PathError::Absolute);
        }

        let mut inner = Vec::with_capacity(raw.len());
        for component in raw.split(|b| *b == b'/') {
            match component {
                b"" | b"." => continue,
                b".." => return Err(PathError::DotDot),
                c if c.contains(&0) => return Err(PathError::NulByte),
                c => {
                    if !inner.is_empty() {
                        inner.push(b'/');
                    }
                    inner.extend_from_slice(c);
                }
            }
        }

        // "." and "./." normalize to nothing at all.
        if inner.is_empty() {
            return Err(PathError::Empty);
        }
        if inner.len() >= MAX_PATH_LEN {
            return Err(PathError::TooLong(inner.len()));
        }

        Ok(Self { inner })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.inner
    }

    /// Iterator over the individual components, as byte slices.
    pub fn components(&self) -> impl Iterator<Item = &[u8]> {
        self.inner.split_str(b"/")
    }

    /// The final component.
    pub fn file_name(&self) -> &[u8] {
        self.components().last().expect("paths are non-empty")
    }

    /// Join onto a host filesystem path, component by component.
    #[cfg(unix)]
    pub fn to_fs_path(&self, base: &Path) -> PathBuf {
        use std::os::unix::ffi::OsStrExt;

        let mut out = base.to_path_buf();
        for component in self.components() {
            out.push(OsStr::from_bytes(component));
        }
        out
    }
}

impl FromStr for RelPathBuf {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s.as_bytes())
    }
}

impl fmt::Display for RelPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.inner.as_bstr(), f)
    }
}

impl fmt::Debug for RelPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.inner.as_bstr(), f)
    }
}
