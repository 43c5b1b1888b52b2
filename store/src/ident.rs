//! Package identity: the `(name, version)` pair that keys everything.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Upper bound on name and version length. These end up in directory
/// names, so anything close to a path component limit is already absurd.
const MAX_IDENT_LEN: usize = 100;

#[derive(Debug, Eq, PartialEq, Error)]
pub enum IdentError {
    #[error("empty {0}")]
    Empty(&'static str),
    #[error("{0} too long: {1} bytes")]
    TooLong(&'static str, usize),
    #[error("invalid {0} {1:?}: may not contain '/', NUL or \"..\"")]
    InvalidChars(&'static str, String),
    #[error("missing '@' separator in package spec {0:?}")]
    MissingSeparator(String),
}

/// A package identity.
///
/// Both halves are short, non-empty strings that are safe to use as a
/// single path component: no `/`, no NUL, no `..` sequence, and neither
/// may be `.`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct PkgId {
    name: String,
    version: String,
}

fn validate_part(kind: &'static str, s: &str) -> Result<(), IdentError> {
    if s.is_empty() {
        return Err(IdentError::Empty(kind));
    }
    if s.len() > MAX_IDENT_LEN {
        return Err(IdentError::TooLong(kind, s.len()));
    }
    if s == "." || s.contains("..") || s.contains('/') || s.contains('\0') {
        return Err(IdentError::InvalidChars(kind, s.to_string()));
    }
    Ok(())
}

/// Profile labels live in directory names too, and obey the same rules
/// as the identity halves.
pub(crate) fn validate_label(label: &str) -> Result<(), IdentError> {
    validate_part("label", label)
}

impl PkgId {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Result<Self, IdentError> {
        let name = name.into();
        let version = version.into();
        validate_part("name", &name)?;
        validate_part("version", &version)?;
        Ok(Self { name, version })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for PkgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

impl FromStr for PkgId {
    type Err = IdentError;

    /// Parse a `name@version` package spec.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, version) = s
            .split_once('@')
            .ok_or_else(|| IdentError::MissingSeparator(s.to_string()))?;
        Self::new(name, version)
    }
}
