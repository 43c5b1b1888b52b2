//! The caller-visible error taxonomy.
//!
//! Components return their own error types; the operations layer folds
//! them into this enum. The kinds are disjoint: a given failure maps to
//! exactly one of them, and none implies a retry.

use crate::ident::PkgId;
use pandora_archive::digest::Sha256Digest;
use pandora_archive::tree::TreeError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A required configuration key or environment variable is absent.
    #[error("missing configuration: {0}")]
    ConfigMissing(String),

    /// A config, manifest or index could not be parsed.
    #[error("parse failed: {0}")]
    ParseFailed(String),

    /// The package or version is absent from the index.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network, transport, or local read failure while fetching.
    #[error("fetch failed: {0}")]
    FetchFailed(#[from] crate::fetch::FetchError),

    /// The fetched archive's digest disagrees with the manifest.
    #[error("digest mismatch for {id}: manifest says {expected}, archive is {actual}")]
    HashMismatch {
        id: PkgId,
        expected: Sha256Digest,
        actual: Sha256Digest,
    },

    /// Path-safety validation rejected the unpacked tree.
    #[error("unsafe archive: {0}")]
    UnsafeArchive(#[from] TreeError),

    /// The version is already in the store with a different digest.
    #[error("{id} already in store with digest {existing}, refusing to overwrite with {offered}")]
    StoreConflict {
        id: PkgId,
        existing: String,
        offered: Sha256Digest,
    },

    /// Two profile entries share a normalized relative path.
    #[error("profile conflict on {relpath}: provided by both {first} and {second}")]
    ProfileConflict {
        relpath: String,
        first: PkgId,
        second: PkgId,
    },

    /// A profile entry references a target that does not exist.
    #[error("profile entry {relpath} references missing target {target}")]
    ProfileMissingTarget { relpath: String, target: PathBuf },

    /// Malformed name, version or relative path.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A manifest signature is missing, unknown, or does not verify.
    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),

    /// An OS call failed in a way not attributable to user input.
    #[error("internal error: {context}: {source}")]
    Internal {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Shorthand for wrapping an I/O failure with what we were doing.
    pub(crate) fn internal(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Internal {
            context: context.into(),
            source,
        }
    }
}

impl From<crate::ident::IdentError> for Error {
    fn from(e: crate::ident::IdentError) -> Self {
        Error::InvalidInput(e.to_string())
    }
}
