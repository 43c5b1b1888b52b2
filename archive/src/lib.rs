//! Byte formats used by Pandora, and the safety checks that go with them.
//!
//! This crate is deliberately free of any knowledge about the Pandora root
//! directory: it deals in digests, relative paths and the `.pnd` container,
//! and can be exercised against plain byte buffers and scratch directories.

pub mod digest;
pub mod path;
pub mod pnd;
pub mod tree;

pub use digest::Sha256Digest;
pub use path::RelPathBuf;
