//! The `.pnd` package container.
//!
//! A `.pnd` archive is a flat container: an 8-byte magic, a `u64` entry
//! count, a table describing every entry (stored path, blob size, blob
//! offset, flags), and a blob region holding the entry contents in table
//! order. Regular file blobs are raw contents; symlink blobs are the link
//! target bytes. See [wire] for the exact byte layout.
//!
//! Packing the same inputs twice yields byte-identical archives; unpacking
//! the same archive into empty directories yields byte-identical trees and
//! identical `.manifest` files. Stored paths are untrusted and are
//! sanitized on the way out, so an archive cannot cause writes outside its
//! destination directory.

pub mod wire;

mod reader;
mod writer;

pub use reader::{unpack, UnpackError, UnpackSummary};
pub use writer::{pack, PackError};
