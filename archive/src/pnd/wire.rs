//! Byte layout of the `.pnd` container.
//!
//! All integers are little-endian. The file starts with:
//!
//! ```text
//! offset  bytes   field
//!   0       8     magic = "PNDARCH\x01"
//!   8       8     entry_count (u64)
//!  16     varies  entry table
//!   …     varies  blob region
//! ```
//!
//! Each table entry:
//!
//! ```text
//!   4   path_len (u32)
//!   8   blob_size (u64)
//!   8   blob_offset (u64, absolute from file start; informational)
//!   4   flags (u32; bit 0 = symlink, other bits reserved = 0)
//!   path_len bytes   stored path (relative, no leading slash)
//! ```
//!
//! Blobs are concatenated in table order. `blob_offset` is advisory: a
//! reader derives the real blob positions from `HEADER_LEN + table size`
//! and the running blob sizes, so archives with disagreeing offsets still
//! read correctly. A writer always produces sequential offsets.

pub const MAGIC: [u8; 8] = *b"PNDARCH\x01";

/// Length of magic + entry count.
pub const HEADER_LEN: u64 = 16;

/// Fixed-size part of one table entry (path_len + blob_size + blob_offset
/// + flags), excluding the path bytes.
pub const ENTRY_FIXED_LEN: u64 = 24;

/// Bit 0 of `flags`: the blob is a symlink target rather than file
/// contents.
pub const FLAG_SYMLINK: u32 = 1 << 0;

/// Maximum length of a stored path accepted by the reader. Table entries
/// claiming more than this are treated as corruption rather than as
/// skippable entries.
pub const MAX_PATH_LEN: u32 = 4096;

/// Maximum length of a symlink target blob accepted by the reader.
pub const MAX_TARGET_LEN: u64 = 4095;

/// Upper bound on `entry_count`; a defense against allocating table
/// storage for a crafted header.
pub const MAX_ENTRY_COUNT: u64 = 1 << 20;
