//! SHA-256 digests and the streaming hasher built on top of [sha2].

use data_encoding::HEXLOWER;
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const DIGEST_LEN: usize = 32;

/// Chunk size used when hashing files; memory use stays bounded no matter
/// how large the input file is.
const FILE_CHUNK: usize = 64 * 1024;

/// A SHA-256 digest.
///
/// Displays and parses as 64 characters of lowercase hex, which is also how
/// manifests carry it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha256Digest([u8; DIGEST_LEN]);

#[derive(Debug, Eq, PartialEq, Error)]
pub enum HexError {
    #[error("invalid digest length: expected {} hex characters, got {0}", 2 * DIGEST_LEN)]
    InvalidLength(usize),
    #[error("invalid hex encoding: {0}")]
    InvalidEncoding(data_encoding::DecodeError),
}

#[derive(Debug, Error)]
pub enum HashError {
    #[error("hash failed: unable to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
}

impl Sha256Digest {
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Decode from 64 characters of lowercase hex.
    pub fn from_hex(s: &str) -> Result<Self, HexError> {
        if s.len() != 2 * DIGEST_LEN {
            return Err(HexError::InvalidLength(s.len()));
        }

        let decoded = HEXLOWER
            .decode(s.as_bytes())
            .map_err(HexError::InvalidEncoding)?;

        // The length check above makes this infallible.
        Ok(Self(decoded.try_into().expect("size is known")))
    }

    /// Constant-time equality: every byte position is inspected regardless
    /// of where the first mismatch occurs.
    pub fn ct_eq(&self, other: &Sha256Digest) -> bool {
        let mut diff = 0u8;
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            diff |= a ^ b;
        }
        diff == 0
    }
}

impl From<[u8; DIGEST_LEN]> for Sha256Digest {
    fn from(value: [u8; DIGEST_LEN]) -> Self {
        Self(value)
    }
}

impl TryFrom<&[u8]> for Sha256Digest {
    type Error = HexError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; DIGEST_LEN] = value
            .try_into()
            .map_err(|_| HexError::InvalidLength(value.len()))?;
        Ok(Self(bytes))
    }
}

impl FromStr for Sha256Digest {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&HEXLOWER.encode(&self.0))
    }
}

impl fmt::Debug for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", HEXLOWER.encode(&self.0))
    }
}

/// Incremental SHA-256 hasher.
#[derive(Default)]
pub struct Hasher(Sha256);

impl Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> Sha256Digest {
        Sha256Digest(self.0.finalize().into())
    }
}

/// One-shot hash of an in-memory byte string.
pub fn hash_bytes(data: &[u8]) -> Sha256Digest {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Hash a file by streaming it in [FILE_CHUNK]-sized reads.
pub fn hash_file(path: &Path) -> Result<Sha256Digest, HashError> {
    let mut file = File::open(path).map_err(|e| HashError::Read(path.to_path_buf(), e))?;
    let mut hasher = Hasher::new();
    let mut buf = vec![0u8; FILE_CHUNK];

    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| HashError::Read(path.to_path_buf(), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize())
}

/// A [Write] adapter feeding everything it writes into a [Hasher].
///
/// The fetcher uses this to compute the digest of a download while it is
/// being streamed to disk.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Hasher,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Hasher::new(),
        }
    }

    /// Return the wrapped writer and the digest of all bytes written so far.
    pub fn finalize(self) -> (W, Sha256Digest) {
        (self.inner, self.hasher.finalize())
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
