//! Packing trees and files into `.pnd` archives.

use super::wire;
use crate::path::{PathError, RelPathBuf};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum PackError {
    #[error("unable to resolve input {0}: {1}")]
    Resolve(PathBuf, io::Error),
    #[error("unable to walk {0}: {1}")]
    Walk(PathBuf, walkdir::Error),
    #[error("invalid stored path for {0}: {1}")]
    StoredPath(PathBuf, PathError),
    #[error("unable to read {0}: {1}")]
    Read(PathBuf, io::Error),
    #[error("unable to write archive: {0}")]
    Write(io::Error),
}

enum Blob {
    File { source: PathBuf, size: u64 },
    Symlink { target: Vec<u8> },
}

struct Entry {
    stored: RelPathBuf,
    blob: Blob,
}

impl Entry {
    fn blob_size(&self) -> u64 {
        match &self.blob {
            Blob::File { size, .. } => *size,
            Blob::Symlink { target } => target.len() as u64,
        }
    }

    fn flags(&self) -> u32 {
        match &self.blob {
            Blob::File { .. } => 0,
            Blob::Symlink { .. } => wire::FLAG_SYMLINK,
        }
    }
}

/// Pack the given inputs into a `.pnd` archive written to `writer`.
///
/// A file input is stored under its basename; a directory input
/// contributes every regular file and symlink beneath it, stored under
/// its path relative to that directory, enumerated by a stable
/// depth-first walk. Device, fifo and socket nodes are skipped with a
/// warning. Blob offsets are sequential, so packing the same inputs
/// twice produces byte-identical archives.
pub fn pack<W: Write>(writer: &mut W, inputs: &[PathBuf]) -> Result<(), PackError> {
    let mut entries = Vec::new();
    for input in inputs {
        enumerate_input(input, &mut entries)?;
    }

    let table_len: u64 = entries
        .iter()
        .map(|e| wire::ENTRY_FIXED_LEN + e.stored.as_bytes().len() as u64)
        .sum();

    writer.write_all(&wire::MAGIC).map_err(PackError::Write)?;
    writer
        .write_all(&(entries.len() as u64).to_le_bytes())
        .map_err(PackError::Write)?;

    let mut offset = wire::HEADER_LEN + table_len;
    for entry in &entries {
        let path = entry.stored.as_bytes();
        writer
            .write_all(&(path.len() as u32).to_le_bytes())
            .map_err(PackError::Write)?;
        writer
            .write_all(&entry.blob_size().to_le_bytes())
            .map_err(PackError::Write)?;
        writer
            .write_all(&offset.to_le_bytes())
            .map_err(PackError::Write)?;
        writer
            .write_all(&entry.flags().to_le_bytes())
            .map_err(PackError::Write)?;
        writer.write_all(path).map_err(PackError::Write)?;
        offset += entry.blob_size();
    }

    for entry in &entries {
        match &entry.blob {
            Blob::Symlink { target } => {
                writer.write_all(target).map_err(PackError::Write)?;
            }
            Blob::File { source, size } => {
                write_file_blob(writer, source, *size, &entry.stored)?;
            }
        }
    }

    writer.flush().map_err(PackError::Write)
}

/// Stream exactly `size` bytes of `source` into the archive.
///
/// The size was recorded at enumeration time; if the file has changed
/// since, the blob is truncated or zero-padded to the recorded size with
/// a warning, never a failure.
fn write_file_blob<W: Write>(
    writer: &mut W,
    source: &Path,
    size: u64,
    stored: &RelPathBuf,
) -> Result<(), PackError> {
    let mut file = File::open(source).map_err(|e| PackError::Read(source.to_path_buf(), e))?;

    let copied = io::copy(&mut (&mut file).take(size), writer).map_err(PackError::Write)?;
    if copied < size {
        warn!(path = %stored, expected = size, actual = copied, "file shrank during pack, padding blob");
        let mut remaining = size - copied;
        let zeroes = [0u8; 4096];
        while remaining > 0 {
            let n = remaining.min(zeroes.len() as u64) as usize;
            writer.write_all(&zeroes[..n]).map_err(PackError::Write)?;
            remaining -= n as u64;
        }
    } else {
        // Probe one byte past the recorded size to notice growth.
        let mut probe = [0u8; 1];
        match file.read(&mut probe) {
            Ok(0) => {}
            Ok(_) => {
                warn!(path = %stored, expected = size, "file grew during pack, truncating blob");
            }
            Err(e) => return Err(PackError::Read(source.to_path_buf(), e)),
        }
    }

    Ok(())
}

fn enumerate_input(input: &Path, entries: &mut Vec<Entry>) -> Result<(), PackError> {
    let canonical =
        fs::canonicalize(input).map_err(|e| PackError::Resolve(input.to_path_buf(), e))?;
    let meta = fs::symlink_metadata(&canonical)
        .map_err(|e| PackError::Resolve(canonical.clone(), e))?;

    if meta.is_dir() {
        enumerate_dir(&canonical, entries)
    } else if meta.is_file() {
        let name = canonical
            .file_name()
            .expect("Pandora bug: canonical file path has no basename");
        let stored = RelPathBuf::normalize(name.as_bytes())
            .map_err(|e| PackError::StoredPath(canonical.clone(), e))?;
        entries.push(Entry {
            stored,
            blob: Blob::File {
                source: canonical,
                size: meta.len(),
            },
        });
        Ok(())
    } else {
        warn!(path = %canonical.display(), "skipping special file input");
        Ok(())
    }
}

fn enumerate_dir(root: &Path, entries: &mut Vec<Entry>) -> Result<(), PackError> {
    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| PackError::Walk(root.to_path_buf(), e))?;
        let file_type = entry.file_type();

        if file_type.is_dir() {
            // Directories are implied by the stored paths of their contents.
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(root)
            .expect("Pandora bug: walked entry not under its root");
        let stored = RelPathBuf::normalize(rel.as_os_str().as_bytes())
            .map_err(|e| PackError::StoredPath(entry.path().to_path_buf(), e))?;

        if file_type.is_symlink() {
            let target = fs::read_link(entry.path())
                .map_err(|e| PackError::Read(entry.path().to_path_buf(), e))?;
            entries.push(Entry {
                stored,
                blob: Blob::Symlink {
                    target: target.as_os_str().as_bytes().to_vec(),
                },
            });
        } else if file_type.is_file() {
            let meta = entry
                .metadata()
                .map_err(|e| PackError::Walk(entry.path().to_path_buf(), e))?;
            entries.push(Entry {
                stored,
                blob: Blob::File {
                    source: entry.path().to_path_buf(),
                    size: meta.len(),
                },
            });
        } else {
            warn!(path = %entry.path().display(), "skipping special file");
        }
    }

    Ok(())
}
