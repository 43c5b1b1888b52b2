//! Unpacking `.pnd` archives into a destination directory.

use super::wire;
use crate::path::RelPathBuf;
use std::fs::{self, DirBuilder, File};
use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{symlink, DirBuilderExt};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum UnpackError {
    #[error("bad magic: not a .pnd archive")]
    BadMagic,
    #[error("archive truncated")]
    Truncated,
    #[error("unable to read archive: {0}")]
    Read(io::Error),
    #[error("entry count {0} exceeds limit")]
    TooManyEntries(u64),
    #[error("entry path length {0} exceeds limit")]
    PathTooLong(u32),
    #[error("symlink target length {0} exceeds limit")]
    TargetTooLong(u64),
    #[error("unable to create directory {0}: {1}")]
    Mkdir(PathBuf, io::Error),
    #[error("unable to write {0}: {1}")]
    Write(PathBuf, io::Error),
    #[error("unable to create symlink {0}: {1}")]
    Symlink(PathBuf, io::Error),
    #[error("unable to write manifest: {0}")]
    Manifest(io::Error),
}

/// Outcome of an unpack: the accepted paths in table order (also written
/// to `dest/.manifest`), and how many entries were skipped for carrying
/// unusable stored paths.
pub struct UnpackSummary {
    pub manifest: Vec<RelPathBuf>,
    pub skipped: usize,
}

struct TableEntry {
    // None for entries whose stored path failed sanitization; their blob
    // still occupies space in the blob region and must be consumed.
    path: Option<RelPathBuf>,
    size: u64,
    symlink: bool,
}

fn read_err(e: io::Error) -> UnpackError {
    if e.kind() == ErrorKind::UnexpectedEof {
        UnpackError::Truncated
    } else {
        UnpackError::Read(e)
    }
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32, UnpackError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).map_err(read_err)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64, UnpackError> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).map_err(read_err)?;
    Ok(u64::from_le_bytes(buf))
}

/// Unpack an archive into `dest`, which must already exist.
///
/// Stored paths are sanitized with [RelPathBuf::normalize]; entries whose
/// path does not survive sanitization are skipped, with the stream still
/// advancing past their blobs. The stored `blob_offset` fields are
/// ignored; blob positions are derived from the table alone, so archives
/// with disagreeing offsets still unpack correctly.
///
/// On success `dest/.manifest` lists the accepted relative paths, one per
/// line, in table order.
pub fn unpack<R: Read>(reader: &mut R, dest: &Path) -> Result<UnpackSummary, UnpackError> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic).map_err(read_err)?;
    if magic != wire::MAGIC {
        return Err(UnpackError::BadMagic);
    }

    let entry_count = read_u64(reader)?;
    if entry_count > wire::MAX_ENTRY_COUNT {
        return Err(UnpackError::TooManyEntries(entry_count));
    }

    let mut table = Vec::with_capacity(entry_count as usize);
    let mut skipped = 0usize;
    for _ in 0..entry_count {
        let path_len = read_u32(reader)?;
        let size = read_u64(reader)?;
        let _blob_offset = read_u64(reader)?;
        let flags = read_u32(reader)?;

        if path_len > wire::MAX_PATH_LEN {
            return Err(UnpackError::PathTooLong(path_len));
        }
        let mut raw = vec![0u8; path_len as usize];
        reader.read_exact(&mut raw).map_err(read_err)?;

        let path = match RelPathBuf::normalize(&raw) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(path = %String::from_utf8_lossy(&raw), err = %e, "skipping archive entry with unusable path");
                skipped += 1;
                None
            }
        };

        table.push(TableEntry {
            path,
            size,
            symlink: flags & wire::FLAG_SYMLINK != 0,
        });
    }

    // The table has been fully consumed, so the stream now sits at the
    // start of the blob region.
    let mut manifest = Vec::new();
    for entry in &table {
        let Some(path) = &entry.path else {
            discard(reader, entry.size)?;
            continue;
        };

        let target_path = path.to_fs_path(dest);
        ensure_parents(dest, path)?;

        if entry.symlink {
            if entry.size > wire::MAX_TARGET_LEN {
                return Err(UnpackError::TargetTooLong(entry.size));
            }
            let mut target = vec![0u8; entry.size as usize];
            reader.read_exact(&mut target).map_err(read_err)?;

            remove_existing(&target_path)
                .map_err(|e| UnpackError::Symlink(target_path.clone(), e))?;
            symlink(std::ffi::OsStr::from_bytes(&target), &target_path)
                .map_err(|e| UnpackError::Symlink(target_path.clone(), e))?;
        } else {
            // A leftover symlink at this path would redirect the write;
            // drop it rather than following it.
            if let Ok(meta) = fs::symlink_metadata(&target_path) {
                if meta.file_type().is_symlink() {
                    fs::remove_file(&target_path)
                        .map_err(|e| UnpackError::Write(target_path.clone(), e))?;
                }
            }

            let mut file = File::create(&target_path)
                .map_err(|e| UnpackError::Write(target_path.clone(), e))?;
            let copied = io::copy(&mut Read::by_ref(reader).take(entry.size), &mut file)
                .map_err(|e| UnpackError::Write(target_path.clone(), e))?;
            if copied < entry.size {
                return Err(UnpackError::Truncated);
            }
            file.flush()
                .map_err(|e| UnpackError::Write(target_path.clone(), e))?;
        }

        manifest.push(path.clone());
    }

    write_manifest(dest, &manifest)?;

    Ok(UnpackSummary { manifest, skipped })
}

/// Consume and discard a skipped entry's blob.
fn discard<R: Read>(reader: &mut R, size: u64) -> Result<(), UnpackError> {
    let copied =
        io::copy(&mut Read::by_ref(reader).take(size), &mut io::sink()).map_err(UnpackError::Read)?;
    if copied < size {
        return Err(UnpackError::Truncated);
    }
    Ok(())
}

/// Create the parent directories of `path` under `dest`, one component at
/// a time. A pre-existing symlink or file where a directory is needed is
/// removed rather than followed, so no write can be redirected outside
/// `dest`.
fn ensure_parents(dest: &Path, path: &RelPathBuf) -> Result<(), UnpackError> {
    let components: Vec<&[u8]> = path.components().collect();
    let mut current = dest.to_path_buf();

    for component in &components[..components.len() - 1] {
        current.push(std::ffi::OsStr::from_bytes(component));
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.is_dir() => continue,
            Ok(_) => {
                fs::remove_file(&current).map_err(|e| UnpackError::Mkdir(current.clone(), e))?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(UnpackError::Mkdir(current.clone(), e)),
        }
        DirBuilder::new()
            .mode(0o755)
            .create(&current)
            .map_err(|e| UnpackError::Mkdir(current.clone(), e))?;
    }

    Ok(())
}

/// Remove whatever currently sits at `path`, without traversing through a
/// symlink.
fn remove_existing(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => fs::remove_file(path),
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn write_manifest(dest: &Path, manifest: &[RelPathBuf]) -> Result<(), UnpackError> {
    let mut out = Vec::new();
    for path in manifest {
        out.extend_from_slice(path.as_bytes());
        out.push(b'\n');
    }

    let mut file = File::create(dest.join(".manifest")).map_err(UnpackError::Manifest)?;
    file.write_all(&out).map_err(UnpackError::Manifest)?;
    file.flush().map_err(UnpackError::Manifest)
}
