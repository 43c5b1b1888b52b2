//! The immutable store importer.
//!
//! An import unpacks a verified archive inside a temp directory under
//! `store/`, validates the tree, and publishes it with a single rename.
//! Everything before the rename is invisible to readers; everything
//! after it is immutable. The temp directory is scoped, so every failure
//! path tears it down.

use crate::error::Error;
use crate::ident::PkgId;
use crate::layout::{mkdir_p, PandoraRoot};
use pandora_archive::digest::Sha256Digest;
use pandora_archive::{pnd, tree};
use std::fs::{self, File, Permissions};
use std::io::BufReader;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// The digest recorded when a store entry was published, if the entry
/// exists and carries one.
pub(crate) fn recorded_digest(entry: &Path) -> Option<String> {
    fs::read_to_string(entry.join(".digest"))
        .ok()
        .map(|s| s.trim().to_string())
}

/// Atomically place the archive at `pkg_file` into the store as `id`.
///
/// Idempotent: if `store/<name>/<version>` already exists with the same
/// recorded digest, the existing path is returned untouched. The same
/// pair with a different digest is a conflict, never an overwrite. The
/// caller must hold the mutation lock and have verified `expected`
/// against the archive bytes.
#[instrument(skip(root, pkg_file), fields(id = %id), err)]
pub fn import(
    root: &PandoraRoot,
    pkg_file: &Path,
    id: &PkgId,
    expected: &Sha256Digest,
) -> Result<PathBuf, Error> {
    let final_path = root.store_entry(id);

    let tmp = tempfile::Builder::new()
        .prefix(".tmp-import-")
        .permissions(Permissions::from_mode(0o700))
        .tempdir_in(root.store_dir())
        .map_err(|e| Error::internal("unable to create import temp directory", e))?;

    let version_dir = tmp.path().join(id.name()).join(id.version());
    let files_dir = version_dir.join("files");
    mkdir_p(&files_dir)?;

    let file = File::open(pkg_file)
        .map_err(|e| Error::internal(format!("unable to open {}", pkg_file.display()), e))?;
    pnd::unpack(&mut BufReader::new(file), &files_dir)
        .map_err(|e| Error::ParseFailed(format!("unable to unpack archive for {id}: {e}")))?;

    // The unpacker leaves its .manifest inside the destination; a store
    // entry keeps it next to files/, not inside it.
    fs::rename(files_dir.join(".manifest"), version_dir.join(".manifest"))
        .map_err(|e| Error::internal("unable to place entry manifest", e))?;

    tree::validate_tree(&files_dir)?;

    fs::write(version_dir.join(".digest"), format!("{expected}\n"))
        .map_err(|e| Error::internal("unable to record entry digest", e))?;

    mkdir_p(&root.store_dir().join(id.name()))?;

    if fs::symlink_metadata(&final_path).is_ok() {
        let existing = recorded_digest(&final_path).unwrap_or_default();
        if existing == expected.to_string() {
            debug!(path = %final_path.display(), "store entry already present, idempotent import");
            return Ok(final_path);
        }
        return Err(Error::StoreConflict {
            id: id.clone(),
            existing,
            offered: *expected,
        });
    }

    // The commit point: one rename publishes the whole entry.
    fs::rename(&version_dir, &final_path)
        .map_err(|e| Error::internal(format!("unable to publish {}", final_path.display()), e))?;
    debug!(path = %final_path.display(), "store entry published");

    Ok(final_path)
}
