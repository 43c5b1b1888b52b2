//! The profile assembler: building a symlink forest in a staging
//! directory.
//!
//! Assembly happens entirely inside a `.tmp-profile-*` directory under
//! `profiles/`; the activator later renames it into place. Any failure
//! tears the staging directory down, so a rejected assembly leaves no
//! trace.

use crate::error::Error;
use crate::ident::PkgId;
use crate::layout::{mkdir_p, PandoraRoot};
use pandora_archive::RelPathBuf;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, instrument};

/// One requested symlink: `relpath` inside the profile, pointing at
/// `target`, on behalf of `pkg`.
#[derive(Clone, Debug)]
pub struct ProfileEntry {
    pub relpath: String,
    pub target: PathBuf,
    pub pkg: PkgId,
}

/// An assembled-but-unactivated profile. Dropping it deletes the staging
/// directory; the activator consumes it instead.
#[derive(Debug)]
pub struct StagedProfile {
    dir: Option<TempDir>,
}

impl StagedProfile {
    pub fn path(&self) -> &Path {
        self.dir
            .as_ref()
            .expect("Pandora bug: staged profile used after activation")
            .path()
    }

    /// Give up ownership after the directory was renamed away; the
    /// original path no longer exists, so there is nothing to delete.
    pub(crate) fn dissolve(mut self) {
        if let Some(dir) = self.dir.take() {
            let _ = dir.into_path();
        }
    }
}

/// Derive profile entries from the store entries of `ids`, in order:
/// every path a package's `.manifest` lists becomes a symlink to the
/// corresponding file under `store/<name>/<version>/files/`.
pub fn entries_for(root: &PandoraRoot, ids: &[PkgId]) -> Result<Vec<ProfileEntry>, Error> {
    let mut entries = Vec::new();
    for id in ids {
        let entry_dir = root.store_entry(id);
        let manifest = fs::read_to_string(entry_dir.join(".manifest"))
            .map_err(|_| Error::NotFound(format!("{id} is not in the store")))?;

        for line in manifest.lines() {
            if line.is_empty() {
                continue;
            }
            entries.push(ProfileEntry {
                relpath: line.to_string(),
                target: entry_dir.join("files").join(line),
                pkg: id.clone(),
            });
        }
    }
    Ok(entries)
}

/// Build a symlink forest from `entries` in a fresh staging directory.
///
/// Entries are processed in order; each relpath is normalized, its
/// target checked for existence, and collisions on normalized paths
/// reported with both owners named. On success the caller owns the
/// returned [StagedProfile] and must either activate or drop it.
#[instrument(skip_all, fields(entries = entries.len()), err)]
pub fn assemble(root: &PandoraRoot, entries: &[ProfileEntry]) -> Result<StagedProfile, Error> {
    mkdir_p(&root.profiles_dir())?;
    let tmp = tempfile::Builder::new()
        .prefix(".tmp-profile-")
        .tempdir_in(root.profiles_dir())
        .map_err(|e| Error::internal("unable to create profile staging directory", e))?;

    let mut owners: HashMap<RelPathBuf, PkgId> = HashMap::new();

    for entry in entries {
        let norm = RelPathBuf::normalize(entry.relpath.as_bytes()).map_err(|e| {
            Error::InvalidInput(format!(
                "profile entry {:?} from {}: {e}",
                entry.relpath, entry.pkg
            ))
        })?;

        if fs::symlink_metadata(&entry.target).is_err() {
            return Err(Error::ProfileMissingTarget {
                relpath: norm.to_string(),
                target: entry.target.clone(),
            });
        }

        if let Some(first) = owners.get(&norm) {
            return Err(Error::ProfileConflict {
                relpath: norm.to_string(),
                first: first.clone(),
                second: entry.pkg.clone(),
            });
        }

        let dest = norm.to_fs_path(tmp.path());
        if let Some(parent) = dest.parent() {
            mkdir_p(parent)?;
        }

        match fs::symlink_metadata(&dest) {
            // a directory here means some accepted entry lives below
            // this path; report that owner
            Ok(meta) if meta.is_dir() => {
                let below = owners
                    .iter()
                    .find(|(p, _)| {
                        p.as_bytes().len() > norm.as_bytes().len()
                            && p.as_bytes().starts_with(norm.as_bytes())
                            && p.as_bytes()[norm.as_bytes().len()] == b'/'
                    })
                    .map(|(_, pkg)| pkg.clone())
                    .unwrap_or_else(|| entry.pkg.clone());
                return Err(Error::ProfileConflict {
                    relpath: norm.to_string(),
                    first: below,
                    second: entry.pkg.clone(),
                });
            }
            Ok(_) => {
                fs::remove_file(&dest)
                    .map_err(|e| Error::internal("unable to clear stale profile entry", e))?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::internal("unable to inspect staging path", e)),
        }

        let target = if entry.target.is_absolute() {
            entry.target.clone()
        } else {
            fs::canonicalize(&entry.target)
                .map_err(|e| Error::internal("unable to resolve profile target", e))?
        };
        symlink(&target, &dest)
            .map_err(|e| Error::internal("unable to create profile symlink", e))?;

        owners.insert(norm, entry.pkg.clone());
    }

    debug!(path = %tmp.path().display(), "profile staged");
    Ok(StagedProfile { dir: Some(tmp) })
}

#[cfg(test)]
mod tests {
    use super::{assemble, entries_for, ProfileEntry};
    use crate::error::Error;
    use crate::ident::PkgId;
    use crate::layout::PandoraRoot;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn test_root() -> (TempDir, PandoraRoot) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let root = PandoraRoot::at(dir.path().join("pandora"));
        root.fs_init(false).expect("init");
        (dir, root)
    }

    fn entry(relpath: &str, target: &Path, pkg: &str) -> ProfileEntry {
        ProfileEntry {
            relpath: relpath.to_string(),
            target: target.to_path_buf(),
            pkg: pkg.parse().expect("pkg id"),
        }
    }

    fn no_staging_debris(root: &PandoraRoot) -> bool {
        fs::read_dir(root.profiles_dir())
            .expect("read dir")
            .flatten()
            .all(|e| !e.file_name().to_string_lossy().starts_with(".tmp-profile-"))
    }

    #[test]
    fn assembles_symlink_forest() {
        let (dir, root) = test_root();
        let target = dir.path().join("a-file");
        fs::write(&target, b"x").expect("write");

        let staged = assemble(
            &root,
            &[
                entry("bin/x", &target, "a@1"),
                entry("share/doc/readme", &target, "a@1"),
            ],
        )
        .expect("assemble");

        assert_eq!(target, fs::read_link(staged.path().join("bin/x")).expect("readlink"));
        assert_eq!(
            target,
            fs::read_link(staged.path().join("share/doc/readme")).expect("readlink")
        );

        drop(staged);
        assert!(no_staging_debris(&root), "dropped staging dir must vanish");
    }

    #[test]
    fn conflict_names_both_owners() {
        let (dir, root) = test_root();
        let target = dir.path().join("a-file");
        fs::write(&target, b"x").expect("write");

        let err = assemble(
            &root,
            &[
                entry("bin/x", &target, "a@1"),
                entry("bin/./x", &target, "b@1"),
            ],
        )
        .expect_err("must conflict");

        match err {
            Error::ProfileConflict {
                relpath,
                first,
                second,
            } => {
                assert_eq!("bin/x", relpath);
                assert_eq!("a@1", first.to_string());
                assert_eq!("b@1", second.to_string());
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert!(no_staging_debris(&root), "failed assembly must clean up");
    }

    #[test]
    fn missing_target_rejected() {
        let (dir, root) = test_root();
        let err = assemble(
            &root,
            &[entry("bin/x", &dir.path().join("nope"), "a@1")],
        )
        .expect_err("must fail");

        assert!(matches!(err, Error::ProfileMissingTarget { .. }));
        assert!(no_staging_debris(&root));
    }

    #[test]
    fn invalid_relpath_rejected() {
        let (dir, root) = test_root();
        let target = dir.path().join("a-file");
        fs::write(&target, b"x").expect("write");

        let err = assemble(&root, &[entry("../escape", &target, "a@1")]).expect_err("must fail");
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(no_staging_debris(&root));
    }

    #[test]
    fn file_over_directory_conflicts() {
        let (dir, root) = test_root();
        let target = dir.path().join("a-file");
        fs::write(&target, b"x").expect("write");

        let err = assemble(
            &root,
            &[entry("bin/x", &target, "a@1"), entry("bin", &target, "b@1")],
        )
        .expect_err("must conflict");

        match err {
            Error::ProfileConflict { relpath, first, .. } => {
                assert_eq!("bin", relpath);
                assert_eq!("a@1", first.to_string());
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert!(no_staging_debris(&root));
    }

    #[test]
    fn entries_for_reads_store_manifests() {
        let (_dir, root) = test_root();
        let id: PkgId = "foo@1.0".parse().expect("id");
        let entry_dir = root.store_entry(&id);
        fs::create_dir_all(entry_dir.join("files/bin")).expect("mkdir");
        fs::write(entry_dir.join("files/bin/foo"), b"x").expect("write");
        fs::write(entry_dir.join(".manifest"), "bin/foo\n").expect("write");

        let entries = entries_for(&root, std::slice::from_ref(&id)).expect("entries");
        assert_eq!(1, entries.len());
        assert_eq!("bin/foo", entries[0].relpath);
        assert_eq!(
            PathBuf::from(entry_dir.join("files/bin/foo")),
            entries[0].target
        );

        let staged = assemble(&root, &entries).expect("assemble");
        assert!(staged.path().join("bin/foo").is_symlink());
    }

    #[test]
    fn entries_for_missing_package() {
        let (_dir, root) = test_root();
        let id: PkgId = "ghost@0.0".parse().expect("id");
        assert!(matches!(
            entries_for(&root, std::slice::from_ref(&id)),
            Err(Error::NotFound(_))
        ));
    }
}
