//! Validation of unpacked trees before they are renamed into the store.

use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("path {0} contains a `..` component")]
    Traversal(PathBuf),
    #[error("symlink {0} has an absolute target {1}")]
    AbsoluteTarget(PathBuf, PathBuf),
    #[error("symlink {0} target {1} contains a `..` component")]
    TargetTraversal(PathBuf, PathBuf),
    #[error("unable to walk tree: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("unable to read symlink {0}: {1}")]
    ReadLink(PathBuf, std::io::Error),
}

fn has_parent_component(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, Component::ParentDir))
}

/// Walk a directory tree without following symlinks, and reject it if any
/// relative path contains `..`, any symlink target is absolute, or any
/// symlink target contains `..`.
///
/// Successful return means the tree cannot reference anything outside
/// itself and is safe to rename into the store.
pub fn validate_tree(root: &Path) -> Result<(), TreeError> {
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .expect("Pandora bug: walked entry not under its root");

        if has_parent_component(rel) {
            return Err(TreeError::Traversal(rel.to_path_buf()));
        }

        if entry.path_is_symlink() {
            let target = fs::read_link(entry.path())
                .map_err(|e| TreeError::ReadLink(entry.path().to_path_buf(), e))?;
            if target.is_absolute() {
                return Err(TreeError::AbsoluteTarget(rel.to_path_buf(), target));
            }
            if has_parent_component(&target) {
                return Err(TreeError::TargetTraversal(rel.to_path_buf(), target));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{validate_tree, TreeError};
    use std::fs;
    use std::os::unix::fs::symlink;

    #[test]
    fn accepts_plain_tree() {
        let dir = tempfile::tempdir().expect("create temp dir");
        fs::create_dir_all(dir.path().join("bin")).expect("mkdir");
        fs::write(dir.path().join("bin/foo"), b"hello\n").expect("write");
        symlink("bin/foo", dir.path().join("link")).expect("symlink");

        validate_tree(dir.path()).expect("must validate");
    }

    #[test]
    fn rejects_absolute_symlink_target() {
        let dir = tempfile::tempdir().expect("create temp dir");
        symlink("/etc/passwd", dir.path().join("evil")).expect("symlink");

        assert!(matches!(
            validate_tree(dir.path()),
            Err(TreeError::AbsoluteTarget(..))
        ));
    }

    #[test]
    fn rejects_dotdot_symlink_target() {
        let dir = tempfile::tempdir().expect("create temp dir");
        symlink("../outside", dir.path().join("evil")).expect("symlink");

        assert!(matches!(
            validate_tree(dir.path()),
            Err(TreeError::TargetTraversal(..))
        ));
    }

    #[test]
    fn relative_symlink_inside_tree_is_fine() {
        let dir = tempfile::tempdir().expect("create temp dir");
        fs::create_dir_all(dir.path().join("a/b")).expect("mkdir");
        fs::write(dir.path().join("a/b/file"), b"x").expect("write");
        symlink("b/file", dir.path().join("a/link")).expect("symlink");

        validate_tree(dir.path()).expect("must validate");
    }
}
