//! Garbage collection: the one operation that deletes published state.
//!
//! Profiles are superseded by activation but reaped only here; store
//! entries are immutable but deleted here once no surviving profile
//! references them. The live profile and everything it points at are
//! never collected.

use crate::activate::list_profiles_newest_first;
use crate::error::Error;
use crate::layout::PandoraRoot;
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

#[derive(Debug, Default, Eq, PartialEq)]
pub struct GcStats {
    pub profiles_removed: usize,
    pub entries_removed: usize,
}

/// The `store/<name>/<version>` prefix of a symlink target, if the
/// target points into the store.
fn store_entry_of(store_dir: &Path, target: &Path) -> Option<PathBuf> {
    let rest = target.strip_prefix(store_dir).ok()?;
    let mut components = rest.components();
    let name = match components.next()? {
        Component::Normal(c) => c.to_owned(),
        _ => return None,
    };
    let version = match components.next()? {
        Component::Normal(c) => c.to_owned(),
        _ => return None,
    };
    Some(store_dir.join(name).join(version))
}

/// Collect the store entries referenced by the symlinks of `profile`.
fn referenced_entries(
    store_dir: &Path,
    profile: &Path,
    into: &mut HashSet<PathBuf>,
) -> Result<(), Error> {
    for entry in WalkDir::new(profile).follow_links(false) {
        let entry = entry.map_err(|e| {
            Error::internal(
                format!("unable to walk {}", profile.display()),
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walk failed")),
            )
        })?;
        if !entry.path_is_symlink() {
            continue;
        }
        let target = fs::read_link(entry.path())
            .map_err(|e| Error::internal("unable to read profile symlink", e))?;
        if let Some(store_entry) = store_entry_of(store_dir, &target) {
            into.insert(store_entry);
        }
    }
    Ok(())
}

/// Remove profiles that are neither live nor among the `keep` most
/// recent, then remove store entries no surviving profile references.
/// The caller holds the mutation lock.
#[instrument(skip(root), err)]
pub fn gc(root: &PandoraRoot, keep: usize) -> Result<GcStats, Error> {
    let mut stats = GcStats::default();
    let active = root.active_profile()?;
    let store_dir = root.store_dir();

    let mut survivors = Vec::new();
    for (index, (profile, _)) in list_profiles_newest_first(root)?.into_iter().enumerate() {
        if Some(&profile) == active.as_ref() || index < keep {
            survivors.push(profile);
            continue;
        }
        debug!(profile = %profile.display(), "collecting profile");
        fs::remove_dir_all(&profile)
            .map_err(|e| Error::internal(format!("unable to remove {}", profile.display()), e))?;
        stats.profiles_removed += 1;
    }

    let mut referenced = HashSet::new();
    for profile in &survivors {
        referenced_entries(&store_dir, profile, &mut referenced)?;
    }

    for id in root.list_store()? {
        let entry = root.store_entry(&id);
        if referenced.contains(&entry) {
            continue;
        }
        debug!(entry = %entry.display(), "collecting store entry");
        fs::remove_dir_all(&entry)
            .map_err(|e| Error::internal(format!("unable to remove {}", entry.display()), e))?;
        stats.entries_removed += 1;

        // drop the name directory once its last version is gone
        let name_dir = entry.parent().expect("store entries have a parent");
        if fs::read_dir(name_dir).map(|mut d| d.next().is_none()).unwrap_or(false) {
            let _ = fs::remove_dir(name_dir);
        }
    }

    // transaction logs whose profile no longer exists are stale
    if let Ok(entries) = fs::read_dir(root.tmp_dir()) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("txn-") || !name.ends_with(".log") {
                continue;
            }
            let Ok(body) = fs::read_to_string(entry.path()) else {
                continue;
            };
            let activated = body
                .lines()
                .find_map(|l| l.strip_prefix("activated="))
                .map(PathBuf::from);
            if let Some(profile) = activated {
                if fs::symlink_metadata(&profile).is_err() {
                    if let Err(e) = fs::remove_file(entry.path()) {
                        warn!(log = %entry.path().display(), err = %e, "unable to remove stale txn log");
                    }
                }
            }
        }
    }

    Ok(stats)
}
