//! Promoting a staged profile to live, and going back.
//!
//! The user-visible commit point is a single rename of `vir-new` onto
//! `vir`; everything before it is invisible, and `vir` itself is the
//! sole truth about what is active. The transaction log written
//! afterwards is diagnostic only; a failure to write it does not
//! un-succeed the activation.

use crate::error::Error;
use crate::ident;
use crate::layout::{mkdir_p, process_stamp, PandoraRoot};
use crate::profile::StagedProfile;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, instrument, warn};

/// Atomically repoint `vir` at `target` via the `vir-new` staging link.
pub(crate) fn swap_live(root: &PandoraRoot, target: &Path) -> Result<(), Error> {
    let vir_new = root.vir_new();
    match fs::remove_file(&vir_new) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(Error::internal("unable to clear vir-new", e)),
    }

    symlink(target, &vir_new).map_err(|e| Error::internal("unable to stage vir-new", e))?;
    fs::rename(&vir_new, root.vir())
        .map_err(|e| Error::internal("unable to swap live pointer", e))?;

    Ok(())
}

fn write_txn_log(root: &PandoraRoot, pid: u32, nsec: u128, activated: &Path) {
    let log = root.tmp_dir().join(format!("txn-{pid}-{nsec}.log"));
    if let Err(e) = fs::write(&log, format!("activated={}\n", activated.display())) {
        // vir is the sole truth; the log is best-effort diagnostics
        warn!(log = %log.display(), err = %e, "unable to write transaction log");
    }
}

/// Promote a staged profile: rename it to its permanent
/// `<label>-<pid>-<nsec>` name, then swap the live pointer onto it.
#[instrument(skip(root, staged), err)]
pub fn activate(
    root: &PandoraRoot,
    staged: StagedProfile,
    label: &str,
) -> Result<PathBuf, Error> {
    ident::validate_label(label)?;
    mkdir_p(&root.profiles_dir())?;

    let (pid, nsec) = process_stamp();
    let final_path = root.profiles_dir().join(format!("{label}-{pid}-{nsec}"));

    fs::rename(staged.path(), &final_path).map_err(|e| {
        Error::internal(
            format!("unable to stage profile at {}", final_path.display()),
            e,
        )
    })?;
    staged.dissolve();

    swap_live(root, &final_path)?;
    write_txn_log(root, pid, nsec, &final_path);
    debug!(profile = %final_path.display(), "profile activated");

    Ok(final_path)
}

/// Profiles under `profiles/`, newest first by modification time,
/// staging directories excluded.
pub(crate) fn list_profiles_newest_first(
    root: &PandoraRoot,
) -> Result<Vec<(PathBuf, SystemTime)>, Error> {
    let dir = root.profiles_dir();
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::internal(format!("unable to read {}", dir.display()), e)),
    };

    let mut profiles = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| Error::internal(format!("unable to read {}", dir.display()), e))?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let meta = entry
            .metadata()
            .map_err(|e| Error::internal("unable to stat profile", e))?;
        if !meta.is_dir() {
            continue;
        }
        let mtime = meta
            .modified()
            .map_err(|e| Error::internal("unable to read profile mtime", e))?;
        profiles.push((entry.path(), mtime));
    }

    profiles.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
    Ok(profiles)
}

/// Re-activate the most recent profile older than the one `vir` names.
pub fn rollback(root: &PandoraRoot) -> Result<PathBuf, Error> {
    let current = root
        .active_profile()?
        .ok_or_else(|| Error::NotFound("no active profile to roll back from".to_string()))?;

    let profiles = list_profiles_newest_first(root)?;
    let previous = match profiles.iter().position(|(p, _)| *p == current) {
        Some(pos) => profiles.get(pos + 1),
        // vir points at something unknown (possibly deleted); the newest
        // real profile is the best we can do
        None => profiles.first(),
    };

    let (previous, _) = previous.ok_or_else(|| {
        Error::NotFound("no previous profile to roll back to".to_string())
    })?;

    swap_live(root, previous)?;
    let (pid, nsec) = process_stamp();
    write_txn_log(root, pid, nsec, previous);
    debug!(profile = %previous.display(), "rolled back");

    Ok(previous.clone())
}
