//! The operations the CLI drives: init, fetch, install, rollback, gc.
//!
//! Each operation bootstraps the root, takes the mutation lock for its
//! whole extent, and runs the recovery sweep before doing anything else.
//! The pipeline for install is registry → manifest (signature checked) →
//! archive (digest checked) → store import → profile assembly →
//! activation; every arrow is a checkpoint with no visible side effects
//! past a failure.

use crate::activate;
use crate::error::Error;
use crate::fetch;
use crate::gc::{self, GcStats};
use crate::ident::PkgId;
use crate::import;
use crate::layout::PandoraRoot;
use crate::lock::MutationLock;
use crate::manifest::Manifest;
use crate::profile;
use crate::registry::Registry;
use crate::signature::{self, VerifyingKey};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, instrument};

pub struct InstallOptions {
    pub index_url: String,
    pub profile: String,
    pub activate: bool,
}

impl InstallOptions {
    pub fn new(index_url: impl Into<String>) -> Self {
        Self {
            index_url: index_url.into(),
            profile: "default".to_string(),
            activate: true,
        }
    }
}

#[derive(Debug)]
pub struct InstallOutcome {
    /// The full closure, requested package first.
    pub installed: Vec<PkgId>,
    /// The activated profile, unless activation was skipped.
    pub profile: Option<PathBuf>,
}

/// Bootstrap the root directory skeleton, optionally seeding an initial
/// profile.
pub fn init(root: &PandoraRoot, seed: bool) -> Result<(), Error> {
    root.fs_init(seed)?;
    let _lock = MutationLock::acquire(root)?;
    root.recovery_sweep()
}

/// Ensure one package's archive is verified and in the store, fetching
/// it if needed. Returns the store path.
fn install_one(
    root: &PandoraRoot,
    pkg_url: Result<String, Error>,
    manifest: &Manifest,
) -> Result<PathBuf, Error> {
    let entry = root.store_entry(&manifest.id);
    let expected_hex = manifest.sha256.to_string();
    if import::recorded_digest(&entry).as_deref() == Some(expected_hex.as_str()) {
        debug!(id = %manifest.id, "already in store, skipping fetch");
        return Ok(entry);
    }

    let fetched = fetch::fetch(&root.tmp_dir(), &pkg_url?)?;
    if !fetched.digest.ct_eq(&manifest.sha256) {
        return Err(Error::HashMismatch {
            id: manifest.id.clone(),
            expected: manifest.sha256,
            actual: fetched.digest,
        });
    }

    import::import(root, fetched.path(), &manifest.id, &manifest.sha256)
}

/// Keep a copy of the manifest text under `manifests/`, via a temp file
/// so readers never observe a partial write.
fn cache_manifest(root: &PandoraRoot, id: &PkgId, text: &str) -> Result<(), Error> {
    let tmp = tempfile::Builder::new()
        .prefix("manifest-")
        .tempfile_in(root.tmp_dir())
        .map_err(|e| Error::internal("unable to create manifest temp file", e))?;
    fs::write(tmp.path(), text)
        .map_err(|e| Error::internal("unable to write manifest copy", e))?;
    tmp.persist(root.manifest_path(id))
        .map_err(|e| Error::internal("unable to place manifest copy", e.error))?;
    Ok(())
}

fn verify_and_import(
    root: &PandoraRoot,
    registry: &mut Registry,
    keys: &[VerifyingKey],
    id: &PkgId,
) -> Result<Vec<PkgId>, Error> {
    let closure = registry.resolve_closure(root, id)?;
    let index = registry.index(root)?;

    let mut installed = Vec::with_capacity(closure.len());
    for (manifest, text) in &closure {
        signature::verify_manifest(manifest, keys)?;

        let pkg_url = match &manifest.pkg_url {
            Some(url) => Ok(url.clone()),
            None => Registry::find_pkg_url(index, &manifest.id),
        };
        install_one(root, pkg_url, manifest)?;
        cache_manifest(root, &manifest.id, text)?;
        installed.push(manifest.id.clone());
    }

    Ok(installed)
}

/// Fetch, verify and import one package (no dependency closure, no
/// profile mutation).
#[instrument(skip(root, index_url), fields(id = %id), err)]
pub fn fetch_package(root: &PandoraRoot, id: &PkgId, index_url: &str) -> Result<PathBuf, Error> {
    root.fs_init(false)?;
    let _lock = MutationLock::acquire(root)?;
    root.recovery_sweep()?;

    let keys = signature::load_trust_store(&root.keys_dir())?;
    let mut registry = Registry::new();
    registry.set_index(index_url);

    let index = registry.index(root)?;
    let manifest_url = Registry::find_manifest_url(index, id)?;
    let (manifest, text) = Registry::fetch_manifest(root, &manifest_url)?;
    if manifest.id != *id {
        return Err(Error::ParseFailed(format!(
            "manifest at {manifest_url} declares {}, expected {id}",
            manifest.id
        )));
    }
    signature::verify_manifest(&manifest, &keys)?;

    let pkg_url = match &manifest.pkg_url {
        Some(url) => Ok(url.clone()),
        None => Registry::find_pkg_url(registry.index(root)?, id),
    };
    let path = install_one(root, pkg_url, &manifest)?;
    cache_manifest(root, id, &text)?;

    info!(id = %id, path = %path.display(), "fetched into store");
    Ok(path)
}

/// The full pipeline: closure resolution, verification, import, profile
/// assembly and activation.
#[instrument(skip(root, opts), fields(id = %id), err)]
pub fn install(
    root: &PandoraRoot,
    id: &PkgId,
    opts: &InstallOptions,
) -> Result<InstallOutcome, Error> {
    root.fs_init(false)?;
    let _lock = MutationLock::acquire(root)?;
    root.recovery_sweep()?;

    let keys = signature::load_trust_store(&root.keys_dir())?;
    let mut registry = Registry::new();
    registry.set_index(&opts.index_url);

    let installed = verify_and_import(root, &mut registry, &keys, id)?;

    let profile = if opts.activate {
        let entries = profile::entries_for(root, &installed)?;
        let staged = profile::assemble(root, &entries)?;
        let activated = activate::activate(root, staged, &opts.profile)?;
        info!(id = %id, profile = %activated.display(), "installed and activated");
        Some(activated)
    } else {
        info!(id = %id, "installed without activation");
        None
    };

    Ok(InstallOutcome { installed, profile })
}

/// Re-activate the previous profile.
pub fn rollback(root: &PandoraRoot) -> Result<PathBuf, Error> {
    root.fs_init(false)?;
    let _lock = MutationLock::acquire(root)?;
    root.recovery_sweep()?;
    activate::rollback(root)
}

/// Collect unreferenced profiles and store entries.
pub fn collect_garbage(root: &PandoraRoot, keep: usize) -> Result<GcStats, Error> {
    root.fs_init(false)?;
    let _lock = MutationLock::acquire(root)?;
    root.recovery_sweep()?;
    gc::gc(root, keep)
}
