//! The Pandora root: discovery, directory bootstrap, and the recovery
//! sweep.

use crate::error::Error;
use crate::ident::PkgId;
use std::env;
use std::fs::{self, DirBuilder};
use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// The per-user directory holding all mutable Pandora state.
#[derive(Clone, Debug)]
pub struct PandoraRoot {
    root: PathBuf,
}

impl PandoraRoot {
    /// `$PANDORA_HOME` if set and non-empty, else `$HOME/pandora`.
    /// A missing `$HOME` is fatal.
    pub fn discover() -> Result<Self, Error> {
        if let Ok(home) = env::var("PANDORA_HOME") {
            if !home.is_empty() {
                return Ok(Self::at(home));
            }
        }

        let home = env::var("HOME")
            .ok()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::ConfigMissing("HOME".to_string()))?;
        Ok(Self::at(PathBuf::from(home).join("pandora")))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { root: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn store_dir(&self) -> PathBuf {
        self.root.join("store")
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.root.join("profiles")
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.root.join("manifests")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.root.join("keys")
    }

    pub fn vir(&self) -> PathBuf {
        self.root.join("vir")
    }

    pub fn vir_new(&self) -> PathBuf {
        self.root.join("vir-new")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(".lock")
    }

    /// `store/<name>/<version>`.
    pub fn store_entry(&self, id: &PkgId) -> PathBuf {
        self.store_dir().join(id.name()).join(id.version())
    }

    /// `manifests/<name>-<version>-manifest.acl`.
    pub fn manifest_path(&self, id: &PkgId) -> PathBuf {
        self.manifests_dir()
            .join(format!("{}-{}-manifest.acl", id.name(), id.version()))
    }

    /// Idempotently create the required directory skeleton. With `seed`,
    /// also create an initial `default` profile holding empty `bin/` and
    /// `lib/` and point `vir` at it, unless `vir` already exists.
    pub fn fs_init(&self, seed: bool) -> Result<(), Error> {
        for dir in [
            self.root.clone(),
            self.store_dir(),
            self.profiles_dir(),
            self.manifests_dir(),
            self.cache_dir(),
            self.tmp_dir(),
            self.keys_dir(),
        ] {
            mkdir_p(&dir)?;
        }

        if seed && fs::symlink_metadata(self.vir()).is_err() {
            let (pid, nsec) = process_stamp();
            let profile = self.profiles_dir().join(format!("default-{pid}-{nsec}"));
            mkdir_p(&profile.join("bin"))?;
            mkdir_p(&profile.join("lib"))?;
            crate::activate::swap_live(self, &profile)?;
            debug!(profile = %profile.display(), "seeded initial profile");
        }

        Ok(())
    }

    /// The profile `vir` currently names, if any.
    pub fn active_profile(&self) -> Result<Option<PathBuf>, Error> {
        match fs::read_link(self.vir()) {
            Ok(target) => Ok(Some(target)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::internal("unable to read live pointer", e)),
        }
    }

    /// All `(name, version)` pairs currently in the store.
    pub fn list_store(&self) -> Result<Vec<PkgId>, Error> {
        let mut out = Vec::new();
        for name_entry in read_dir_or_empty(&self.store_dir())? {
            if name_entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let name = name_entry.file_name().to_string_lossy().into_owned();
            for version_entry in read_dir_or_empty(&name_entry.path())? {
                let version = version_entry.file_name().to_string_lossy().into_owned();
                if let Ok(id) = PkgId::new(name.clone(), version) {
                    out.push(id);
                }
            }
        }
        out.sort();
        Ok(out)
    }

    /// Delete debris a crashed or killed process may have left behind:
    /// in-flight import and profile temp directories, an orphan `vir-new`
    /// whose target is gone, and partial downloads under `tmp/`.
    /// Transaction logs are kept.
    pub fn recovery_sweep(&self) -> Result<(), Error> {
        sweep_prefixed_dirs(&self.store_dir(), ".tmp-import-");
        sweep_prefixed_dirs(&self.profiles_dir(), ".tmp-profile-");

        if let Ok(target) = fs::read_link(self.vir_new()) {
            if fs::symlink_metadata(&target).is_err() {
                warn!(target = %target.display(), "removing orphan vir-new");
                if let Err(e) = fs::remove_file(self.vir_new()) {
                    warn!(err = %e, "unable to remove orphan vir-new");
                }
            }
        }

        for entry in read_dir_or_empty(&self.tmp_dir())? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("txn-") && name.ends_with(".log") {
                continue;
            }
            debug!(file = %entry.path().display(), "reaping stale temp file");
            if let Err(e) = fs::remove_file(entry.path()) {
                warn!(file = %entry.path().display(), err = %e, "unable to reap temp file");
            }
        }

        Ok(())
    }
}

/// `pid` and a nanosecond timestamp, the uniqueness suffix used for
/// profile names and transaction logs.
pub(crate) fn process_stamp() -> (u32, u128) {
    let nsec = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    (std::process::id(), nsec)
}

pub(crate) fn mkdir_p(dir: &Path) -> Result<(), Error> {
    DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(dir)
        .map_err(|e| Error::internal(format!("unable to create {}", dir.display()), e))
}

fn read_dir_or_empty(dir: &Path) -> Result<Vec<fs::DirEntry>, Error> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Error::internal(format!("unable to read {}", dir.display()), e)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(Error::internal(format!("unable to read {}", dir.display()), e)),
    }
}

/// Best-effort removal of directories with a given prefix; the sweep
/// never fails an operation over debris it cannot delete.
fn sweep_prefixed_dirs(parent: &Path, prefix: &str) {
    let Ok(entries) = fs::read_dir(parent) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(prefix) {
            debug!(dir = %entry.path().display(), "reaping in-flight temp directory");
            if let Err(e) = fs::remove_dir_all(entry.path()) {
                warn!(dir = %entry.path().display(), err = %e, "unable to reap temp directory");
            }
        }
    }
}
