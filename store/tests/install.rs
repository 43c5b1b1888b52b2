//! End-to-end install flows against an on-disk registry.
//!
//! The registry here is a directory of local files: an index, manifests
//! and `.pnd` archives, addressed by plain paths. The fetcher treats
//! non-http(s) sources as local reads, so the whole pipeline runs
//! without a network.

use data_encoding::BASE64;
use ed25519_dalek::{Signer, SigningKey};
use pandora_archive::digest::{hash_file, Sha256Digest};
use pandora_archive::pnd;
use pandora_store::ops::{self, InstallOptions};
use pandora_store::{Error, PandoraRoot, PkgId};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct TestRegistry {
    dir: PathBuf,
    index_entries: Vec<String>,
    signing: Option<(String, SigningKey)>,
}

impl TestRegistry {
    fn new(dir: &Path) -> Self {
        fs::create_dir_all(dir).expect("mkdir registry");
        Self {
            dir: dir.to_path_buf(),
            index_entries: Vec::new(),
            signing: None,
        }
    }

    fn with_signing(mut self, key_id: &str, signing: SigningKey) -> Self {
        self.signing = Some((key_id.to_string(), signing));
        self
    }

    /// Publish a package: build its archive from `files`, write its
    /// manifest, and list both in the index.
    fn publish(&mut self, name: &str, version: &str, files: &[(&str, &str)], deps: &[&str]) {
        self.publish_with_digest(name, version, files, deps, None);
    }

    fn publish_with_digest(
        &mut self,
        name: &str,
        version: &str,
        files: &[(&str, &str)],
        deps: &[&str],
        digest_override: Option<Sha256Digest>,
    ) {
        let tree = self.dir.join(format!("{name}-{version}-tree"));
        for (relpath, contents) in files {
            let path = tree.join(relpath);
            fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            fs::write(path, contents).expect("write file");
        }

        let pkg = self.dir.join(format!("{name}-{version}.pnd"));
        let mut out = fs::File::create(&pkg).expect("create archive");
        pnd::pack(&mut out, &[tree]).expect("pack");

        let digest = digest_override.unwrap_or_else(|| hash_file(&pkg).expect("hash"));

        let mut manifest = format!(
            "name = \"{name}\"\nversion = \"{version}\"\nsha256 = \"{digest}\"\npkg_url = \"{}\"\n",
            pkg.display()
        );
        if !deps.is_empty() {
            let list = deps
                .iter()
                .map(|d| format!("\"{d}\""))
                .collect::<Vec<_>>()
                .join(", ");
            manifest.push_str(&format!("deps = [{list}]\n"));
        }
        if let Some((key_id, signing)) = &self.signing {
            let fingerprint = format!("1;{name}@{version};sha256:{digest}");
            let sig = signing.sign(fingerprint.as_bytes());
            manifest.push_str(&format!(
                "sig = \"{key_id}:{}\"\n",
                BASE64.encode(&sig.to_bytes())
            ));
        }

        let manifest_path = self.dir.join(format!("{name}-{version}-manifest.acl"));
        fs::write(&manifest_path, manifest).expect("write manifest");

        self.index_entries.push(format!(
            "    Package \"{name}\" {{\n        Version \"{version}\" {{\n            manifest_url = \"{}\"\n            pkg_url = \"{}\"\n        }}\n    }}\n",
            manifest_path.display(),
            pkg.display()
        ));
    }

    /// Write the index and return its path (the `--index` argument).
    fn index(&self) -> String {
        let index = format!("Registry {{\n{}}}\n", self.index_entries.concat());
        let path = self.dir.join("index.acl");
        fs::write(&path, index).expect("write index");
        path.display().to_string()
    }
}

fn setup() -> (TempDir, PandoraRoot, TestRegistry) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let root = PandoraRoot::at(dir.path().join("pandora"));
    let registry = TestRegistry::new(&dir.path().join("registry"));
    (dir, root, registry)
}

fn id(s: &str) -> PkgId {
    s.parse().expect("pkg id")
}

#[test]
fn install_activates_profile() {
    let (_dir, root, mut registry) = setup();
    registry.publish("snake", "1.0", &[("bin/snake", "crawl\n"), ("lib/libsnake.so", "so\n")], &[]);

    let outcome = ops::install(&root, &id("snake@1.0"), &InstallOptions::new(registry.index()))
        .expect("install");

    assert_eq!(vec![id("snake@1.0")], outcome.installed);
    let profile = outcome.profile.expect("activated");

    // the live pointer resolves to the new profile
    assert_eq!(Some(profile.clone()), root.active_profile().expect("read"));

    // profile symlinks resolve into the store
    let through_profile = fs::read(profile.join("bin/snake")).expect("read through symlink");
    assert_eq!(b"crawl\n".as_slice(), &through_profile);
    let target = fs::read_link(profile.join("bin/snake")).expect("readlink");
    assert!(target.starts_with(root.store_entry(&id("snake@1.0"))));

    // the manifest copy was cached
    assert!(root.manifest_path(&id("snake@1.0")).is_file());
}

#[test]
fn install_is_idempotent() {
    let (_dir, root, mut registry) = setup();
    registry.publish("snake", "1.0", &[("bin/snake", "crawl\n")], &[]);
    let index = registry.index();

    let first = ops::install(&root, &id("snake@1.0"), &InstallOptions::new(&index))
        .expect("first install");
    let second = ops::install(&root, &id("snake@1.0"), &InstallOptions::new(&index))
        .expect("second install");

    assert_eq!(first.installed, second.installed);
    // one store entry, two profiles (the first survives for rollback)
    assert_eq!(vec![id("snake@1.0")], root.list_store().expect("list"));
    assert_ne!(first.profile, second.profile);
}

#[test]
fn hash_mismatch_aborts_without_store_mutation() {
    let (_dir, root, mut registry) = setup();
    let wrong = pandora_archive::digest::hash_bytes(b"");
    registry.publish_with_digest("evil", "1.0", &[("bin/evil", "x")], &[], Some(wrong));

    let err = ops::install(&root, &id("evil@1.0"), &InstallOptions::new(registry.index()))
        .expect_err("must fail");

    assert!(matches!(err, Error::HashMismatch { .. }));
    assert!(!root.store_entry(&id("evil@1.0")).exists());
    assert!(root.active_profile().expect("read").is_none());
}

#[test]
fn closure_installs_dependencies_first_class() {
    let (_dir, root, mut registry) = setup();
    registry.publish("libfoo", "1.2", &[("lib/libfoo.so", "foo")], &[]);
    registry.publish("snake", "1.0", &[("bin/snake", "crawl\n")], &["libfoo@1.2"]);

    let outcome = ops::install(&root, &id("snake@1.0"), &InstallOptions::new(registry.index()))
        .expect("install");

    assert_eq!(vec![id("snake@1.0"), id("libfoo@1.2")], outcome.installed);
    assert!(root.store_entry(&id("libfoo@1.2")).is_dir());

    // the profile carries both packages' files
    let profile = outcome.profile.expect("activated");
    assert!(profile.join("bin/snake").is_symlink());
    assert!(profile.join("lib/libfoo.so").is_symlink());
}

#[test]
fn conflicting_closure_leaves_no_profile() {
    let (_dir, root, mut registry) = setup();
    registry.publish("a", "1", &[("bin/x", "from a")], &[]);
    registry.publish("b", "1", &[("bin/x", "from b")], &["a@1"]);

    let err = ops::install(&root, &id("b@1"), &InstallOptions::new(registry.index()))
        .expect_err("must conflict");

    assert!(matches!(err, Error::ProfileConflict { .. }));
    assert!(root.active_profile().expect("read").is_none());

    // store imports happened (they are idempotent and harmless), but no
    // staging debris survives
    let debris: Vec<_> = fs::read_dir(root.profiles_dir())
        .expect("read dir")
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp-profile-"))
        .collect();
    assert!(debris.is_empty());
}

#[test]
fn no_activate_skips_profile() {
    let (_dir, root, mut registry) = setup();
    registry.publish("snake", "1.0", &[("bin/snake", "crawl\n")], &[]);

    let mut opts = InstallOptions::new(registry.index());
    opts.activate = false;
    let outcome = ops::install(&root, &id("snake@1.0"), &opts).expect("install");

    assert!(outcome.profile.is_none());
    assert!(root.store_entry(&id("snake@1.0")).is_dir());
    assert!(root.active_profile().expect("read").is_none());
}

#[test]
fn fetch_imports_without_profile() {
    let (_dir, root, mut registry) = setup();
    registry.publish("snake", "1.0", &[("bin/snake", "crawl\n")], &[]);

    let path = ops::fetch_package(&root, &id("snake@1.0"), &registry.index()).expect("fetch");

    assert_eq!(root.store_entry(&id("snake@1.0")), path);
    assert!(path.join("files/bin/snake").is_file());
    assert!(root.active_profile().expect("read").is_none());
}

#[test]
fn unknown_package_is_not_found() {
    let (_dir, root, mut registry) = setup();
    registry.publish("snake", "1.0", &[("bin/snake", "crawl\n")], &[]);

    let err = ops::install(&root, &id("ghost@9.9"), &InstallOptions::new(registry.index()))
        .expect_err("must fail");
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn signed_manifest_verifies_against_trust_store() {
    let (_dir, root, registry) = setup();
    let signing = SigningKey::from_bytes(&[42u8; 32]);
    let mut registry = registry.with_signing("pandora-test-1", signing.clone());
    registry.publish("snake", "1.0", &[("bin/snake", "crawl\n")], &[]);

    root.fs_init(false).expect("init");
    fs::write(
        root.keys_dir().join("pandora-test-1.pub"),
        format!(
            "pandora-test-1:{}\n",
            BASE64.encode(signing.verifying_key().as_bytes())
        ),
    )
    .expect("write trust key");

    ops::install(&root, &id("snake@1.0"), &InstallOptions::new(registry.index()))
        .expect("signed install");
}

#[test]
fn unsigned_manifest_rejected_when_trust_store_nonempty() {
    let (_dir, root, mut registry) = setup();
    registry.publish("snake", "1.0", &[("bin/snake", "crawl\n")], &[]);

    root.fs_init(false).expect("init");
    let other = SigningKey::from_bytes(&[9u8; 32]);
    fs::write(
        root.keys_dir().join("some-key.pub"),
        format!("some-key:{}\n", BASE64.encode(other.verifying_key().as_bytes())),
    )
    .expect("write trust key");

    let err = ops::install(&root, &id("snake@1.0"), &InstallOptions::new(registry.index()))
        .expect_err("must fail");
    assert!(matches!(err, Error::SignatureInvalid(_)));
    assert!(!root.store_entry(&id("snake@1.0")).exists());
}

#[test]
fn tampered_signature_rejected() {
    let (_dir, root, registry) = setup();
    let signing = SigningKey::from_bytes(&[42u8; 32]);
    let mut registry = registry.with_signing("pandora-test-1", signing);
    registry.publish("snake", "1.0", &[("bin/snake", "crawl\n")], &[]);

    // trust a different key under the same id
    let imposter = SigningKey::from_bytes(&[43u8; 32]);
    root.fs_init(false).expect("init");
    fs::write(
        root.keys_dir().join("pandora-test-1.pub"),
        format!(
            "pandora-test-1:{}\n",
            BASE64.encode(imposter.verifying_key().as_bytes())
        ),
    )
    .expect("write trust key");

    let err = ops::install(&root, &id("snake@1.0"), &InstallOptions::new(registry.index()))
        .expect_err("must fail");
    assert!(matches!(err, Error::SignatureInvalid(_)));
}

#[test]
fn rollback_after_second_install() {
    let (_dir, root, mut registry) = setup();
    registry.publish("snake", "1.0", &[("bin/snake", "v1\n")], &[]);
    registry.publish("snake", "2.0", &[("bin/snake", "v2\n")], &[]);
    let index = registry.index();

    let first = ops::install(&root, &id("snake@1.0"), &InstallOptions::new(&index))
        .expect("install v1");
    std::thread::sleep(std::time::Duration::from_millis(20));
    ops::install(&root, &id("snake@2.0"), &InstallOptions::new(&index)).expect("install v2");

    assert_eq!(
        b"v2\n".as_slice(),
        &fs::read(root.vir().join("bin/snake")).expect("read live")
    );

    let rolled = ops::rollback(&root).expect("rollback");
    assert_eq!(first.profile.expect("profile"), rolled);
    assert_eq!(
        b"v1\n".as_slice(),
        &fs::read(root.vir().join("bin/snake")).expect("read live")
    );
}

#[test]
fn gc_keeps_live_closure() {
    let (_dir, root, mut registry) = setup();
    registry.publish("snake", "1.0", &[("bin/snake", "v1\n")], &[]);
    registry.publish("snake", "2.0", &[("bin/snake", "v2\n")], &[]);
    let index = registry.index();

    ops::install(&root, &id("snake@1.0"), &InstallOptions::new(&index)).expect("install v1");
    std::thread::sleep(std::time::Duration::from_millis(20));
    ops::install(&root, &id("snake@2.0"), &InstallOptions::new(&index)).expect("install v2");

    let stats = ops::collect_garbage(&root, 0).expect("gc");
    assert_eq!(1, stats.profiles_removed);
    assert_eq!(1, stats.entries_removed);

    // the live view still works end to end
    assert_eq!(
        b"v2\n".as_slice(),
        &fs::read(root.vir().join("bin/snake")).expect("read live")
    );
    assert_eq!(vec![id("snake@2.0")], root.list_store().expect("list"));
}
