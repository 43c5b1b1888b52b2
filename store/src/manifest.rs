//! Package manifests.
//!
//! A manifest is a configuration block describing one package version:
//!
//! ```text
//! name = "snake"
//! version = "1.0"
//! sha256 = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
//! pkg_url = "https://pkgs.example.org/1.0/snake-1.0.pnd"
//! deps = ["libfoo@1.2"]
//! sig = "pandora-test-1:af4e…=="
//! ```
//!
//! The format carries no integrity of its own; trust comes from the
//! signature over the fingerprint (§[crate::signature]) and from the
//! sha256 gate in front of the store importer.

use crate::conf::{self, Block, ConfError, Value};
use crate::ident::{IdentError, PkgId};
use crate::signature::{Signature, SignatureError};
use pandora_archive::digest::{HexError, Sha256Digest};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("{0}")]
    Conf(#[from] ConfError),
    #[error("invalid package identity: {0}")]
    InvalidId(#[from] IdentError),
    #[error("invalid sha256: {0}")]
    InvalidDigest(#[from] HexError),
    #[error("invalid dependency {0:?}: {1}")]
    InvalidDep(String, IdentError),
    #[error("deps must be a list of \"name@version\" strings, found {0}")]
    InvalidDepList(&'static str),
    #[error("invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),
}

#[derive(Debug)]
pub struct Manifest {
    pub id: PkgId,
    pub sha256: Sha256Digest,
    /// Where to fetch the archive; falls back to the index when absent.
    pub pkg_url: Option<String>,
    /// Exact-pair dependencies, closed over by the resolver.
    pub deps: Vec<PkgId>,
    pub sig: Option<Signature>,
}

/// Read an optional string key, treating "absent" and "present" as the
/// distinct outcomes they are.
fn opt_str(block: &Block, path: &str) -> Result<Option<String>, ConfError> {
    match block.get_str(path) {
        Ok(s) => Ok(Some(s.to_string())),
        Err(ConfError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

impl Manifest {
    pub fn from_block(block: &Block) -> Result<Self, ManifestError> {
        let name = opt_str(block, "name")?.ok_or(ManifestError::MissingField("name"))?;
        let version = opt_str(block, "version")?.ok_or(ManifestError::MissingField("version"))?;
        let id = PkgId::new(name, version)?;

        let sha256 = opt_str(block, "sha256")?
            .ok_or(ManifestError::MissingField("sha256"))?
            .parse::<Sha256Digest>()?;

        let pkg_url = opt_str(block, "pkg_url")?;

        let deps = match block.get_value("deps") {
            Ok(Value::List(items)) => {
                let mut deps = Vec::with_capacity(items.len());
                for item in items {
                    let Value::Str(spec) = item else {
                        return Err(ManifestError::InvalidDepList(item.type_name()));
                    };
                    deps.push(
                        spec.parse::<PkgId>()
                            .map_err(|e| ManifestError::InvalidDep(spec.clone(), e))?,
                    );
                }
                deps
            }
            Ok(v) => return Err(ManifestError::InvalidDepList(v.type_name())),
            Err(ConfError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let sig = match opt_str(block, "sig")? {
            Some(s) => Some(Signature::parse(&s)?),
            None => None,
        };

        Ok(Manifest {
            id,
            sha256,
            pkg_url,
            deps,
            sig,
        })
    }

    /// Parse manifest text: syntax, reference resolution, then field
    /// extraction.
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let mut block = conf::parse_str(text)?;
        block.resolve()?;
        Self::from_block(&block)
    }

    /// The string the manifest signature covers.
    pub fn fingerprint(&self) -> String {
        format!("1;{};sha256:{}", self.id, self.sha256)
    }
}
