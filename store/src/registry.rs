//! The registry client: index fetching, URL lookup, and exact-pair
//! closure resolution.

use crate::conf::{self, Block, Step};
use crate::error::Error;
use crate::fetch;
use crate::ident::PkgId;
use crate::layout::PandoraRoot;
use crate::manifest::Manifest;
use std::collections::{HashSet, VecDeque};
use std::fs;
use tracing::{debug, instrument};

/// A client for one registry index. The parsed index is fetched lazily
/// and cached; the client owns it, callers only borrow.
#[derive(Default)]
pub struct Registry {
    index_url: Option<String>,
    index: Option<Block>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the index URL (http/https or a local path).
    pub fn set_index(&mut self, url: impl Into<String>) {
        self.index_url = Some(url.into());
        self.index = None;
    }

    /// Fetch and parse the index, resolving internal references, and
    /// cache the parsed tree.
    #[instrument(skip_all, err)]
    pub fn fetch_index(&mut self, root: &PandoraRoot) -> Result<(), Error> {
        let url = self
            .index_url
            .clone()
            .ok_or_else(|| Error::ConfigMissing("registry index URL".to_string()))?;

        let fetched = fetch::fetch(&root.tmp_dir(), &url)?;
        let text = fs::read_to_string(fetched.path())
            .map_err(|e| Error::internal("unable to read fetched index", e))?;

        let mut block =
            conf::parse_str(&text).map_err(|e| Error::ParseFailed(format!("index {url}: {e}")))?;
        block
            .resolve()
            .map_err(|e| Error::ParseFailed(format!("index {url}: {e}")))?;

        debug!(%url, "index fetched and parsed");
        self.index = Some(block);
        Ok(())
    }

    /// The cached index, fetching it first if needed.
    pub fn index(&mut self, root: &PandoraRoot) -> Result<&Block, Error> {
        if self.index.is_none() {
            self.fetch_index(root)?;
        }
        Ok(self.index.as_ref().expect("index just fetched"))
    }

    /// Fetch and parse a manifest, returning it together with its raw
    /// text (which install caches under `manifests/`).
    pub fn fetch_manifest(root: &PandoraRoot, url: &str) -> Result<(Manifest, String), Error> {
        let fetched = fetch::fetch(&root.tmp_dir(), url)?;
        let text = fs::read_to_string(fetched.path())
            .map_err(|e| Error::internal("unable to read fetched manifest", e))?;
        let manifest =
            Manifest::parse(&text).map_err(|e| Error::ParseFailed(format!("manifest {url}: {e}")))?;
        Ok((manifest, text))
    }

    pub fn find_manifest_url(index: &Block, id: &PkgId) -> Result<String, Error> {
        Self::find_url(index, id, "manifest_url")
            .ok_or_else(|| Error::NotFound(format!("no manifest URL for {id} in index")))
    }

    pub fn find_pkg_url(index: &Block, id: &PkgId) -> Result<String, Error> {
        if let Some(url) = Self::find_url(index, id, "pkg_url") {
            return Ok(url);
        }

        // last resort: construct "<pkg_base_url>/<V>/<N>-<V>.pkg"
        let base = index
            .get_str("Registry.pkg_base_url")
            .or_else(|_| index.get_str("pkg_base_url"));
        if let Ok(base) = base {
            return Ok(format!(
                "{}/{}/{}-{}.pkg",
                base.trim_end_matches('/'),
                id.version(),
                id.name(),
                id.version()
            ));
        }

        Err(Error::NotFound(format!("no package URL for {id} in index")))
    }

    /// Try the fixed lookup sequence for `key`; the first hit wins.
    /// Queries are built from literal steps, so names and versions
    /// containing dots cannot distort them.
    fn find_url(index: &Block, id: &PkgId, key: &str) -> Option<String> {
        let name = || Step::Label(id.name().to_string());
        let version = || Step::Label(id.version().to_string());
        let keyed_version = || Step::Label(format!("{key}_{}", id.version()));

        let candidates = [
            vec![
                Step::Name("Registry".to_string()),
                Step::Name("Package".to_string()),
                name(),
                Step::Name("Version".to_string()),
                version(),
                Step::Name(key.to_string()),
            ],
            vec![
                Step::Name("Package".to_string()),
                name(),
                Step::Name("Version".to_string()),
                version(),
                Step::Name(key.to_string()),
            ],
            vec![
                Step::Name("Registry".to_string()),
                Step::Name("Package".to_string()),
                name(),
                keyed_version(),
            ],
            vec![
                Step::Name("Package".to_string()),
                name(),
                keyed_version(),
            ],
        ];

        candidates.into_iter().find_map(|steps| {
            let expr = conf::PathExpr::from_steps(steps);
            index.get_str_expr(&expr).ok().map(str::to_string)
        })
    }

    /// Resolve the exact-pair closure of `id`: breadth-first over each
    /// manifest's `deps`, deduplicating pairs. The requested package
    /// comes first in the result.
    #[instrument(skip(self, root), fields(id = %id), err)]
    pub fn resolve_closure(
        &mut self,
        root: &PandoraRoot,
        id: &PkgId,
    ) -> Result<Vec<(Manifest, String)>, Error> {
        self.index(root)?;
        let index = self.index.as_ref().expect("index just fetched");

        let mut queue = VecDeque::from([id.clone()]);
        let mut seen: HashSet<PkgId> = HashSet::new();
        let mut out = Vec::new();

        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }

            let manifest_url = Self::find_manifest_url(index, &next)?;
            let (manifest, text) = Self::fetch_manifest(root, &manifest_url)?;

            if manifest.id != next {
                return Err(Error::ParseFailed(format!(
                    "manifest at {manifest_url} declares {}, expected {next}",
                    manifest.id
                )));
            }

            queue.extend(manifest.deps.iter().cloned());
            out.push((manifest, text));
        }

        debug!(packages = out.len(), "closure resolved");
        Ok(out)
    }
}
